use criterion::{Criterion, black_box, criterion_group, criterion_main};
use xrayspec::interp::linspace;
use xrayspec::{
    LineCategory, ProfileKind, RateLine, RateTable, Session, Shell, SimulationConfig, Subject,
    TransitionKind,
};

fn iron() -> Subject {
    let lines = (0..40)
        .map(|i| RateLine {
            kind: TransitionKind::radiative(Shell::K, if i % 2 == 0 { Shell::L3 } else { Shell::L2 }),
            spectator: None,
            category: LineCategory::Diagram,
            jj_initial: 1.0,
            jj_final: 3.0,
            energy: 6390.0 + 0.5 * i as f64,
            intensity: 1.0 + (i % 7) as f64,
            width: 1.2,
            charge_state: None,
        })
        .collect();
    Subject::new("Fe", RateTable::new("Fe", 26, lines))
}

fn bench_profiles(c: &mut Criterion) {
    let grid = linspace(6380.0, 6420.0, 2000);

    for (name, kind) in [
        ("gaussian_2000", ProfileKind::Gaussian),
        ("lorentzian_2000", ProfileKind::Lorentzian),
        ("voigt_2000", ProfileKind::Voigt),
    ] {
        c.bench_function(name, |b| {
            b.iter(|| {
                black_box(kind.evaluate(
                    black_box(&grid),
                    black_box(6400.0),
                    1.0,
                    black_box(0.8),
                    black_box(1.2),
                ));
            });
        });
    }
}

fn bench_simulate(c: &mut Criterion) {
    let config = SimulationConfig {
        profile_kind: ProfileKind::Voigt,
        n_points: 2000,
        transitions: vec!["K-L3".into(), "K-L2".into()],
        ..SimulationConfig::default()
    };
    let Ok(session) = Session::new(config, vec![iron()]) else {
        return;
    };

    c.bench_function("simulate_voigt_40_lines", |b| {
        b.iter(|| {
            black_box(session.simulate());
        });
    });
}

criterion_group!(benches, bench_profiles, bench_simulate);
criterion_main!(benches);
