use crate::constants::INVALID_RESIDUAL;
use crate::context::SimulationContext;
use crate::params::SimulationParameters;
use crate::residuals::{Comparison, ExperimentalSpectrum, compare};

use super::{Objective, ParameterSet};

/// Floor of the simulated value inside the Poisson deviance.
const DEVIANCE_FLOOR: f64 = 1e-12;

/// Whether fitted shake multipliers still describe a physical set of
/// channels: the total effective probability stays under `max_total` and
/// channels keep the ordering of their tabulated probabilities.
pub fn shake_constraint_ok(probabilities: &[f64], multipliers: &[f64], max_total: f64) -> bool {
    let effective: Vec<f64> = probabilities
        .iter()
        .zip(multipliers)
        .map(|(p, m)| p * m)
        .collect();
    if effective.iter().sum::<f64>() > max_total {
        return false;
    }
    for a in 0..probabilities.len() {
        for b in 0..probabilities.len() {
            if probabilities[a] > probabilities[b] && effective[a] < effective[b] {
                return false;
            }
        }
    }
    true
}

/// Residual/deviance objective over the full synthesis pipeline.
pub(crate) struct SpectrumObjective<'c, 'a> {
    context: &'c SimulationContext<'a>,
    experiment: &'c ExperimentalSpectrum,
    parameters: &'c ParameterSet,
    base: SimulationParameters,
    /// Ceiling of the total effective shake probability, `None` when
    /// multipliers are not fitted.
    shake_ceiling: Option<f64>,
    n_evaluations: usize,
}

impl<'c, 'a> SpectrumObjective<'c, 'a> {
    pub fn new(
        context: &'c SimulationContext<'a>,
        experiment: &'c ExperimentalSpectrum,
        parameters: &'c ParameterSet,
        base: SimulationParameters,
    ) -> Self {
        let fitting_shake = parameters.iter().any(|p| p.name.is_shake_amplitude() && p.vary);
        // Never below the tabulated total, so unit multipliers stay admissible.
        let tabulated: f64 = context.selection.shake_probabilities().iter().sum();
        let shake_ceiling =
            fitting_shake.then(|| context.config.max_total_shake_probability.max(tabulated));
        Self {
            context,
            experiment,
            parameters,
            base,
            shake_ceiling,
            n_evaluations: 0,
        }
    }

    fn compare(&mut self, values: &[f64]) -> Option<Comparison> {
        self.n_evaluations += 1;
        let mut p = self.base.clone();
        self.parameters.apply(values, &mut p);

        if let Some(ceiling) = self.shake_ceiling {
            let probabilities = self.context.selection.shake_probabilities();
            if !shake_constraint_ok(probabilities, &p.shake_multipliers, ceiling) {
                tracing::trace!("shake multipliers outside the admissible region");
                return None;
            }
        }

        let ctx = self.context;
        let grid = ctx.grid(&p);
        if grid.grid.is_degenerate() {
            tracing::trace!("trial parameters leave no simulation range");
            return None;
        }
        let aggregated = ctx.aggregate(grid, &p);
        let normalized = ctx.normalize(aggregated, &p);
        let curve = normalized.curve();
        Some(compare(
            self.experiment,
            &normalized.grid.points,
            &curve,
            ctx.mode(),
        ))
    }
}

impl Objective for SpectrumObjective<'_, '_> {
    fn residuals(&mut self, values: &[f64]) -> Vec<f64> {
        let n = self.experiment.len();
        let Some(cmp) = self.compare(values) else {
            return vec![INVALID_RESIDUAL; n];
        };
        cmp.simulated
            .iter()
            .zip(cmp.observed.iter().zip(&cmp.sigma))
            .map(|(sim, (o, s))| match sim {
                Some(sim) => {
                    let r = (o - sim) / s;
                    if r.is_finite() { r } else { INVALID_RESIDUAL }
                }
                None => 0.0,
            })
            .collect()
    }

    fn deviance(&mut self, values: &[f64]) -> f64 {
        let Some(cmp) = self.compare(values) else {
            return INVALID_RESIDUAL * INVALID_RESIDUAL;
        };
        let d: f64 = cmp
            .simulated
            .iter()
            .zip(&cmp.observed)
            .filter_map(|(sim, o)| sim.map(|s| (s, *o)))
            .map(|(s, o)| {
                let t = s.max(DEVIANCE_FLOOR);
                let o = o.max(0.0);
                if o > 0.0 {
                    2.0 * (t - o + o * (o / t).ln())
                } else {
                    2.0 * t
                }
            })
            .sum();
        if d.is_finite() { d } else { INVALID_RESIDUAL * INVALID_RESIDUAL }
    }

    fn n_data(&self) -> usize {
        self.experiment.len()
    }

    fn n_evaluations(&self) -> usize {
        self.n_evaluations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::fit::FitHarness;
    use crate::profiles::ProfileKind;
    use crate::rates::RateTable;
    use crate::selection::Subject;
    use crate::session::Session;
    use crate::transitions::{LineCategory, RateLine, Shell, TransitionCategory, TransitionKind};

    fn row(category: LineCategory, spectator: Option<Shell>, energy: f64, intensity: f64) -> RateLine {
        RateLine {
            kind: TransitionKind::radiative(Shell::K, Shell::L3),
            spectator,
            category,
            jj_initial: 1.0,
            jj_final: 3.0,
            energy,
            intensity,
            width: 1.0,
            charge_state: None,
        }
    }

    /// Diagram line plus an L1 and an M1 shake-off channel, fitted against
    /// its own simulated curve.
    fn satellite_session() -> Session {
        let table = RateTable::new(
            "Fe",
            26,
            vec![
                row(LineCategory::Diagram, None, 6400.0, 10.0),
                row(LineCategory::ShakeOff, Some(Shell::L1), 6412.0, 1.0),
                row(LineCategory::ShakeOff, Some(Shell::M1), 6406.0, 0.5),
            ],
        )
        .with_shake_probability(Shell::L1, 0.04, 0.01)
        .with_shake_probability(Shell::M1, 0.015, 0.005);
        let config = SimulationConfig {
            transition_category: TransitionCategory::DiagramSatellites,
            profile_kind: ProfileKind::Lorentzian,
            n_points: 401,
            transitions: vec!["K-L3".into()],
            fit_shake_amplitudes: true,
            ..SimulationConfig::default()
        };
        let mut session = Session::new(config, vec![Subject::new("Fe", table)]).unwrap();
        let sim = session.simulate();
        let energy: Vec<f64> = sim.grid.points.iter().step_by(4).copied().collect();
        let intensity: Vec<f64> = sim.curve.iter().step_by(4).copied().collect();
        let experiment = ExperimentalSpectrum::new(energy, intensity, None).unwrap();
        session.set_experiment(Some(experiment));
        session
    }

    #[test]
    fn test_shake_violation_rejects_whole_trial() {
        let session = satellite_session();
        let context = session.context();
        let mut harness = FitHarness::new(&context);
        let params = harness.build_parameters().unwrap().clone();
        let experiment = context.experiment.unwrap();
        let mut objective =
            SpectrumObjective::new(&context, experiment, &params, context.initial_parameters());

        let admissible = objective.residuals(&params.values());
        assert_eq!(admissible.len(), experiment.len());
        assert!(admissible.iter().all(|r| r.abs() < 1e-6));

        let l1 = params.iter().position(|p| p.label == "shake_amp_L1").unwrap();
        let m1 = params.iter().position(|p| p.label == "shake_amp_M1").unwrap();

        // M1 overtakes the more probable L1 channel.
        let mut inverted = params.values();
        inverted[l1] = 1.0;
        inverted[m1] = 5.0;
        let r = objective.residuals(&inverted);
        assert_eq!(r.len(), experiment.len());
        assert!(r.iter().all(|v| *v == INVALID_RESIDUAL));
        assert_eq!(objective.deviance(&inverted), INVALID_RESIDUAL * INVALID_RESIDUAL);

        // Ordering kept, total above 0.5.
        let mut saturated = params.values();
        saturated[l1] = 9.0;
        saturated[m1] = 9.0;
        assert!(objective.residuals(&saturated).iter().all(|v| *v == INVALID_RESIDUAL));
        assert_eq!(objective.n_evaluations(), 4);
    }

    #[test]
    fn test_shake_constraint() {
        let p = [0.04, 0.02];
        assert!(shake_constraint_ok(&p, &[1.0, 1.0], 0.5));
        // total above the ceiling
        assert!(!shake_constraint_ok(&p, &[10.0, 10.0], 0.5));
        // ordering inverted
        assert!(!shake_constraint_ok(&p, &[0.5, 2.0], 0.5));
        // equal effective probabilities keep the ordering
        assert!(shake_constraint_ok(&p, &[1.0, 2.0], 0.5));
    }
}
