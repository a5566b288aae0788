//! Line-profile summation ("y-calculator").

use std::collections::BTreeMap;

use serde::Serialize;

use crate::components::ExtraComponent;
use crate::efficiency::EfficiencyTable;
use crate::params::SimulationParameters;
use crate::profiles::ProfileKind;
use crate::selection::{SelectionSet, TransitionId};
use crate::transitions::{LineCategory, RateLine};

pub struct AggregateRequest<'a> {
    pub selection: &'a SelectionSet,
    pub profile: ProfileKind,
    pub grid: &'a [f64],
    pub params: &'a SimulationParameters,
    pub efficiency: Option<&'a EfficiencyTable>,
    pub charge_state_weights: &'a BTreeMap<String, f64>,
    pub components: &'a [Box<dyn ExtraComponent>],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateProgress {
    pub done: usize,
    pub total: usize,
    pub transition: TransitionId,
}

/// Summed spectrum and its breakdown. Every array has grid length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntensityResult {
    pub total: Vec<f64>,
    /// Diagram lines, or Auger lines in Auger mode.
    pub diagram: Vec<f64>,
    pub satellite: Vec<f64>,
    pub shake_off: Vec<f64>,
    pub shake_up: Vec<f64>,
    pub extra: Vec<f64>,
    /// Diagram/Auger contribution of each selected transition.
    pub per_line: Vec<Vec<f64>>,
    /// Contribution of each satellite channel of each selected transition.
    pub per_channel: Vec<Vec<Vec<f64>>>,
}

impl IntensityResult {
    fn zeros(n: usize, selection: &SelectionSet) -> Self {
        Self {
            total: vec![0.0; n],
            diagram: vec![0.0; n],
            satellite: vec![0.0; n],
            shake_off: vec![0.0; n],
            shake_up: vec![0.0; n],
            extra: vec![0.0; n],
            per_line: vec![vec![0.0; n]; selection.len()],
            per_channel: selection
                .iter()
                .map(|t| vec![vec![0.0; n]; t.channels.len()])
                .collect(),
        }
    }

    /// Largest finite value of the total, or 0.
    pub fn max(&self) -> f64 {
        self.total
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0, f64::max)
    }
}

/// Weight of a row under the charge-state map.
///
/// An empty map weights everything 1. Otherwise untagged rows keep weight
/// 1 and tagged rows not in the map are excluded.
pub fn charge_weight(weights: &BTreeMap<String, f64>, tag: Option<&str>) -> f64 {
    if weights.is_empty() {
        return 1.0;
    }
    match tag {
        None => 1.0,
        Some(t) => weights.get(t).copied().unwrap_or(0.0),
    }
}

pub fn y_calculator(req: &AggregateRequest<'_>) -> IntensityResult {
    y_calculator_with_progress(req, |_| {})
}

/// Sum every selected row into the result arrays, calling `progress`
/// after each transition.
pub fn y_calculator_with_progress(
    req: &AggregateRequest<'_>,
    mut progress: impl FnMut(AggregateProgress),
) -> IntensityResult {
    let grid = req.grid;
    let n = grid.len();
    let params = req.params;
    let mut result = IntensityResult::zeros(n, req.selection);
    let total = req.selection.len();

    for (i, transition) in req.selection.iter().enumerate() {
        let subject_weight = params.subject_weight(transition.subject);

        let line = &mut result.per_line[i];
        for row in &transition.lines {
            add_row(req, row, subject_weight, 0.0, line);
        }
        if let Some(eff) = req.efficiency {
            eff.apply(grid, params.energy_offset, line);
        }
        add_assign(&mut result.diagram, line);

        for (channel, out) in transition.channels.iter().zip(result.per_channel[i].iter_mut()) {
            let weight = subject_weight * params.shake_multiplier(channel.shake_index);
            let offset = params.channel_offset(channel.kind);
            for row in &channel.rows {
                add_row(req, row, weight, offset, out);
            }
            if let Some(eff) = req.efficiency {
                eff.apply(grid, params.energy_offset + offset, out);
            }
            add_assign(&mut result.satellite, out);
            match channel.kind {
                LineCategory::ShakeUp => add_assign(&mut result.shake_up, out),
                _ => add_assign(&mut result.shake_off, out),
            }
        }

        progress(AggregateProgress {
            done: i + 1,
            total,
            transition: transition.id,
        });
    }

    for (component, values) in req.components.iter().zip(&params.component_values) {
        let y = component.evaluate(grid, values, params.resolution);
        add_assign(&mut result.extra, &y);
    }

    for (j, t) in result.total.iter_mut().enumerate() {
        *t = result.diagram[j] + result.satellite[j] + result.extra[j];
    }
    result
}

fn add_row(
    req: &AggregateRequest<'_>,
    row: &RateLine,
    weight: f64,
    channel_offset: f64,
    out: &mut [f64],
) {
    let amplitude = row.intensity * weight * charge_weight(req.charge_state_weights, row.charge_state.as_deref());
    if amplitude.is_nan() || amplitude <= 0.0 {
        return;
    }
    let center = row.energy + req.params.energy_offset + channel_offset;
    req.profile
        .add_into(req.grid, out, center, amplitude, req.params.resolution, row.width);
}

fn add_assign(acc: &mut [f64], values: &[f64]) {
    for (a, v) in acc.iter_mut().zip(values) {
        *a += v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::interp::linspace;
    use crate::rates::RateTable;
    use crate::selection::Subject;
    use crate::transitions::{Shell, TransitionCategory, TransitionKind};

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

    fn selection(category: TransitionCategory, lines: Vec<RateLine>) -> SelectionSet {
        let table = RateTable::new("Fe", 26, lines).with_shake_probability(Shell::L1, 0.1, 0.05);
        SelectionSet::build(
            &[Subject::new("Fe", table)],
            &[TransitionKind::radiative(Shell::K, Shell::L3)],
            category,
        )
    }

    fn run(set: &SelectionSet, params: &SimulationParameters, weights: &BTreeMap<String, f64>) -> IntensityResult {
        let grid = linspace(6380.0, 6440.0, 301);
        let req = AggregateRequest {
            selection: set,
            profile: ProfileKind::Voigt,
            grid: &grid,
            params,
            efficiency: None,
            charge_state_weights: weights,
            components: &[],
        };
        y_calculator(&req)
    }

    fn params(set: &SelectionSet) -> SimulationParameters {
        SimulationParameters::from_config(&SimulationConfig::default(), set, &[])
    }

    #[test]
    fn test_components_sum_to_total() {
        let set = selection(
            TransitionCategory::DiagramSatellites,
            vec![
                row(LineCategory::Diagram, None, 6404.0, 1.0),
                row(LineCategory::ShakeOff, Some(Shell::L1), 6420.0, 0.2),
                row(LineCategory::ShakeUp, Some(Shell::L1), 6415.0, 0.1),
            ],
        );
        let r = run(&set, &params(&set), &BTreeMap::new());
        for j in 0..r.total.len() {
            let parts = r.per_line[0][j] + r.per_channel[0].iter().map(|c| c[j]).sum::<f64>() + r.extra[j];
            assert!((parts - r.total[j]).abs() < 1e-12);
            assert!((r.shake_off[j] + r.shake_up[j] - r.satellite[j]).abs() < 1e-12);
        }
        assert!(r.shake_off.iter().any(|v| *v > 0.0));
        assert!(r.shake_up.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn test_repeat_is_bit_identical() {
        let set = selection(
            TransitionCategory::Diagram,
            vec![row(LineCategory::Diagram, None, 6404.0, 1.0)],
        );
        let p = params(&set);
        let a = run(&set, &p, &BTreeMap::new());
        let b = run(&set, &p, &BTreeMap::new());
        assert_eq!(a, b);
    }

    #[test]
    fn test_negative_intensity_clamped() {
        let set = selection(
            TransitionCategory::Diagram,
            vec![row(LineCategory::Diagram, None, 6404.0, -1.0)],
        );
        let r = run(&set, &params(&set), &BTreeMap::new());
        assert!(r.total.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_shake_multiplier_scales_channel() {
        let set = selection(
            TransitionCategory::Satellites,
            vec![row(LineCategory::ShakeOff, Some(Shell::L1), 6420.0, 0.2)],
        );
        let mut p = params(&set);
        let base = run(&set, &p, &BTreeMap::new());
        p.shake_multipliers[0] = 2.0;
        let doubled = run(&set, &p, &BTreeMap::new());
        for (a, b) in base.total.iter().zip(&doubled.total) {
            assert!((2.0 * a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_charge_weights() {
        let mut weights = BTreeMap::new();
        assert_eq!(charge_weight(&weights, Some("Fe2+")), 1.0);
        weights.insert("Fe2+".to_string(), 0.3);
        assert_eq!(charge_weight(&weights, Some("Fe2+")), 0.3);
        assert_eq!(charge_weight(&weights, Some("Fe3+")), 0.0);
        assert_eq!(charge_weight(&weights, None), 1.0);
    }

    #[test]
    fn test_progress_called_per_transition() {
        let set = selection(
            TransitionCategory::Diagram,
            vec![row(LineCategory::Diagram, None, 6404.0, 1.0)],
        );
        let p = params(&set);
        let grid = linspace(6390.0, 6420.0, 11);
        let weights = BTreeMap::new();
        let req = AggregateRequest {
            selection: &set,
            profile: ProfileKind::Gaussian,
            grid: &grid,
            params: &p,
            efficiency: None,
            charge_state_weights: &weights,
            components: &[],
        };
        let mut seen = Vec::new();
        y_calculator_with_progress(&req, |p| seen.push((p.done, p.total)));
        assert_eq!(seen, vec![(1, 1)]);
    }
}
