use serde::{Deserialize, Serialize};

use crate::diagnostics::Warning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormalizationMode {
    #[default]
    None,
    Unity,
    ExperimentalMax,
}

/// Scale applied to the simulated total, and the offset added after it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Normalization {
    pub mode: NormalizationMode,
    pub scale: f64,
    pub y_offset: f64,
    pub sim_max: f64,
}

impl Normalization {
    pub fn apply(&self, total: &[f64]) -> Vec<f64> {
        total.iter().map(|t| t * self.scale + self.y_offset).collect()
    }
}

/// Multiplicative scale for `mode`.
///
/// A zero or non-finite `sim_max` yields 1, as does `ExperimentalMax`
/// without an experimental maximum.
pub fn normalizer(
    y_offset: f64,
    exp_max: Option<f64>,
    sim_max: f64,
    mode: NormalizationMode,
) -> Normalization {
    let degenerate = !sim_max.is_finite() || sim_max == 0.0;
    let scale = match mode {
        _ if degenerate => 1.0,
        NormalizationMode::None => 1.0,
        NormalizationMode::Unity => (1.0 - y_offset) / sim_max,
        NormalizationMode::ExperimentalMax => match exp_max {
            Some(m) if m.is_finite() => m * (1.0 - y_offset) / sim_max,
            _ => 1.0,
        },
    };
    Normalization {
        mode,
        scale,
        y_offset,
        sim_max,
    }
}

/// Downgrade `ExperimentalMax` to `None` when no experiment is loaded.
pub fn resolve_mode(
    mode: NormalizationMode,
    has_experiment: bool,
) -> (NormalizationMode, Option<Warning>) {
    if mode == NormalizationMode::ExperimentalMax && !has_experiment {
        return (
            NormalizationMode::None,
            Some(Warning::MissingExperimentalSpectrum {
                operation: "normalization to the experimental maximum".into(),
            }),
        );
    }
    (mode, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unity_round_trip() {
        let total = [0.0, 2.0, 4.0, 1.0];
        let n = normalizer(0.1, None, 4.0, NormalizationMode::Unity);
        let curve = n.apply(&total);
        let max = curve.iter().copied().fold(f64::MIN, f64::max);
        assert!((max - 1.0).abs() < 1e-15);
        assert!((curve[0] - 0.1).abs() < 1e-15);
    }

    #[test]
    fn test_experimental_max() {
        let n = normalizer(0.0, Some(500.0), 2.0, NormalizationMode::ExperimentalMax);
        assert_eq!(n.scale, 250.0);
    }

    #[test]
    fn test_degenerate_sim_max() {
        assert_eq!(normalizer(0.0, None, 0.0, NormalizationMode::Unity).scale, 1.0);
        assert_eq!(normalizer(0.0, Some(3.0), f64::NAN, NormalizationMode::ExperimentalMax).scale, 1.0);
        assert_eq!(normalizer(0.5, None, 7.0, NormalizationMode::None).scale, 1.0);
    }

    #[test]
    fn test_resolve_without_experiment() {
        let (mode, warning) = resolve_mode(NormalizationMode::ExperimentalMax, false);
        assert_eq!(mode, NormalizationMode::None);
        assert!(matches!(warning, Some(Warning::MissingExperimentalSpectrum { .. })));
        let (mode, warning) = resolve_mode(NormalizationMode::Unity, false);
        assert_eq!(mode, NormalizationMode::Unity);
        assert!(warning.is_none());
    }
}
