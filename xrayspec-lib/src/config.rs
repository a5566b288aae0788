//! JSON run configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bounds::Bound;
use crate::components::ComptonBackground;
use crate::constants::DEFAULT_MAX_TOTAL_SHAKE_PROBABILITY;
use crate::error::{Result, XraySpecError};
use crate::normalize::NormalizationMode;
use crate::profiles::ProfileKind;
use crate::transitions::{Shell, TransitionCategory, TransitionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FitBackendKind {
    #[default]
    None,
    LeastSquares,
    Likelihood,
}

fn one() -> f64 {
    1.0
}

fn default_max_shake() -> f64 {
    DEFAULT_MAX_TOTAL_SHAKE_PROBABILITY
}

fn default_max_evaluations() -> usize {
    2000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    pub transition_category: TransitionCategory,
    pub profile_kind: ProfileKind,
    pub normalization_mode: NormalizationMode,
    pub fit_backend: FitBackendKind,
    pub n_points: usize,
    pub x_min: Bound,
    pub x_max: Bound,
    pub energy_offset: f64,
    #[serde(default)]
    pub satellite_offset: f64,
    #[serde(default)]
    pub shake_off_offset: f64,
    #[serde(default)]
    pub shake_up_offset: f64,
    #[serde(default)]
    pub use_separate_satellite_offsets: bool,
    pub resolution: f64,
    pub y_offset: f64,
    #[serde(default = "one")]
    pub intensity_scale: f64,
    /// Siegbahn or IUPAC labels, e.g. `"Kα1"` or `"KL2L3"`.
    #[serde(default)]
    pub transitions: Vec<String>,
    #[serde(default)]
    pub charge_state_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub fit_shake_amplitudes: bool,
    /// Shake amplitude multiplier per spectator shell label, e.g. `"L1"`.
    /// Shells not listed use 1.
    #[serde(default)]
    pub shake_amplitudes: BTreeMap<String, f64>,
    #[serde(default = "default_max_shake")]
    pub max_total_shake_probability: f64,
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: usize,
    #[serde(default)]
    pub compton_background: Option<ComptonBackground>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            transition_category: TransitionCategory::Diagram,
            profile_kind: ProfileKind::Voigt,
            normalization_mode: NormalizationMode::None,
            fit_backend: FitBackendKind::None,
            n_points: 1000,
            x_min: Bound::Auto,
            x_max: Bound::Auto,
            energy_offset: 0.0,
            satellite_offset: 0.0,
            shake_off_offset: 0.0,
            shake_up_offset: 0.0,
            use_separate_satellite_offsets: false,
            resolution: 1.0,
            y_offset: 0.0,
            intensity_scale: 1.0,
            transitions: Vec::new(),
            charge_state_weights: BTreeMap::new(),
            fit_shake_amplitudes: false,
            shake_amplitudes: BTreeMap::new(),
            max_total_shake_probability: DEFAULT_MAX_TOTAL_SHAKE_PROBABILITY,
            max_evaluations: default_max_evaluations(),
            compton_background: None,
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(XraySpecError::InvalidConfig(msg));

        if self.n_points < 2 {
            return invalid(format!("n_points must be at least 2, got {}", self.n_points));
        }
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return invalid(format!("resolution must be positive, got {}", self.resolution));
        }
        for (name, v) in [
            ("energy_offset", self.energy_offset),
            ("satellite_offset", self.satellite_offset),
            ("shake_off_offset", self.shake_off_offset),
            ("shake_up_offset", self.shake_up_offset),
            ("y_offset", self.y_offset),
            ("intensity_scale", self.intensity_scale),
        ] {
            if !v.is_finite() {
                return invalid(format!("{name} must be finite, got {v}"));
            }
        }
        if self.intensity_scale < 0.0 {
            return invalid(format!(
                "intensity_scale must be non-negative, got {}",
                self.intensity_scale
            ));
        }
        if self.normalization_mode != NormalizationMode::None && self.y_offset >= 1.0 {
            return invalid(format!(
                "y_offset must be below 1 when normalizing, got {}",
                self.y_offset
            ));
        }
        if let (Bound::Value(lo), Bound::Value(hi)) = (self.x_min, self.x_max) {
            if lo >= hi {
                return invalid(format!("x_min ({lo}) must be below x_max ({hi})"));
            }
        }
        if !(self.max_total_shake_probability > 0.0 && self.max_total_shake_probability <= 1.0) {
            return invalid(format!(
                "max_total_shake_probability must be in (0, 1], got {}",
                self.max_total_shake_probability
            ));
        }
        if self.max_evaluations == 0 {
            return invalid("max_evaluations must be positive".into());
        }
        if let Some((tag, w)) = self
            .charge_state_weights
            .iter()
            .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
        {
            return invalid(format!("charge-state weight for {tag} must be non-negative, got {w}"));
        }
        if let Some((shell, m)) = self
            .shake_amplitudes
            .iter()
            .find(|(_, m)| !(m.is_finite() && **m > 0.0))
        {
            return invalid(format!("shake amplitude for {shell} must be positive, got {m}"));
        }
        for shell in self.shake_amplitudes.keys() {
            shell.parse::<Shell>()?;
        }
        if self.transition_category.is_auger() {
            if let Some(label) = self
                .transition_kinds()?
                .iter()
                .find(|k| !k.is_auger())
            {
                return invalid(format!("{label} is not an Auger transition"));
            }
        } else {
            self.transition_kinds()?;
        }
        Ok(())
    }

    /// Parsed transition labels.
    pub fn transition_kinds(&self) -> Result<Vec<TransitionKind>> {
        self.transitions.iter().map(|s| s.parse()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "transition_category": "Diagram",
        "profile_kind": "Lorentzian",
        "normalization_mode": "Unity",
        "fit_backend": "LeastSquares",
        "n_points": 500,
        "x_min": "Auto",
        "x_max": 6420.0,
        "energy_offset": 0.5,
        "resolution": 1.0,
        "y_offset": 0.0,
        "transitions": ["Kα1", "K-L2"]
    }"#;

    #[test]
    fn test_parse_minimal() {
        let c = SimulationConfig::from_json_str(MINIMAL).unwrap();
        assert_eq!(c.profile_kind, ProfileKind::Lorentzian);
        assert_eq!(c.x_min, Bound::Auto);
        assert_eq!(c.x_max, Bound::Value(6420.0));
        assert_eq!(c.intensity_scale, 1.0);
        assert_eq!(c.transition_kinds().unwrap().len(), 2);
        assert_eq!(c.max_total_shake_probability, DEFAULT_MAX_TOTAL_SHAKE_PROBABILITY);
    }

    #[test]
    fn test_missing_key_fails() {
        let text = MINIMAL.replace("\"resolution\": 1.0,", "");
        assert!(matches!(
            SimulationConfig::from_json_str(&text),
            Err(XraySpecError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_variant_fails() {
        let text = MINIMAL.replace("\"Lorentzian\"", "\"Pearson\"");
        assert!(SimulationConfig::from_json_str(&text).is_err());
    }

    #[test]
    fn test_invalid_values() {
        let text = MINIMAL.replace("\"n_points\": 500", "\"n_points\": 1");
        assert!(matches!(
            SimulationConfig::from_json_str(&text),
            Err(XraySpecError::InvalidConfig(_))
        ));
        let text = MINIMAL.replace("\"resolution\": 1.0", "\"resolution\": 0.0");
        assert!(SimulationConfig::from_json_str(&text).is_err());
        let text = MINIMAL.replace("\"K-L2\"", "\"Kz9\"");
        assert!(matches!(
            SimulationConfig::from_json_str(&text),
            Err(XraySpecError::UnknownTransition(_))
        ));
    }

    #[test]
    fn test_shake_amplitudes() {
        let c = SimulationConfig::from_json_str(MINIMAL).unwrap();
        assert!(c.shake_amplitudes.is_empty());

        let text = MINIMAL.replace("\"y_offset\": 0.0,", "\"y_offset\": 0.0, \"shake_amplitudes\": {\"L1\": 2.5},");
        let c = SimulationConfig::from_json_str(&text).unwrap();
        assert_eq!(c.shake_amplitudes.get("L1"), Some(&2.5));

        let text = MINIMAL.replace("\"y_offset\": 0.0,", "\"y_offset\": 0.0, \"shake_amplitudes\": {\"L1\": 0.0},");
        assert!(SimulationConfig::from_json_str(&text).is_err());
        let text = MINIMAL.replace("\"y_offset\": 0.0,", "\"y_offset\": 0.0, \"shake_amplitudes\": {\"Z9\": 1.0},");
        assert!(SimulationConfig::from_json_str(&text).is_err());
    }

    #[test]
    fn test_round_trip_through_json() {
        let c = SimulationConfig::from_json_str(MINIMAL).unwrap();
        let again = SimulationConfig::from_json_str(&c.to_json_string().unwrap()).unwrap();
        assert_eq!(c, again);
    }
}
