//! Extra spectral components added on top of the transition lines.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{OFFSET_CEILING_EV, OFFSET_SPAN_FRACTION};
use crate::profiles::{ComptonShape, compton_peak_with_shape};

/// A fitted parameter owned by an extra component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentParameter {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub vary: bool,
}

/// What a component may know about the data it is fitted to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitWindow {
    pub energy_min: f64,
    pub energy_max: f64,
    pub intensity_max: f64,
}

impl FitWindow {
    pub fn span(&self) -> f64 {
        self.energy_max - self.energy_min
    }
}

/// Numeric contribution of a non-transition component (background,
/// scattering peak, ...). Only its values matter to the engine.
pub trait ExtraComponent: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Current parameter values, in the order `evaluate` expects them.
    fn values(&self) -> Vec<f64>;

    /// Parameters with their fit boxes.
    fn parameters(&self, window: &FitWindow) -> Vec<ComponentParameter>;

    fn evaluate(&self, grid: &[f64], values: &[f64], resolution: f64) -> Vec<f64>;

    /// Store fitted values.
    fn update(&mut self, values: &[f64]);
}

fn default_true() -> bool {
    true
}

/// Compton scattering peak with a fitted center and area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComptonBackground {
    pub center: f64,
    pub amplitude: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub shape: ComptonShape,
    #[serde(default = "default_true")]
    pub vary: bool,
}

impl ComptonBackground {
    pub fn new(center: f64, amplitude: f64) -> Self {
        Self {
            center,
            amplitude,
            width: 0.0,
            shape: ComptonShape::default(),
            vary: true,
        }
    }
}

impl ExtraComponent for ComptonBackground {
    fn name(&self) -> &str {
        "compton"
    }

    fn values(&self) -> Vec<f64> {
        vec![self.center, self.amplitude]
    }

    fn parameters(&self, window: &FitWindow) -> Vec<ComponentParameter> {
        let delta = (OFFSET_SPAN_FRACTION * window.span()).min(OFFSET_CEILING_EV);
        let area_ceiling = 10.0 * self.amplitude.max(window.intensity_max * window.span()).max(1.0);
        vec![
            ComponentParameter {
                name: "compton_center".into(),
                value: self.center,
                min: self.center - delta,
                max: self.center + delta,
                vary: self.vary,
            },
            ComponentParameter {
                name: "compton_amplitude".into(),
                value: self.amplitude,
                min: 0.0,
                max: area_ceiling,
                vary: self.vary,
            },
        ]
    }

    fn evaluate(&self, grid: &[f64], values: &[f64], resolution: f64) -> Vec<f64> {
        let center = values.first().copied().unwrap_or(self.center);
        let amplitude = values.get(1).copied().unwrap_or(self.amplitude).max(0.0);
        compton_peak_with_shape(grid, center, amplitude, resolution, self.width, self.shape)
    }

    fn update(&mut self, values: &[f64]) {
        if let [center, amplitude, ..] = values {
            self.center = *center;
            self.amplitude = *amplitude;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compton_parameters_boxed() {
        let c = ComptonBackground::new(6300.0, 2.0);
        let window = FitWindow {
            energy_min: 6200.0,
            energy_max: 6500.0,
            intensity_max: 10.0,
        };
        let params = c.parameters(&window);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].min, 6270.0);
        assert_eq!(params[0].max, 6330.0);
        assert_eq!(params[1].min, 0.0);
        assert!(params[1].max > 2.0);
    }

    #[test]
    fn test_compton_update_and_evaluate() {
        let mut c = ComptonBackground::new(100.0, 1.0);
        c.update(&[101.0, 3.0]);
        assert_eq!(c.values(), vec![101.0, 3.0]);
        let y = c.evaluate(&[101.0, 150.0], &c.values(), 2.0);
        assert!(y[0] > y[1]);
    }
}
