use serde::Serialize;

use crate::bounds::Offsets;
use crate::components::ExtraComponent;
use crate::config::SimulationConfig;
use crate::selection::SelectionSet;
use crate::transitions::LineCategory;

/// Numeric knobs of one pipeline evaluation.
///
/// Seeded from the configuration, overwritten by trial values during a
/// fit and written back once the fit converges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationParameters {
    pub energy_offset: f64,
    pub satellite_offset: f64,
    pub shake_off_offset: f64,
    pub shake_up_offset: f64,
    pub separate_satellite_offsets: bool,
    pub resolution: f64,
    pub y_offset: f64,
    pub intensity_scale: f64,
    /// One multiplier per entry of [`SelectionSet::shake_labels`].
    pub shake_multipliers: Vec<f64>,
    /// One weight per subject.
    pub subject_weights: Vec<f64>,
    /// Parameter values of each extra component.
    pub component_values: Vec<Vec<f64>>,
}

impl SimulationParameters {
    pub fn from_config(
        config: &SimulationConfig,
        selection: &SelectionSet,
        components: &[Box<dyn ExtraComponent>],
    ) -> Self {
        Self {
            energy_offset: config.energy_offset,
            satellite_offset: config.satellite_offset,
            shake_off_offset: config.shake_off_offset,
            shake_up_offset: config.shake_up_offset,
            separate_satellite_offsets: config.use_separate_satellite_offsets,
            resolution: config.resolution,
            y_offset: config.y_offset,
            intensity_scale: config.intensity_scale,
            shake_multipliers: selection
                .shake_labels()
                .iter()
                .map(|shell| config.shake_amplitudes.get(shell.as_str()).copied().unwrap_or(1.0))
                .collect(),
            subject_weights: selection.subjects().iter().map(|s| s.weight).collect(),
            component_values: components.iter().map(|c| c.values()).collect(),
        }
    }

    pub fn offsets(&self) -> Offsets {
        Offsets {
            energy: self.energy_offset,
            satellite: self.satellite_offset,
            shake_off: self.shake_off_offset,
            shake_up: self.shake_up_offset,
            separate: self.separate_satellite_offsets,
        }
    }

    /// Offset added on top of `energy_offset` for rows of `category`.
    pub fn channel_offset(&self, category: LineCategory) -> f64 {
        match category {
            LineCategory::ShakeOff if self.separate_satellite_offsets => self.shake_off_offset,
            LineCategory::ShakeUp if self.separate_satellite_offsets => self.shake_up_offset,
            LineCategory::ShakeOff | LineCategory::ShakeUp => self.satellite_offset,
            LineCategory::Diagram | LineCategory::Auger => 0.0,
        }
    }

    pub fn shake_multiplier(&self, index: usize) -> f64 {
        self.shake_multipliers.get(index).copied().unwrap_or(1.0)
    }

    pub fn subject_weight(&self, index: usize) -> f64 {
        self.subject_weights.get(index).copied().unwrap_or(1.0)
    }

    /// Copy the configuration-backed values into `config`. Shake
    /// multipliers are stored under the spectator labels of `selection`.
    pub fn write_back(&self, config: &mut SimulationConfig, selection: &SelectionSet) {
        for (shell, &m) in selection.shake_labels().iter().zip(&self.shake_multipliers) {
            if m != 1.0 || config.shake_amplitudes.contains_key(shell.as_str()) {
                config.shake_amplitudes.insert(shell.to_string(), m);
            }
        }
        config.energy_offset = self.energy_offset;
        config.satellite_offset = self.satellite_offset;
        config.shake_off_offset = self.shake_off_offset;
        config.shake_up_offset = self.shake_up_offset;
        config.resolution = self.resolution;
        config.y_offset = self.y_offset;
        config.intensity_scale = self.intensity_scale;
    }
}
