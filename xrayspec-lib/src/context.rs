//! One evaluation of the synthesis pipeline as explicit stages.
//!
//! A [`SimulationContext`] borrows everything that stays fixed across
//! evaluations; each stage consumes the previous snapshot and the trial
//! [`SimulationParameters`], so nothing is shared between evaluations.

use serde::Serialize;

use crate::aggregate::{AggregateProgress, AggregateRequest, IntensityResult, y_calculator_with_progress};
use crate::bounds::{BoundsRequest, LineGroup, SimulationGrid, SubjectLines, calculate_xfinal};
use crate::components::ExtraComponent;
use crate::config::SimulationConfig;
use crate::diagnostics::{Warning, Warnings};
use crate::efficiency::EfficiencyTable;
use crate::normalize::{Normalization, NormalizationMode, normalizer, resolve_mode};
use crate::params::SimulationParameters;
use crate::residuals::{ExperimentalSpectrum, Residues, calculate_residues};
use crate::selection::SelectionSet;

pub struct SimulationContext<'a> {
    pub config: &'a SimulationConfig,
    pub selection: &'a SelectionSet,
    pub experiment: Option<&'a ExperimentalSpectrum>,
    pub efficiency: Option<&'a EfficiencyTable>,
    pub components: &'a [Box<dyn ExtraComponent>],
    mode: NormalizationMode,
    subject_lines: Vec<SubjectLines>,
    warnings: Warnings,
}

#[derive(Debug, Clone)]
pub struct GridStage {
    pub grid: SimulationGrid,
}

#[derive(Debug, Clone)]
pub struct AggregateStage {
    pub grid: SimulationGrid,
    pub intensity: IntensityResult,
}

#[derive(Debug, Clone)]
pub struct NormalizedStage {
    pub grid: SimulationGrid,
    pub intensity: IntensityResult,
    pub normalization: Normalization,
}

impl NormalizedStage {
    /// `total·scale + y_offset`
    pub fn curve(&self) -> Vec<f64> {
        self.normalization.apply(&self.intensity.total)
    }
}

/// Definitive output of one pipeline pass.
#[derive(Debug, Clone, Serialize)]
pub struct Simulation {
    pub grid: SimulationGrid,
    pub intensity: IntensityResult,
    pub normalization: Normalization,
    pub curve: Vec<f64>,
    pub residues: Option<Residues>,
    pub parameters: SimulationParameters,
    pub warnings: Warnings,
}

impl<'a> SimulationContext<'a> {
    /// Resolve the normalization policy and collect the setup warnings.
    pub fn new(
        config: &'a SimulationConfig,
        selection: &'a SelectionSet,
        experiment: Option<&'a ExperimentalSpectrum>,
        efficiency: Option<&'a EfficiencyTable>,
        components: &'a [Box<dyn ExtraComponent>],
    ) -> Self {
        let mut warnings = Warnings::default();
        if let Some(w) = selection.warning() {
            warnings.push(w);
        }
        let (mode, w) = resolve_mode(config.normalization_mode, experiment.is_some());
        if let Some(w) = w {
            warnings.push(w);
        }

        let mut subject_lines = vec![SubjectLines::default(); selection.subjects().len().max(1)];
        for t in selection.iter() {
            let lines = &mut subject_lines[t.subject];
            if !t.lines.is_empty() {
                lines.diagram.push(LineGroup {
                    energies: t.lines.iter().map(|l| l.energy).collect(),
                    widths: t.lines.iter().map(|l| l.width).collect(),
                });
            }
            for c in t.channels.iter().filter(|c| !c.rows.is_empty()) {
                lines.satellite.push(LineGroup {
                    energies: c.rows.iter().map(|l| l.energy).collect(),
                    widths: c.rows.iter().map(|l| l.width).collect(),
                });
            }
        }

        Self {
            config,
            selection,
            experiment,
            efficiency,
            components,
            mode,
            subject_lines,
            warnings,
        }
    }

    /// Normalization policy in effect after downgrades.
    pub fn mode(&self) -> NormalizationMode {
        self.mode
    }

    pub fn warnings(&self) -> &Warnings {
        &self.warnings
    }

    pub fn initial_parameters(&self) -> SimulationParameters {
        SimulationParameters::from_config(self.config, self.selection, self.components)
    }

    pub fn grid(&self, params: &SimulationParameters) -> GridStage {
        let req = BoundsRequest {
            category: self.selection.category(),
            subjects: &self.subject_lines,
            x_min: self.config.x_min,
            x_max: self.config.x_max,
            resolution: params.resolution,
            offsets: params.offsets(),
            n_points: self.config.n_points,
            unavailable: self.selection.unavailable_count(),
            experimental_span: self.experiment.map(|e| e.span()),
        };
        GridStage {
            grid: calculate_xfinal(&req),
        }
    }

    pub fn aggregate(&self, stage: GridStage, params: &SimulationParameters) -> AggregateStage {
        self.aggregate_with_progress(stage, params, |_| {})
    }

    pub fn aggregate_with_progress(
        &self,
        stage: GridStage,
        params: &SimulationParameters,
        progress: impl FnMut(AggregateProgress),
    ) -> AggregateStage {
        let req = AggregateRequest {
            selection: self.selection,
            profile: self.config.profile_kind,
            grid: &stage.grid.points,
            params,
            efficiency: self.efficiency,
            charge_state_weights: &self.config.charge_state_weights,
            components: self.components,
        };
        let intensity = y_calculator_with_progress(&req, progress);
        AggregateStage {
            grid: stage.grid,
            intensity,
        }
    }

    /// The intensity scale multiplies the total before the policy scale is
    /// computed, so it cancels under `Unity` and `ExperimentalMax`.
    pub fn normalize(&self, stage: AggregateStage, params: &SimulationParameters) -> NormalizedStage {
        let intensity_scale = params.intensity_scale.max(0.0);
        let sim_max = stage.intensity.max() * intensity_scale;
        let exp_max = self.experiment.map(|e| e.max_intensity());
        let mut normalization = normalizer(params.y_offset, exp_max, sim_max, self.mode);
        normalization.scale *= intensity_scale;
        NormalizedStage {
            grid: stage.grid,
            intensity: stage.intensity,
            normalization,
        }
    }

    pub fn residues(&self, stage: &NormalizedStage, n_fit_params: usize) -> Option<Residues> {
        let exp = self.experiment?;
        Some(calculate_residues(
            exp,
            &stage.grid.points,
            &stage.intensity.total,
            &stage.normalization,
            n_fit_params,
        ))
    }

    pub fn run(&self, params: &SimulationParameters, n_fit_params: usize) -> Simulation {
        self.run_with_progress(params, n_fit_params, |_| {})
    }

    pub fn run_with_progress(
        &self,
        params: &SimulationParameters,
        n_fit_params: usize,
        progress: impl FnMut(AggregateProgress),
    ) -> Simulation {
        let mut warnings = self.warnings.clone();
        let grid = self.grid(params);
        if grid.grid.is_degenerate() {
            warnings.push(match grid.grid.inverted {
                Some((min, max)) => Warning::InvertedBounds { min, max },
                None => Warning::NoValidTransitions {
                    unavailable: self.selection.unavailable_count(),
                },
            });
        }
        let aggregated = self.aggregate_with_progress(grid, params, progress);
        let normalized = self.normalize(aggregated, params);
        let residues = self.residues(&normalized, n_fit_params);
        let curve = normalized.curve();

        if let Some(r) = &residues {
            tracing::debug!(
                reduced_chi_square = r.reduced_chi_square,
                points = r.residuals.len(),
                "compared against experiment"
            );
        }

        Simulation {
            grid: normalized.grid,
            intensity: normalized.intensity,
            normalization: normalized.normalization,
            curve,
            residues,
            parameters: params.clone(),
            warnings,
        }
    }
}
