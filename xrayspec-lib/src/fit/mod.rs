//! Parameter fitting against an experimental spectrum.
//!
//! [`FitHarness`] builds a boxed [`ParameterSet`] from the simulation
//! context, wraps the pipeline in an [`Objective`] and hands both to a
//! [`FitBackend`]. Two backends are provided: [`LeastSquaresBackend`]
//! (Levenberg-Marquardt on residuals) and [`LikelihoodBackend`] (bounded
//! quasi-Newton on the Poisson deviance).

pub mod linalg;
pub mod lm;
pub mod minimizer;
mod objective;
pub mod report;

use std::fmt;

use serde::Serialize;

pub use objective::shake_constraint_ok;
use objective::SpectrumObjective;

use crate::components::FitWindow;
use crate::config::FitBackendKind;
use crate::constants::{OFFSET_CEILING_EV, OFFSET_SPAN_FRACTION, RESOLUTION_FLOOR, SHAKE_MULTIPLIER_FLOOR};
use crate::context::{Simulation, SimulationContext};
use crate::diagnostics::Warning;
use crate::error::{Result, XraySpecError};
use crate::normalize::NormalizationMode;
use crate::params::SimulationParameters;

use lm::{LevenbergMarquardt, LmConfig, NamedParameter, NamedParameters};
use minimizer::BoundedMinimizer;
use report::FitReport;

/// What a fit parameter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamName {
    EnergyOffset,
    SatelliteOffset,
    ShakeOffOffset,
    ShakeUpOffset,
    Resolution,
    YOffset,
    IntensityScale,
    /// Index into the selection's shake labels.
    ShakeAmplitude(usize),
    SubjectWeight(usize),
    Component { component: usize, index: usize },
}

impl ParamName {
    pub fn is_shake_amplitude(self) -> bool {
        matches!(self, Self::ShakeAmplitude(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: ParamName,
    pub label: String,
    pub value: f64,
    pub init: f64,
    pub min: f64,
    pub max: f64,
    pub vary: bool,
    pub stderr: Option<f64>,
}

impl Parameter {
    /// A varying parameter. Values on or outside the box are moved just
    /// inside it; values strictly inside are kept as given.
    pub fn new(name: ParamName, label: impl Into<String>, value: f64, min: f64, max: f64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let margin = 1e-3 * (max - min);
        let value = if max <= min {
            min
        } else if value <= min {
            min + margin
        } else if value >= max {
            max - margin
        } else {
            value
        };
        Self {
            name,
            label: label.into(),
            value,
            init: value,
            min,
            max,
            vary: max > min,
            stderr: None,
        }
    }

    pub fn fixed(mut self) -> Self {
        self.vary = false;
        self
    }
}

/// Ordered parameters of one fit run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    pub fn push(&mut self, param: Parameter) {
        self.params.push(param);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.params.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.label == label)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.label == label)
    }

    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    pub fn free_count(&self) -> usize {
        self.params.iter().filter(|p| p.vary).count()
    }

    pub fn free_labels(&self) -> Vec<String> {
        self.params
            .iter()
            .filter(|p| p.vary)
            .map(|p| p.label.clone())
            .collect()
    }

    /// Write `values` (one per parameter, in order) into `target`.
    pub fn apply(&self, values: &[f64], target: &mut SimulationParameters) {
        for (p, &v) in self.params.iter().zip(values) {
            match p.name {
                ParamName::EnergyOffset => target.energy_offset = v,
                ParamName::SatelliteOffset => target.satellite_offset = v,
                ParamName::ShakeOffOffset => target.shake_off_offset = v,
                ParamName::ShakeUpOffset => target.shake_up_offset = v,
                ParamName::Resolution => target.resolution = v,
                ParamName::YOffset => target.y_offset = v,
                ParamName::IntensityScale => target.intensity_scale = v,
                ParamName::ShakeAmplitude(i) => {
                    if let Some(m) = target.shake_multipliers.get_mut(i) {
                        *m = v;
                    }
                }
                ParamName::SubjectWeight(i) => {
                    if let Some(w) = target.subject_weights.get_mut(i) {
                        *w = v;
                    }
                }
                ParamName::Component { component, index } => {
                    if let Some(slot) = target
                        .component_values
                        .get_mut(component)
                        .and_then(|c| c.get_mut(index))
                    {
                        *slot = v;
                    }
                }
            }
        }
    }
}

/// Cost function seen by a backend. `values` always holds every
/// parameter of the set, fixed ones included.
pub trait Objective {
    /// Weighted residuals, constant length.
    fn residuals(&mut self, values: &[f64]) -> Vec<f64>;

    /// Poisson deviance.
    fn deviance(&mut self, values: &[f64]) -> f64;

    fn n_data(&self) -> usize;

    fn n_evaluations(&self) -> usize;
}

#[derive(Debug, Clone, Serialize)]
pub struct FitResult {
    pub method: &'static str,
    pub parameters: ParameterSet,
    /// Covariance of the varying parameters, in set order.
    pub covariance: Option<Vec<Vec<f64>>>,
    /// Chi-square for least squares, deviance for likelihood.
    pub cost: f64,
    pub n_data: usize,
    pub n_evaluations: usize,
    pub converged: bool,
    pub message: String,
}

impl FitResult {
    pub fn n_varying(&self) -> usize {
        self.parameters.free_count()
    }

    pub fn reduced_cost(&self) -> f64 {
        self.cost / self.n_data.saturating_sub(self.n_varying()).max(1) as f64
    }

    /// Akaike and Bayesian information criteria, lmfit convention.
    pub fn information_criteria(&self) -> (f64, f64) {
        let n = self.n_data.max(1) as f64;
        let k = self.n_varying() as f64;
        let neg2_log_like = n * (self.cost.max(f64::MIN_POSITIVE) / n).ln();
        (neg2_log_like + 2.0 * k, neg2_log_like + n.ln() * k)
    }

    pub fn correlation(&self) -> Option<Vec<Vec<f64>>> {
        let cov = self.covariance.as_ref()?;
        let n = cov.len();
        Some(
            (0..n)
                .map(|i| {
                    (0..n)
                        .map(|j| {
                            let d = (cov[i][i] * cov[j][j]).sqrt();
                            if d > 0.0 { cov[i][j] / d } else { 0.0 }
                        })
                        .collect()
                })
                .collect(),
        )
    }
}

pub trait FitBackend {
    fn name(&self) -> &'static str;

    fn minimize(&self, objective: &mut dyn Objective, params: &ParameterSet) -> Result<FitResult>;
}

/// Levenberg-Marquardt on the weighted residual vector.
#[derive(Debug, Clone, Default)]
pub struct LeastSquaresBackend {
    pub config: LmConfig,
}

impl LeastSquaresBackend {
    pub fn with_max_evaluations(max_evaluations: usize) -> Self {
        Self {
            config: LmConfig {
                max_evaluations,
                ..LmConfig::default()
            },
        }
    }
}

impl FitBackend for LeastSquaresBackend {
    fn name(&self) -> &'static str {
        "least_squares"
    }

    fn minimize(&self, objective: &mut dyn Objective, params: &ParameterSet) -> Result<FitResult> {
        if params.free_count() == 0 {
            return Err(XraySpecError::NoFreeParameters);
        }
        let mut named = NamedParameters::new();
        for p in params.iter() {
            let mut np = NamedParameter::new(p.label.clone(), p.value, p.min, p.max);
            np.vary = p.vary;
            named.add(np);
        }

        let lm = LevenbergMarquardt::new(self.config.clone());
        let outcome = lm.minimize(named, |np| objective.residuals(&np.values()));
        if !outcome.chi_square.is_finite() {
            return Err(XraySpecError::FitFailed(outcome.message));
        }

        let mut fitted = params.clone();
        for (p, np) in fitted.iter_mut().zip(outcome.params.iter()) {
            p.value = np.value;
            p.stderr = np.stderr;
        }
        Ok(FitResult {
            method: self.name(),
            parameters: fitted,
            covariance: outcome.covariance,
            cost: outcome.chi_square,
            n_data: outcome.n_data,
            n_evaluations: outcome.n_evaluations,
            converged: outcome.converged,
            message: outcome.message,
        })
    }
}

/// Bounded quasi-Newton minimization of the Poisson deviance.
#[derive(Debug, Clone, Default)]
pub struct LikelihoodBackend {
    pub minimizer: BoundedMinimizer,
}

impl LikelihoodBackend {
    pub fn with_max_evaluations(max_evaluations: usize) -> Self {
        Self {
            minimizer: BoundedMinimizer {
                max_evaluations,
                ..BoundedMinimizer::default()
            },
        }
    }
}

impl FitBackend for LikelihoodBackend {
    fn name(&self) -> &'static str {
        "likelihood"
    }

    fn minimize(&self, objective: &mut dyn Objective, params: &ParameterSet) -> Result<FitResult> {
        if params.free_count() == 0 {
            return Err(XraySpecError::NoFreeParameters);
        }
        let x0 = params.values();
        let names: Vec<String> = params.iter().map(|p| p.label.clone()).collect();
        let limits: Vec<(f64, f64)> = params.iter().map(|p| (p.min, p.max)).collect();
        let fixed: Vec<bool> = params.iter().map(|p| !p.vary).collect();
        let n_data = objective.n_data();

        let outcome = self
            .minimizer
            .minimize(|x| objective.deviance(x), &x0, &names, &limits, &fixed);
        if !outcome.fval.is_finite() {
            return Err(XraySpecError::FitFailed(outcome.message));
        }

        let has_covariance = outcome.covariance.is_some();
        let mut fitted = params.clone();
        for (i, p) in fitted.iter_mut().enumerate() {
            p.value = outcome.values[i];
            p.stderr = (p.vary && has_covariance).then_some(outcome.errors[i]);
        }
        Ok(FitResult {
            method: self.name(),
            parameters: fitted,
            covariance: outcome.covariance,
            cost: outcome.fval,
            n_data,
            n_evaluations: outcome.n_evaluations,
            converged: outcome.converged,
            message: outcome.message,
        })
    }
}

/// Backend selected by the configuration, `None` for `FitBackendKind::None`.
pub fn backend_for(kind: FitBackendKind, max_evaluations: usize) -> Option<Box<dyn FitBackend>> {
    match kind {
        FitBackendKind::None => None,
        FitBackendKind::LeastSquares => {
            Some(Box::new(LeastSquaresBackend::with_max_evaluations(max_evaluations)))
        }
        FitBackendKind::Likelihood => {
            Some(Box::new(LikelihoodBackend::with_max_evaluations(max_evaluations)))
        }
    }
}

/// Initial value and ceiling of the intensity scale.
///
/// The data/model peak ratio at the initial parameters sets the ceiling.
/// A configured scale more than a decade away from it is reseeded there.
fn intensity_scale_box(
    ctx: &SimulationContext<'_>,
    p: &SimulationParameters,
    exp_max: f64,
) -> (f64, f64) {
    let configured = p.intensity_scale;
    let sim_max = ctx.aggregate(ctx.grid(p), p).intensity.max();
    let ratio = exp_max / sim_max;
    if !(ratio.is_finite() && ratio > 0.0) {
        return (configured, 10.0 * configured.max(1.0));
    }
    let value = if configured >= 0.1 * ratio && configured <= 10.0 * ratio {
        configured
    } else {
        ratio
    };
    tracing::debug!(ratio, value, "seeded intensity scale");
    (value, 10.0 * value.max(ratio))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FitState {
    Idle,
    ParametersBuilt,
    Evaluating,
    Converged,
    Failed,
}

impl fmt::Display for FitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ParametersBuilt => "parameters built",
            Self::Evaluating => "evaluating",
            Self::Converged => "converged",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything a finished fit produces.
#[derive(Debug, Clone, Serialize)]
pub struct FitRun {
    pub result: FitResult,
    pub parameters: SimulationParameters,
    pub simulation: Simulation,
    pub report: FitReport,
}

pub struct FitHarness<'c, 'a> {
    context: &'c SimulationContext<'a>,
    state: FitState,
    parameters: Option<ParameterSet>,
}

impl<'c, 'a> FitHarness<'c, 'a> {
    pub fn new(context: &'c SimulationContext<'a>) -> Self {
        Self {
            context,
            state: FitState::Idle,
            parameters: None,
        }
    }

    pub fn state(&self) -> FitState {
        self.state
    }

    pub fn parameters(&self) -> Option<&ParameterSet> {
        self.parameters.as_ref()
    }

    /// Mutable access to the built parameters, e.g. to fix one.
    pub fn parameters_mut(&mut self) -> Option<&mut ParameterSet> {
        self.parameters.as_mut()
    }

    fn fail_without_experiment(&mut self) -> XraySpecError {
        self.state = FitState::Failed;
        Warning::MissingExperimentalSpectrum {
            operation: "fitting".into(),
        }
        .emit();
        self.state = FitState::Idle;
        self.parameters = None;
        XraySpecError::MissingExperimentalSpectrum
    }

    /// One boxed parameter per degree of freedom of the current context.
    pub fn build_parameters(&mut self) -> Result<&ParameterSet> {
        let ctx = self.context;
        let Some(exp) = ctx.experiment else {
            return Err(self.fail_without_experiment());
        };
        let p = ctx.initial_parameters();
        let config = ctx.config;
        let selection = ctx.selection;

        let (e_lo, e_hi) = exp.span();
        let span = e_hi - e_lo;
        let offset_delta = (OFFSET_SPAN_FRACTION * span).min(OFFSET_CEILING_EV).max(1e-6);
        let offset = |name: ParamName, label: &str, v: f64| {
            Parameter::new(name, label, v, v - offset_delta, v + offset_delta)
        };

        let mut set = ParameterSet::default();
        set.push(offset(ParamName::EnergyOffset, "energy_offset", p.energy_offset));
        if selection.category().includes_satellites() {
            if p.separate_satellite_offsets {
                set.push(offset(ParamName::ShakeOffOffset, "shake_off_offset", p.shake_off_offset));
                set.push(offset(ParamName::ShakeUpOffset, "shake_up_offset", p.shake_up_offset));
            } else {
                set.push(offset(ParamName::SatelliteOffset, "satellite_offset", p.satellite_offset));
            }
        }

        let res_max = (4.0 * p.resolution).max(2.0 * RESOLUTION_FLOOR);
        set.push(Parameter::new(
            ParamName::Resolution,
            "resolution",
            p.resolution,
            RESOLUTION_FLOOR,
            res_max,
        ));

        let unit = exp.unit(ctx.mode());
        let range = {
            let r = (exp.max_intensity() - exp.min_intensity()) / unit;
            if r.is_finite() && r > 0.0 { r } else { 1.0 }
        };
        set.push(Parameter::new(
            ParamName::YOffset,
            "y_offset",
            p.y_offset,
            p.y_offset - 0.05 * range,
            p.y_offset + 0.10 * range,
        ));

        if ctx.mode() == NormalizationMode::None {
            let (value, max) = intensity_scale_box(ctx, &p, exp.max_intensity());
            set.push(Parameter::new(
                ParamName::IntensityScale,
                "intensity_scale",
                value,
                0.0,
                max,
            ));
        }

        if config.fit_shake_amplitudes && selection.category().includes_satellites() {
            let probabilities = selection.shake_probabilities();
            let positive: Vec<f64> = probabilities.iter().copied().filter(|v| *v > 0.0).collect();
            let ceiling = if positive.is_empty() {
                1.0 / SHAKE_MULTIPLIER_FLOOR
            } else {
                let mean = positive.iter().sum::<f64>() / positive.len() as f64;
                (config.max_total_shake_probability / mean).max(1.0)
            };
            for (i, shell) in selection.shake_labels().iter().enumerate() {
                let init = p.shake_multiplier(i);
                set.push(Parameter::new(
                    ParamName::ShakeAmplitude(i),
                    format!("shake_amp_{shell}"),
                    init,
                    SHAKE_MULTIPLIER_FLOOR,
                    ceiling.max(2.0 * init),
                ));
            }
        }

        if selection.is_multi_subject() {
            for (i, subject) in selection.subjects().iter().enumerate() {
                set.push(Parameter::new(
                    ParamName::SubjectWeight(i),
                    format!("weight_{}", subject.label),
                    p.subject_weight(i),
                    0.0,
                    1.0,
                ));
            }
        }

        let window = FitWindow {
            energy_min: e_lo,
            energy_max: e_hi,
            intensity_max: exp.max_intensity() / unit,
        };
        for (c, component) in ctx.components.iter().enumerate() {
            for (index, cp) in component.parameters(&window).into_iter().enumerate() {
                let param = Parameter::new(
                    ParamName::Component { component: c, index },
                    cp.name,
                    cp.value,
                    cp.min,
                    cp.max,
                );
                set.push(if cp.vary { param } else { param.fixed() });
            }
        }

        tracing::debug!(
            parameters = set.len(),
            varying = set.free_count(),
            "built fit parameters"
        );
        self.state = FitState::ParametersBuilt;
        Ok(self.parameters.insert(set))
    }

    /// Run `backend` to convergence and re-run the pipeline once with the
    /// fitted values.
    pub fn run(&mut self, backend: &dyn FitBackend) -> Result<FitRun> {
        let ctx = self.context;
        let Some(exp) = ctx.experiment else {
            return Err(self.fail_without_experiment());
        };
        if self.parameters.is_none() {
            self.build_parameters()?;
        }
        let Some(params) = self.parameters.clone() else {
            return Err(XraySpecError::NoFreeParameters);
        };

        tracing::info!(
            method = backend.name(),
            varying = params.free_count(),
            points = exp.len(),
            "starting fit"
        );
        self.state = FitState::Evaluating;
        let base = ctx.initial_parameters();
        let result = {
            let mut objective = SpectrumObjective::new(ctx, exp, &params, base.clone());
            backend.minimize(&mut objective, &params)
        };
        let result = match result {
            Ok(r) => r,
            Err(e) => {
                self.state = FitState::Failed;
                return Err(e);
            }
        };

        let mut fitted = base;
        result.parameters.apply(&result.parameters.values(), &mut fitted);
        let mut simulation = ctx.run(&fitted, result.n_varying());
        if !result.converged {
            simulation.warnings.push(Warning::NotConverged {
                method: result.method.to_string(),
                message: result.message.clone(),
            });
        }
        let report = FitReport::render(&result, simulation.residues.as_ref());

        tracing::info!(
            method = result.method,
            cost = result.cost,
            n_evaluations = result.n_evaluations,
            converged = result.converged,
            "fit finished"
        );
        self.parameters = Some(result.parameters.clone());
        self.state = FitState::Converged;
        Ok(FitRun {
            result,
            parameters: fitted,
            simulation,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parameter_nudged_inside_box() {
        let p = Parameter::new(ParamName::Resolution, "resolution", 0.0, 0.01, 4.0);
        assert!(p.value > 0.01 && p.value < 4.0);
        assert_eq!(p.init, p.value);
        assert!(p.vary);

        let on_edge = Parameter::new(ParamName::ShakeAmplitude(0), "shake_amp_L1", 1.0, 0.1, 1.0);
        assert!(on_edge.value < 1.0);

        let inside = Parameter::new(ParamName::ShakeAmplitude(0), "shake_amp_L1", 1.0, 0.1, 1.0005);
        assert_eq!(inside.value, 1.0);

        let flat = Parameter::new(ParamName::YOffset, "y_offset", 3.0, 1.0, 1.0);
        assert!(!flat.vary);
        assert_eq!(flat.value, 1.0);
    }

    #[test]
    fn test_apply_routes_values() {
        let mut set = ParameterSet::default();
        set.push(Parameter::new(ParamName::EnergyOffset, "energy_offset", 0.0, -1.0, 1.0));
        set.push(Parameter::new(ParamName::ShakeAmplitude(1), "shake_amp_L1", 1.0, 0.1, 5.0));
        set.push(Parameter::new(
            ParamName::Component { component: 0, index: 1 },
            "compton_amplitude",
            1.0,
            0.0,
            10.0,
        ));
        let mut target = SimulationParameters {
            energy_offset: 0.0,
            satellite_offset: 0.0,
            shake_off_offset: 0.0,
            shake_up_offset: 0.0,
            separate_satellite_offsets: false,
            resolution: 1.0,
            y_offset: 0.0,
            intensity_scale: 1.0,
            shake_multipliers: vec![1.0, 1.0],
            subject_weights: vec![1.0],
            component_values: vec![vec![6000.0, 1.0]],
        };
        set.apply(&[0.25, 2.0, 4.5], &mut target);
        assert_eq!(target.energy_offset, 0.25);
        assert_eq!(target.shake_multipliers, vec![1.0, 2.0]);
        assert_eq!(target.component_values[0], vec![6000.0, 4.5]);
    }

    #[test]
    fn test_correlation_from_covariance() {
        let mut params = ParameterSet::default();
        params.push(Parameter::new(ParamName::EnergyOffset, "a", 0.0, -1.0, 1.0));
        params.push(Parameter::new(ParamName::Resolution, "b", 1.0, 0.1, 2.0));
        let result = FitResult {
            method: "least_squares",
            parameters: params,
            covariance: Some(vec![vec![4.0, 1.0], vec![1.0, 1.0]]),
            cost: 10.0,
            n_data: 12,
            n_evaluations: 5,
            converged: true,
            message: String::new(),
        };
        let corr = result.correlation().unwrap();
        assert_relative_eq!(corr[0][1], 0.5);
        assert_relative_eq!(corr[1][1], 1.0);
        assert_relative_eq!(result.reduced_cost(), 1.0);
    }

    #[test]
    fn test_backend_for_none() {
        assert!(backend_for(FitBackendKind::None, 10).is_none());
        let lm = backend_for(FitBackendKind::LeastSquares, 10).unwrap();
        assert_eq!(lm.name(), "least_squares");
    }
}
