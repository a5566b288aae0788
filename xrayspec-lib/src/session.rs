//! Owning front end for simulate/fit runs.

use crate::aggregate::AggregateProgress;
use crate::components::{ComptonBackground, ExtraComponent};
use crate::config::SimulationConfig;
use crate::context::{Simulation, SimulationContext};
use crate::efficiency::EfficiencyTable;
use crate::error::{Result, XraySpecError};
use crate::fit::{FitBackend, FitHarness, FitRun, backend_for};
use crate::residuals::ExperimentalSpectrum;
use crate::selection::{SelectionSet, Subject};
use crate::transitions::{LineCategory, TransitionKind};

/// Configuration, rate data and collaborator inputs of one analysis.
///
/// The selection is rebuilt whenever the requested transitions, the
/// category or the subjects change.
#[derive(Debug)]
pub struct Session {
    config: SimulationConfig,
    subjects: Vec<Subject>,
    experiment: Option<ExperimentalSpectrum>,
    efficiency: Option<EfficiencyTable>,
    components: Vec<Box<dyn ExtraComponent>>,
    /// Position of the configured Compton background in `components`.
    compton: Option<usize>,
    selection: SelectionSet,
}

impl Session {
    pub fn new(config: SimulationConfig, subjects: Vec<Subject>) -> Result<Self> {
        config.validate()?;
        if subjects.is_empty() {
            return Err(XraySpecError::InvalidConfig("no rate tables loaded".into()));
        }
        let mut components: Vec<Box<dyn ExtraComponent>> = Vec::new();
        let compton = config.compton_background.clone().map(|c| {
            components.push(Box::new(c));
            components.len() - 1
        });
        let mut session = Self {
            config,
            subjects,
            experiment: None,
            efficiency: None,
            components,
            compton,
            selection: SelectionSet::default(),
        };
        session.rebuild_selection()?;
        Ok(session)
    }

    fn rebuild_selection(&mut self) -> Result<()> {
        let category = self.config.transition_category;
        let requested = match self.config.transition_kinds()? {
            kinds if kinds.is_empty() => self.available_kinds(),
            kinds => kinds,
        };
        self.selection = SelectionSet::build(&self.subjects, &requested, category);
        Ok(())
    }

    /// Every transition with rows of the current category, in table order.
    fn available_kinds(&self) -> Vec<TransitionKind> {
        let category = self.config.transition_category;
        let wanted = |c: LineCategory| {
            if category.is_auger() {
                c == LineCategory::Auger
            } else {
                (category.includes_diagram() && c == LineCategory::Diagram)
                    || (category.includes_satellites() && c.is_satellite())
            }
        };
        let mut kinds: Vec<TransitionKind> = Vec::new();
        for subject in &self.subjects {
            for line in subject.rates.lines() {
                if wanted(line.category) && !kinds.contains(&line.kind) {
                    kinds.push(line.kind);
                }
            }
        }
        kinds
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Replace the configuration; validated before use.
    pub fn set_config(&mut self, config: SimulationConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        self.rebuild_selection()
    }

    pub fn set_transitions(&mut self, labels: Vec<String>) -> Result<()> {
        let previous = std::mem::replace(&mut self.config.transitions, labels);
        if let Err(e) = self.config.validate() {
            self.config.transitions = previous;
            return Err(e);
        }
        self.rebuild_selection()
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn experiment(&self) -> Option<&ExperimentalSpectrum> {
        self.experiment.as_ref()
    }

    pub fn set_experiment(&mut self, experiment: Option<ExperimentalSpectrum>) {
        self.experiment = experiment;
    }

    pub fn set_efficiency(&mut self, efficiency: Option<EfficiencyTable>) {
        self.efficiency = efficiency;
    }

    pub fn add_component(&mut self, component: Box<dyn ExtraComponent>) {
        self.components.push(component);
    }

    pub fn components(&self) -> &[Box<dyn ExtraComponent>] {
        &self.components
    }

    pub fn context(&self) -> SimulationContext<'_> {
        SimulationContext::new(
            &self.config,
            &self.selection,
            self.experiment.as_ref(),
            self.efficiency.as_ref(),
            &self.components,
        )
    }

    pub fn simulate(&self) -> Simulation {
        self.simulate_with_progress(|_| {})
    }

    pub fn simulate_with_progress(&self, progress: impl FnMut(AggregateProgress)) -> Simulation {
        let context = self.context();
        let params = context.initial_parameters();
        context.run_with_progress(&params, 0, progress)
    }

    /// Fit with the backend named in the configuration.
    pub fn fit(&mut self) -> Result<FitRun> {
        let backend = backend_for(self.config.fit_backend, self.config.max_evaluations)
            .ok_or_else(|| XraySpecError::InvalidConfig("fit_backend is None".into()))?;
        self.fit_with(backend.as_ref())
    }

    /// Fit with `backend` and write the fitted values back into the
    /// configuration, subjects and components.
    pub fn fit_with(&mut self, backend: &dyn FitBackend) -> Result<FitRun> {
        let run = {
            let context = self.context();
            let mut harness = FitHarness::new(&context);
            harness.run(backend)?
        };

        let fitted = &run.parameters;
        fitted.write_back(&mut self.config, &self.selection);
        for (component, values) in self.components.iter_mut().zip(&fitted.component_values) {
            component.update(values);
        }
        if let (Some(i), Some(cb)) = (self.compton, self.config.compton_background.as_mut()) {
            if let Some(values) = fitted.component_values.get(i) {
                ComptonBackground::update(cb, values);
            }
        }
        if self.selection.is_multi_subject() {
            for (subject, &w) in self.subjects.iter_mut().zip(&fitted.subject_weights) {
                subject.weight = w;
            }
            self.rebuild_selection()?;
        }
        Ok(run)
    }
}
