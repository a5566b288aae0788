pub mod aggregate;
pub mod bounds;
pub mod components;
pub mod config;
pub mod constants;
pub mod context;
pub mod diagnostics;
pub mod efficiency;
pub mod error;
pub mod fit;
pub mod interp;
pub mod normalize;
pub mod params;
pub mod profiles;
pub mod rates;
pub mod residuals;
pub mod selection;
pub mod session;
pub mod special;
pub mod spline;
pub mod transitions;

pub use aggregate::{IntensityResult, y_calculator};
pub use bounds::{Bound, SimulationGrid, calculate_xfinal};
pub use components::{ComptonBackground, ExtraComponent};
pub use config::{FitBackendKind, SimulationConfig};
pub use context::{Simulation, SimulationContext};
pub use diagnostics::{Warning, Warnings};
pub use efficiency::EfficiencyTable;
pub use error::{Result, XraySpecError};
pub use fit::{FitBackend, FitHarness, FitResult, FitRun, LeastSquaresBackend, LikelihoodBackend};
pub use normalize::{Normalization, NormalizationMode};
pub use params::SimulationParameters;
pub use profiles::ProfileKind;
pub use rates::RateTable;
pub use residuals::{ExperimentalSpectrum, Residues};
pub use selection::{SelectionSet, Subject};
pub use session::Session;
pub use transitions::{LineCategory, RateLine, Shell, TransitionCategory, TransitionKind};
pub use xrayspec_data;
