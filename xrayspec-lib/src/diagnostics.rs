use std::fmt;

use serde::Serialize;

/// A non-fatal condition surfaced to the user.
///
/// Every warning is also logged through `tracing` when it is raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Warning {
    /// Requested transitions with no rows in the rate data.
    UnavailableTransitions { count: usize, labels: Vec<String> },
    /// Nothing left to simulate; the grid is all zeros.
    NoValidTransitions { unavailable: usize },
    /// The grid edges crossed (`min >= max`); the grid is all zeros.
    InvertedBounds { min: f64, max: f64 },
    /// An operation needed an experimental spectrum and was downgraded.
    MissingExperimentalSpectrum { operation: String },
    /// The optimizer stopped before meeting its convergence criteria.
    NotConverged { method: String, message: String },
}

impl Warning {
    pub fn emit(&self) {
        tracing::warn!("{self}");
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnavailableTransitions { count, labels } => write!(
                f,
                "{count} transition(s) not available in the rate data: {}",
                labels.join(", ")
            ),
            Self::NoValidTransitions { unavailable } => write!(
                f,
                "no/invalid transition(s) to simulate ({unavailable} unavailable)"
            ),
            Self::InvertedBounds { min, max } => write!(
                f,
                "simulation range is empty: lower edge {min} is not below upper edge {max}"
            ),
            Self::MissingExperimentalSpectrum { operation } => {
                write!(f, "{operation} requires an experimental spectrum; skipped")
            }
            Self::NotConverged { method, message } => {
                write!(f, "{method} fit did not converge: {message}")
            }
        }
    }
}

/// Collects warnings raised during one pipeline pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Warnings(Vec<Warning>);

impl Warnings {
    pub fn push(&mut self, warning: Warning) {
        warning.emit();
        self.0.push(warning);
    }

    pub fn extend(&mut self, other: Warnings) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, pred: impl Fn(&Warning) -> bool) -> bool {
        self.0.iter().any(pred)
    }
}
