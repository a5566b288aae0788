use thiserror::Error;

#[derive(Debug, Error)]
pub enum XraySpecError {
    #[error("unknown shell label: {0}")]
    UnknownShell(String),
    #[error("unknown transition label: {0}")]
    UnknownTransition(String),
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid rate record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
    #[error("invalid spectrum: {0}")]
    InvalidSpectrum(String),
    #[error("no experimental spectrum loaded")]
    MissingExperimentalSpectrum,
    #[error("no parameters are free to vary")]
    NoFreeParameters,
    #[error("fit failed: {0}")]
    FitFailed(String),
    #[error("data error: {0}")]
    DataError(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, XraySpecError>;
