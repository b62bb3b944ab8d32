use thiserror::Error;

use crate::common::error::ScaleError::GenericError;
use crate::scheduler::Arch;

#[derive(Debug, Error)]
pub enum ScaleError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    /// The scheduler reported an architecture this tool does not know about.
    /// Treated as fatal: miscounting slots silently is worse than failing.
    #[error("Scheduler reported an unexpected architecture {0:?}")]
    UnexpectedArchitecture(String),
    /// No worker image is configured for the architecture, so a scale-up
    /// cannot be performed for it.
    #[error("No worker image configured for architecture {0}")]
    UnsupportedArchitecture(Arch),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for ScaleError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::DeserializationError(e.to_string())
    }
}

impl From<anyhow::Error> for ScaleError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<String> for ScaleError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}
