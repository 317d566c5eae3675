//! Engine error types

use thiserror::Error;

/// Errors that stop the engine.
///
/// Handler failures are never surfaced here; they go through the failure
/// reporter and the engine keeps serving.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Control channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JavaScript runtime error: {0}")]
    Runtime(String),

    #[error("Failed to install capability '{capability}': {message}")]
    Capability {
        capability: &'static str,
        message: String,
    },
}

impl EngineError {
    pub(crate) fn runtime(error: &rquickjs::Error) -> Self {
        Self::Runtime(error.to_string())
    }
}
