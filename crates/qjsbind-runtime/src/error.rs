//! Error types for qjsbind-runtime
//!
//! Re-exports core errors from qjsbind-core and adds binding-layer errors.
//! Script failures absorbed by the exception bridge never show up here.

use thiserror::Error;

use crate::bytecode::BytecodeError;

// Re-export core error types
pub use qjsbind_core::{EngineError as CoreError, EngineResult as CoreResult, ScriptError};

/// Errors that can occur during binding-layer operations
#[derive(Error, Debug)]
pub enum Error {
    /// Core engine error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A deferred job failed while draining the job queue
    #[error("Pending job failed with status {status}: {message}")]
    JobLoop { status: i32, message: String },

    /// Bytecode could not be executed
    #[error("Bytecode rejected: {0}")]
    Bytecode(#[from] BytecodeError),

    /// The value has no JSON representation
    #[error("Value is not serializable to JSON")]
    NotSerializable,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Core(CoreError::Internal(message.into()))
    }

    /// Returns true if this error came from draining the job queue
    pub fn is_job_loop(&self) -> bool {
        matches!(self, Self::JobLoop { .. })
    }
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;
