//! Core error types for engine operations
//!
//! Script failures keep the exception's name, message and stack so the
//! runtime layer can render a full diagnostic without touching the engine
//! again.

use std::fmt;

use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// A script-level exception captured from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    /// Constructor name of the thrown value (`TypeError`, `SyntaxError`, ...)
    pub name: String,
    /// The exception message, or the stringified value for non-Error throws
    pub message: String,
    /// Stack trace as reported by the engine
    pub stack: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl ScriptError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            file: None,
            line: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        let stack = stack.into();
        if !stack.trim().is_empty() {
            self.stack = Some(stack);
        }
        self
    }

    pub fn with_location(mut self, file: Option<String>, line: Option<u32>) -> Self {
        self.file = file;
        self.line = line;
        self
    }

    /// Render the exception as `"<name>: <message>"` followed by the trace
    pub fn render(&self) -> String {
        let mut out = self.to_string();
        if let Some(stack) = &self.stack {
            out.push('\n');
            out.push_str(stack.trim_end());
        }
        out
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)?;
        match (&self.file, self.line) {
            (Some(file), Some(line)) if self.stack.is_none() => write!(f, " ({}:{})", file, line),
            _ => Ok(()),
        }
    }
}

/// Errors reported by an engine implementation
#[derive(Debug, Error)]
pub enum EngineError {
    /// Failed to allocate the engine runtime or context
    #[error("Context creation failed: {message}")]
    ContextCreation { message: String },

    /// The script threw
    #[error("{0}")]
    Script(ScriptError),

    /// The engine refused a serialized bytecode payload
    #[error("Bytecode error: {0}")]
    Bytecode(String),

    /// Host string could not be passed to the engine
    #[error("String encoding error: {0}")]
    StringEncoding(#[from] std::ffi::NulError),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create a script error from error name and message
    pub fn script_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Script(ScriptError::new(name, message))
    }

    /// Returns true for failures raised by script code
    pub fn is_script(&self) -> bool {
        matches!(self, Self::Script(_))
    }

    pub fn as_script(&self) -> Option<&ScriptError> {
        match self {
            Self::Script(error) => Some(error),
            _ => None,
        }
    }
}

impl From<ScriptError> for EngineError {
    fn from(error: ScriptError) -> Self {
        Self::Script(error)
    }
}
