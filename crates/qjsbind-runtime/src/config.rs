//! Configuration types for engine contexts.

use qjsbind_core::EngineOptions;

/// Filename reported for scripts evaluated without one.
pub const DEFAULT_FILENAME: &str = "undefined.js";

/// Engine context configuration.
///
/// Controls engine resource limits and the names reported for ad hoc
/// evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Resource limits passed to the engine on creation.
    pub engine: EngineOptions,

    /// Filename used by `evaluate` and `compile` when none is given.
    /// Default: "undefined.js"
    pub default_filename: String,

    /// Module name used by `evaluate_module` when none is given.
    /// Default: "undefined.js"
    pub default_module_name: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            default_filename: DEFAULT_FILENAME.to_string(),
            default_module_name: DEFAULT_FILENAME.to_string(),
        }
    }
}

impl ContextConfig {
    /// Create a new context config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine heap limit in bytes.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.engine.memory_limit = Some(bytes);
        self
    }

    /// Set the engine's native stack limit in bytes.
    pub fn max_stack_size(mut self, bytes: usize) -> Self {
        self.engine.max_stack_size = Some(bytes);
        self
    }

    /// Set the GC threshold in bytes.
    pub fn gc_threshold(mut self, bytes: usize) -> Self {
        self.engine.gc_threshold = Some(bytes);
        self
    }

    /// Set the filename used when the caller omits one.
    pub fn default_filename(mut self, name: impl Into<String>) -> Self {
        self.default_filename = name.into();
        self
    }

    /// Set the module name used when the caller omits one.
    pub fn default_module_name(mut self, name: impl Into<String>) -> Self {
        self.default_module_name = name.into();
        self
    }
}
