//! Engine tuning options
//!
//! Resource limits applied to the engine runtime when it is created.

/// Resource limits for a new engine instance.
///
/// `None` leaves the engine's built-in default in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum heap size in bytes
    pub memory_limit: Option<usize>,

    /// Maximum native stack the interpreter may use, in bytes
    pub max_stack_size: Option<usize>,

    /// Allocation volume (bytes) that triggers a cycle collection
    pub gc_threshold: Option<usize>,
}

impl EngineOptions {
    /// Create options with engine defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heap limit in bytes.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set the native stack limit in bytes.
    pub fn max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    /// Set the GC threshold in bytes.
    pub fn gc_threshold(mut self, bytes: usize) -> Self {
        self.gc_threshold = Some(bytes);
        self
    }
}
