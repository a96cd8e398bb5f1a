//! The engine collaborator surface
//!
//! Everything the binding layer needs from a script engine goes through
//! [`Engine`]. Values are opaque, copyable pointers whose lifetime is governed
//! by the engine's own reference counts: every operation that returns a value
//! hands the caller exactly one reference, which must eventually be given back
//! with [`Engine::free_value`].

use crate::error::{EngineError, EngineResult, ScriptError};

/// How a source text should be evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    /// Classic global script
    Script,
    /// ES module
    Module,
}

/// Classification of a non-primitive engine value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Object,
    Array,
    Function,
}

/// A primitive value, copied out of (or into) the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Float(f64),
    String(String),
}

/// What [`Engine::inspect`] found behind a value pointer
#[derive(Debug, Clone, PartialEq)]
pub enum Inspected {
    Primitive(Primitive),
    Object(ObjectKind),
}

/// Fixed operation set of an embedded script engine.
///
/// Implementations are single-threaded; the binding layer serializes all
/// calls. Creation and destruction of the engine instance are the
/// implementation's constructor and `Drop`.
pub trait Engine {
    /// Opaque engine value pointer
    type Value: Copy;

    /// Identifies the engine build that produces and consumes bytecode
    fn build_id() -> &'static str;

    /// Evaluate source text. Returns one reference to the completion value.
    fn evaluate(
        &mut self,
        source: &str,
        filename: &str,
        kind: EvalKind,
    ) -> EngineResult<Self::Value>;

    /// New reference to the global object
    fn global_object(&mut self) -> Self::Value;

    fn get_property(&mut self, object: Self::Value, name: &str) -> EngineResult<Self::Value>;

    /// Set `object[name] = value`. Consumes the reference held by `value`,
    /// even on failure.
    fn set_property(
        &mut self,
        object: Self::Value,
        name: &str,
        value: Self::Value,
    ) -> EngineResult<()>;

    /// `JSON.stringify(value)`; `None` when the result is `undefined`
    fn stringify(&mut self, value: Self::Value) -> EngineResult<Option<String>>;

    fn array_length(&mut self, array: Self::Value) -> EngineResult<u32>;

    fn array_get(&mut self, array: Self::Value, index: u32) -> EngineResult<Self::Value>;

    /// Invoke `function`. Arguments are borrowed, not consumed.
    fn call(
        &mut self,
        function: Self::Value,
        this: Option<Self::Value>,
        args: &[Self::Value],
    ) -> EngineResult<Self::Value>;

    /// Add one reference to `value`, returning the same pointer
    fn duplicate(&mut self, value: Self::Value) -> Self::Value;

    /// Drop one reference; the engine reclaims the value at zero
    fn free_value(&mut self, value: Self::Value);

    fn parse_json(&mut self, text: &str) -> EngineResult<Self::Value>;

    /// Compile a global script to the engine's serialized bytecode
    fn compile(&mut self, source: &str, filename: &str) -> EngineResult<Vec<u8>>;

    /// Run serialized bytecode produced by [`Engine::compile`] on the same build.
    /// Payloads the engine cannot read fail with [`EngineError::Bytecode`].
    fn execute(&mut self, bytecode: &[u8]) -> EngineResult<Self::Value>;

    /// Run one deferred job: positive when a job ran, zero when the queue is
    /// empty, negative when the job failed irrecoverably.
    fn execute_pending_job(&mut self) -> i32;

    /// Description of the last failed job, if the engine kept one
    fn take_job_error(&mut self) -> Option<EngineError> {
        None
    }

    /// Rejection reason of `value` when it is a promise that has already been
    /// rejected. Engines without promise introspection report nothing.
    fn rejection(&mut self, _value: Self::Value) -> Option<ScriptError> {
        None
    }

    /// Classify `value` without consuming it, copying out primitives
    fn inspect(&mut self, value: Self::Value) -> EngineResult<Inspected>;

    /// Create a new engine value holding `primitive`
    fn make_primitive(&mut self, primitive: &Primitive) -> EngineResult<Self::Value>;
}

impl Primitive {
    /// Name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::String(_) => "string",
        }
    }
}

impl Inspected {
    /// Expect an object of any kind
    pub fn object_kind(&self) -> EngineResult<ObjectKind> {
        match self {
            Self::Object(kind) => Ok(*kind),
            Self::Primitive(p) => Err(EngineError::Internal(format!(
                "expected object, got {}",
                p.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_type_names() {
        assert_eq!(Primitive::Int(1).type_name(), "number");
        assert_eq!(Primitive::Float(1.5).type_name(), "number");
        assert_eq!(Primitive::String("a".into()).type_name(), "string");
        assert_eq!(Primitive::Undefined.type_name(), "undefined");
    }

    #[test]
    fn test_object_kind() {
        assert_eq!(
            Inspected::Object(ObjectKind::Array).object_kind().unwrap(),
            ObjectKind::Array
        );
        assert!(Inspected::Primitive(Primitive::Null).object_kind().is_err());
    }
}
