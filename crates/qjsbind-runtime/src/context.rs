//! Engine context
//!
//! [`EngineContext`] owns one engine instance and is the only way to reach
//! it. Every operation enters through the context, which
//!
//! - releases handles whose drop had to be deferred and sweeps dead
//!   [`Held`] wrappers,
//! - checks that handles passed in were produced by this context,
//! - routes script failures to the exception bridge,
//! - drains the pending-job queue after top-level entry points.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use qjsbind_core::{Engine, EvalKind, Inspected, ObjectKind, QuickJs};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::bytecode::{self, BytecodeError};
use crate::config::ContextConfig;
use crate::error::{CoreError, CoreResult, Error, Result};
use crate::exception::{ExceptionBridge, ExceptionHandler};
use crate::job_loop;
use crate::stats::{ContextStats, StatsSnapshot};
use crate::tracker::{Held, ReferenceTracker};
use crate::value::{Handle, JsObject, RawRef, Value};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an engine context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One engine instance plus the bookkeeping that keeps its references sound.
///
/// The context is `!Send` and `!Sync`. Handles borrow it, so it cannot be
/// destroyed while any [`JsObject`] is alive.
///
/// # Example
///
/// ```
/// use qjsbind_runtime::EngineContext;
///
/// let ctx = EngineContext::create().unwrap();
/// ctx.evaluate("Promise.resolve(1).then(v => globalThis.x = v + 1)").unwrap();
///
/// let global = ctx.global_object();
/// assert_eq!(ctx.get_property(&global, "x").unwrap().as_i32(), Some(2));
/// ```
pub struct EngineContext<E: Engine = QuickJs> {
    id: ContextId,
    config: ContextConfig,
    engine: RefCell<E>,
    tracker: ReferenceTracker<E>,
    exceptions: ExceptionBridge,
    /// Handle releases that arrived while the engine was busy
    deferred: RefCell<Vec<(E::Value, u32)>>,
    stats: ContextStats,
}

impl EngineContext<QuickJs> {
    /// Create a QuickJS-backed context with default configuration
    pub fn create() -> Result<Self> {
        Self::with_config(ContextConfig::default())
    }

    pub fn with_config(config: ContextConfig) -> Result<Self> {
        let engine = QuickJs::new(&config.engine)?;
        Ok(Self::from_engine(engine, config))
    }
}

impl<E: Engine> EngineContext<E> {
    /// Wrap an already created engine instance
    pub fn from_engine(engine: E, config: ContextConfig) -> Self {
        let id = ContextId::next();
        debug!(target: "qjsbind", context = %id, build = E::build_id(), "context created");
        Self {
            id,
            config,
            engine: RefCell::new(engine),
            tracker: ReferenceTracker::new(),
            exceptions: ExceptionBridge::new(),
            deferred: RefCell::new(Vec::new()),
            stats: ContextStats::default(),
        }
    }

    /// Tear the context down: release every held value, then the engine.
    ///
    /// Equivalent to dropping the context.
    pub fn destroy(self) {
        debug!(target: "qjsbind", context = %self.id, "destroying context");
        drop(self);
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of values currently registered with the tracker
    pub fn held_count(&self) -> usize {
        self.tracker.len()
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate a global script under the default filename
    pub fn evaluate(&self, source: &str) -> Result<Value<'_, E>> {
        self.evaluate_with_filename(source, &self.config.default_filename)
    }

    /// Evaluate a global script.
    ///
    /// A script that throws yields `Value::Undefined` after the failure has
    /// been reported. Pending jobs are drained before returning either way.
    pub fn evaluate_with_filename(&self, source: &str, filename: &str) -> Result<Value<'_, E>> {
        self.run_entry(|engine| engine.evaluate(source, filename, EvalKind::Script))
    }

    pub fn evaluate_module(&self, source: &str) -> Result<Value<'_, E>> {
        self.evaluate_module_named(source, &self.config.default_module_name)
    }

    /// Evaluate an ES module. Returns whatever the engine yields for module
    /// evaluation, a promise on current QuickJS builds.
    ///
    /// A module body that throws rejects that promise instead of failing the
    /// evaluation. The rejection is reported like a script failure and the
    /// result is `Value::Undefined`.
    pub fn evaluate_module_named(&self, source: &str, name: &str) -> Result<Value<'_, E>> {
        let value = self.run_entry(|engine| {
            let raw = engine.evaluate(source, name, EvalKind::Module)?;
            match engine.rejection(raw) {
                Some(failure) => {
                    engine.free_value(raw);
                    Err(CoreError::Script(failure))
                }
                None => Ok(raw),
            }
        })?;

        // Top-level await settles the promise only once the job queue ran.
        let promise = match value {
            Value::Object(promise) => promise,
            other => return Ok(other),
        };
        let rejection = self.engine.borrow_mut().rejection(promise.raw());
        match rejection {
            Some(failure) => {
                drop(promise);
                self.absorb(Err(CoreError::Script(failure).into()), Value::Undefined)
            }
            None => Ok(Value::Object(promise)),
        }
    }

    /// Evaluate `throw <message>;` so the message is reported through the
    /// exception bridge like any other script failure
    pub fn throw_js_exception(&self, message: &str) -> Result<()> {
        let literal = serde_json::to_string(message)?;
        self.evaluate(&format!("throw {};", literal)).map(drop)
    }

    // ------------------------------------------------------------------
    // Objects and properties
    // ------------------------------------------------------------------

    pub fn global_object(&self) -> JsObject<'_, E> {
        self.enter();
        let raw = self.engine.borrow_mut().global_object();
        JsObject::adopt(self, raw, ObjectKind::Object)
    }

    pub fn get_property(&self, object: &impl Handle<E>, name: &str) -> Result<Value<'_, E>> {
        self.enter();
        let target = self.check(object);
        let outcome = {
            let mut engine = self.engine.borrow_mut();
            engine
                .get_property(target.raw, name)
                .map_err(Error::from)
                .and_then(|raw| self.lift(&mut *engine, raw))
        };
        self.absorb(outcome, Value::Undefined)
    }

    /// Set `object[name] = value`.
    ///
    /// An object value is moved into the property: its handle is consumed and
    /// any duplicates it carried are released.
    pub fn set_property<'v>(
        &self,
        object: &impl Handle<E>,
        name: &str,
        value: impl Into<Value<'v, E>>,
    ) -> Result<()>
    where
        E: 'v,
    {
        self.enter();
        let target = self.check(object);
        let value = value.into();
        if let Value::Object(inner) = &value {
            self.check(inner);
        }

        let outcome = {
            let mut engine = self.engine.borrow_mut();
            self.lower_owned(&mut *engine, value)
                .and_then(|raw| Ok(engine.set_property(target.raw, name, raw)?))
        };
        self.absorb(outcome, ())
    }

    /// `JSON.stringify(value)`, or `None` when the result is `undefined` or
    /// stringification threw
    pub fn stringify(&self, value: &impl Handle<E>) -> Result<Option<String>> {
        self.enter();
        let target = self.check(value);
        let outcome = self
            .engine
            .borrow_mut()
            .stringify(target.raw)
            .map_err(Error::from);
        self.absorb(outcome, None)
    }

    /// Parse JSON text into an engine value. Malformed JSON is an error, not a
    /// reported script failure.
    pub fn parse_json(&self, text: &str) -> Result<Value<'_, E>> {
        self.enter();
        let mut engine = self.engine.borrow_mut();
        let raw = engine.parse_json(text)?;
        self.lift(&mut *engine, raw)
    }

    pub fn new_object(&self) -> Result<JsObject<'_, E>> {
        self.parse_json("{}")?
            .into_object()
            .ok_or_else(|| Error::internal("JSON object literal did not yield an object"))
    }

    pub fn new_array(&self) -> Result<JsObject<'_, E>> {
        self.parse_json("[]")?
            .into_object()
            .ok_or_else(|| Error::internal("JSON array literal did not yield an array"))
    }

    // ------------------------------------------------------------------
    // Arrays
    // ------------------------------------------------------------------

    /// Length of an array handle. Panics if the handle is not an array.
    pub fn length(&self, array: &impl Handle<E>) -> Result<u32> {
        self.enter();
        let target = self.check(array);
        expect_kind(target, ObjectKind::Array, "length");
        let outcome = self
            .engine
            .borrow_mut()
            .array_length(target.raw)
            .map_err(Error::from);
        self.absorb(outcome, 0)
    }

    /// Element `index` of an array handle. Panics if the handle is not an
    /// array.
    pub fn get(&self, array: &impl Handle<E>, index: u32) -> Result<Value<'_, E>> {
        self.enter();
        let target = self.check(array);
        expect_kind(target, ObjectKind::Array, "get");
        let outcome = {
            let mut engine = self.engine.borrow_mut();
            engine
                .array_get(target.raw, index)
                .map_err(Error::from)
                .and_then(|raw| self.lift(&mut *engine, raw))
        };
        self.absorb(outcome, Value::Undefined)
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    /// Call `function` with an undefined `this`
    pub fn call(&self, function: &impl Handle<E>, args: &[Value<'_, E>]) -> Result<Value<'_, E>> {
        let function = self.check(function);
        self.call_raw(function, None, args)
    }

    pub fn call_with_this(
        &self,
        function: &impl Handle<E>,
        this: &impl Handle<E>,
        args: &[Value<'_, E>],
    ) -> Result<Value<'_, E>> {
        let function = self.check(function);
        let this = self.check(this);
        self.call_raw(function, Some(this.raw), args)
    }

    fn call_raw(
        &self,
        function: RawRef<E::Value>,
        this: Option<E::Value>,
        args: &[Value<'_, E>],
    ) -> Result<Value<'_, E>> {
        expect_kind(function, ObjectKind::Function, "call");
        for arg in args {
            if let Value::Object(object) = arg {
                self.check(object);
            }
        }

        self.run_entry(|engine| {
            let mut lowered = Vec::with_capacity(args.len());
            let mut owned = Vec::new();
            let mut failure = None;
            for arg in args {
                match arg {
                    Value::Object(object) => lowered.push(object.raw()),
                    other => match lower_primitive(engine, other) {
                        Ok(raw) => {
                            owned.push(raw);
                            lowered.push(raw);
                        }
                        Err(error) => {
                            failure = Some(error);
                            break;
                        }
                    },
                }
            }

            let result = match failure {
                Some(error) => Err(error),
                None => engine.call(function.raw, this, &lowered),
            };
            for raw in owned {
                engine.free_value(raw);
            }
            result
        })
    }

    // ------------------------------------------------------------------
    // Reference management
    // ------------------------------------------------------------------

    /// Add one engine reference to `object`, owned by the same handle
    pub fn duplicate(&self, object: &JsObject<'_, E>) {
        self.enter();
        let target = self.check(object);
        self.engine.borrow_mut().duplicate(target.raw);
        object.refs().set(object.refs().get() + 1);
    }

    /// Give back one reference added by [`duplicate`](Self::duplicate).
    ///
    /// Panics if the handle carries no outstanding duplicate.
    pub fn free_duplicate(&self, object: &JsObject<'_, E>) {
        self.enter();
        let target = self.check(object);
        let refs = object.refs().get();
        assert!(
            refs > 1,
            "free_duplicate called on a handle without an outstanding duplicate"
        );
        self.engine.borrow_mut().free_value(target.raw);
        object.refs().set(refs - 1);
    }

    /// Release every reference owned by `object`
    pub fn free(&self, object: JsObject<'_, E>) {
        self.check(&object);
        drop(object);
    }

    /// Hand `object` over to the reference tracker.
    ///
    /// The returned wrapper can be cloned freely. Its engine references are
    /// released once every clone is dropped, at the next operation on this
    /// context, or when the context is destroyed.
    pub fn hold(&self, object: JsObject<'_, E>) -> Held<E> {
        self.enter();
        self.check(&object);
        let (raw, kind, refs) = object.into_parts();
        ContextStats::bump(&self.stats.holds, 1);
        self.tracker.register(self.id, raw, kind, refs)
    }

    /// A fresh handle on a held value, carrying its own engine reference.
    ///
    /// The handle works wherever a [`JsObject`] does, including call
    /// arguments and property values. The held value itself stays registered.
    pub fn attach(&self, held: &Held<E>) -> JsObject<'_, E> {
        self.enter();
        let target = self.check(held);
        let raw = self.duplicate_raw(target.raw);
        JsObject::adopt(self, raw, target.kind)
    }

    /// Release held values whose wrappers are gone. Returns how many were
    /// released.
    pub fn collect_held(&self) -> usize {
        self.maintain(true)
    }

    // ------------------------------------------------------------------
    // Bytecode
    // ------------------------------------------------------------------

    /// Compile a global script to bytecode for this engine build
    pub fn compile(&self, source: &str) -> Result<Vec<u8>> {
        self.compile_with_filename(source, &self.config.default_filename)
    }

    pub fn compile_with_filename(&self, source: &str, filename: &str) -> Result<Vec<u8>> {
        self.enter();
        let payload = self.engine.borrow_mut().compile(source, filename)?;
        Ok(bytecode::encode(E::build_id(), &payload)?)
    }

    /// Run bytecode produced by [`compile`](Self::compile).
    ///
    /// Blobs from another engine build, or damaged blobs, fail with
    /// [`Error::Bytecode`] without running anything.
    pub fn execute(&self, blob: &[u8]) -> Result<Value<'_, E>> {
        let payload = bytecode::decode(E::build_id(), blob)?;
        self.run_entry(|engine| engine.execute(payload))
            .map_err(|error| match error {
                Error::Core(CoreError::Bytecode(message)) => {
                    Error::Bytecode(BytecodeError::Rejected(message))
                }
                other => other,
            })
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    /// Install a handler for script failures, or `None` to fall back to the
    /// `tracing` error sink
    pub fn set_exception_handler(&self, handler: Option<Box<dyn ExceptionHandler>>) {
        self.exceptions.set(handler);
    }

    pub fn has_exception_handler(&self) -> bool {
        self.exceptions.has_handler()
    }

    // ------------------------------------------------------------------
    // Serde bridge
    // ------------------------------------------------------------------

    /// Deserialize an engine value through its JSON form
    pub fn deserialize<T: DeserializeOwned>(&self, value: &impl Handle<E>) -> Result<T> {
        let json = self.stringify(value)?.ok_or(Error::NotSerializable)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Build an engine value from any serializable host value
    pub fn to_js<T: Serialize + ?Sized>(&self, value: &T) -> Result<Value<'_, E>> {
        let json = serde_json::to_string(value)?;
        self.parse_json(&json)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Run a top-level entry point: evaluate, report a failure, then drain
    /// jobs. The handler runs before any job queued by the entry point.
    fn run_entry(
        &self,
        op: impl FnOnce(&mut E) -> CoreResult<E::Value>,
    ) -> Result<Value<'_, E>> {
        self.enter();
        ContextStats::bump(&self.stats.evaluations, 1);

        let outcome = {
            let mut engine = self.engine.borrow_mut();
            op(&mut *engine)
                .map_err(Error::from)
                .and_then(|raw| self.lift(&mut *engine, raw))
        };
        let value = self.absorb(outcome, Value::Undefined);

        let drained = job_loop::drain(&mut *self.engine.borrow_mut());
        if drained.executed > 0 {
            ContextStats::bump(&self.stats.jobs_executed, drained.executed);
        }
        trace!(target: "qjsbind", context = %self.id, jobs = drained.executed, "job queue drained");

        let value = value?;
        drained.into_result()?;
        Ok(value)
    }

    /// Report a script failure and substitute `fallback`
    fn absorb<T>(&self, outcome: Result<T>, fallback: T) -> Result<T> {
        match outcome {
            Err(Error::Core(CoreError::Script(failure))) => {
                ContextStats::bump(&self.stats.script_failures, 1);
                self.exceptions.report(self.id, &failure);
                Ok(fallback)
            }
            other => other,
        }
    }

    /// Turn one engine reference into a host value
    fn lift(&self, engine: &mut E, raw: E::Value) -> Result<Value<'_, E>> {
        match engine.inspect(raw) {
            Ok(Inspected::Object(kind)) => Ok(Value::Object(JsObject::adopt(self, raw, kind))),
            Ok(Inspected::Primitive(primitive)) => {
                engine.free_value(raw);
                Ok(Value::from_primitive(primitive))
            }
            Err(error) => {
                engine.free_value(raw);
                Err(error.into())
            }
        }
    }

    /// Produce exactly one engine reference for `value`, consuming it
    fn lower_owned(&self, engine: &mut E, value: Value<'_, E>) -> Result<E::Value> {
        match value {
            Value::Object(object) => {
                let (raw, _, refs) = object.into_parts();
                for _ in 1..refs {
                    engine.free_value(raw);
                }
                Ok(raw)
            }
            other => Ok(lower_primitive(engine, &other)?),
        }
    }

    fn check<H: Handle<E>>(&self, handle: &H) -> RawRef<E::Value> {
        let raw = handle.raw_ref();
        assert!(
            raw.owner == self.id,
            "handle belongs to context {} but was used with context {}",
            raw.owner,
            self.id
        );
        raw
    }

    fn enter(&self) {
        self.maintain(false);
    }

    /// Release deferred handles, then sweep the tracker when a wrapper died or
    /// `force_sweep` is set
    fn maintain(&self, force_sweep: bool) -> usize {
        let pending = std::mem::take(&mut *self.deferred.borrow_mut());
        let sweep = force_sweep || self.tracker.needs_sweep();
        if pending.is_empty() && !sweep {
            return 0;
        }

        let mut engine = self.engine.borrow_mut();
        for (raw, refs) in pending {
            release(&mut *engine, raw, refs);
            ContextStats::bump(&self.stats.handle_releases, 1);
        }
        if !sweep {
            return 0;
        }

        let released = self.tracker.sweep(&mut *engine);
        if released > 0 {
            ContextStats::bump(&self.stats.held_released, released as u64);
            trace!(target: "qjsbind", context = %self.id, released, "swept held values");
        }
        released
    }

    /// Release path for dropped handles
    pub(crate) fn release_raw(&self, raw: E::Value, refs: u32) {
        match self.engine.try_borrow_mut() {
            Ok(mut engine) => {
                release(&mut *engine, raw, refs);
                ContextStats::bump(&self.stats.handle_releases, 1);
            }
            Err(_) => self.deferred.borrow_mut().push((raw, refs)),
        }
    }

    pub(crate) fn duplicate_raw(&self, raw: E::Value) -> E::Value {
        self.engine.borrow_mut().duplicate(raw)
    }
}

impl<E: Engine> Drop for EngineContext<E> {
    fn drop(&mut self) {
        let engine = self.engine.get_mut();
        for (raw, refs) in std::mem::take(self.deferred.get_mut()) {
            release(engine, raw, refs);
            ContextStats::bump(&self.stats.handle_releases, 1);
        }

        let released = self.tracker.force_clean(engine);
        ContextStats::bump(&self.stats.held_released, released as u64);
        debug!(target: "qjsbind", context = %self.id, released, "context destroyed");
    }
}

impl<E: Engine> fmt::Debug for EngineContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("id", &self.id)
            .field("build", &E::build_id())
            .field("held", &self.tracker.len())
            .finish()
    }
}

fn release<E: Engine>(engine: &mut E, raw: E::Value, refs: u32) {
    for _ in 0..refs {
        engine.free_value(raw);
    }
}

fn lower_primitive<E: Engine>(engine: &mut E, value: &Value<'_, E>) -> CoreResult<E::Value> {
    let primitive = value
        .to_primitive()
        .ok_or_else(|| CoreError::Internal("object passed where a primitive was expected".into()))?;
    engine.make_primitive(&primitive)
}

fn expect_kind<V: Copy>(handle: RawRef<V>, expected: ObjectKind, operation: &str) {
    assert!(
        handle.kind == expected,
        "{} requires {:?}, got {:?}",
        operation,
        expected,
        handle.kind
    );
}
