//! QuickJS implementation of the engine collaborator
//!
//! One [`QuickJs`] owns one `JSRuntime` with a single `JSContext`. Values are
//! raw `JSValue`s; reference counting is left to the caller exactly as the C
//! API defines it.

use rquickjs_sys as qjs;
use std::ffi::{CStr, c_void};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;
use std::slice;
use std::sync::OnceLock;

use tracing::trace;

use crate::engine::{Engine, EvalKind, Inspected, ObjectKind, Primitive};
use crate::error::{EngineError, EngineResult, ScriptError};
use crate::options::EngineOptions;
use crate::string::{js_string_to_rust, to_cstring};

/// Classifies objects as plain (0), array (1) or function (2). `Array.isArray`
/// is captured up front so scripts replacing it cannot confuse the host.
const CLASSIFIER_SOURCE: &str =
    "((isArray) => (v) => isArray(v) ? 1 : (typeof v === 'function' ? 2 : 0))(Array.isArray)";

/// Raw QuickJS value
pub type QjsValue = qjs::JSValue;

/// A QuickJS runtime and context pair
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync`: a QuickJS runtime must only be used from
/// the thread that drives it.
pub struct QuickJs {
    rt: *mut qjs::JSRuntime,
    ctx: *mut qjs::JSContext,
    classifier: qjs::JSValue,
    job_error: Option<EngineError>,
    /// Marker to make this type !Send + !Sync
    _not_send: PhantomData<*mut ()>,
}

/// `JS_*` predicates return `int` in some QuickJS builds and `bool` in others.
fn truthy<T: Into<i32>>(flag: T) -> bool {
    flag.into() != 0
}

fn is_exception(value: qjs::JSValue) -> bool {
    // SAFETY: reading the tag does not dereference the value
    unsafe { qjs::JS_VALUE_GET_TAG(value) == qjs::JS_TAG_EXCEPTION }
}

impl QuickJs {
    /// Create a new runtime and context with the given limits
    pub fn new(options: &EngineOptions) -> EngineResult<Self> {
        // SAFETY: fresh runtime/context pair, released in Drop or on the error paths
        unsafe {
            let rt = qjs::JS_NewRuntime();
            if rt.is_null() {
                return Err(EngineError::ContextCreation {
                    message: "JS_NewRuntime returned null".to_string(),
                });
            }

            if let Some(limit) = options.memory_limit {
                qjs::JS_SetMemoryLimit(rt, limit as _);
            }
            if let Some(size) = options.max_stack_size {
                qjs::JS_SetMaxStackSize(rt, size as _);
            }
            if let Some(threshold) = options.gc_threshold {
                qjs::JS_SetGCThreshold(rt, threshold as _);
            }

            let ctx = qjs::JS_NewContext(rt);
            if ctx.is_null() {
                qjs::JS_FreeRuntime(rt);
                return Err(EngineError::ContextCreation {
                    message: "JS_NewContext returned null".to_string(),
                });
            }

            let mut engine = Self {
                rt,
                ctx,
                classifier: qjs::JS_UNDEFINED,
                job_error: None,
                _not_send: PhantomData,
            };
            engine.classifier =
                engine.evaluate(CLASSIFIER_SOURCE, "<qjsbind>", EvalKind::Script)?;

            trace!("QuickJS runtime created");
            Ok(engine)
        }
    }

    /// Get the raw context pointer
    pub fn raw_context(&self) -> *mut qjs::JSContext {
        self.ctx
    }

    /// Get the raw runtime pointer
    pub fn raw_runtime(&self) -> *mut qjs::JSRuntime {
        self.rt
    }

    /// Run the cycle collector
    pub fn run_gc(&mut self) {
        // SAFETY: rt is valid for the lifetime of self
        unsafe { qjs::JS_RunGC(self.rt) }
    }

    fn check(&mut self, value: qjs::JSValue) -> EngineResult<qjs::JSValue> {
        if is_exception(value) {
            Err(EngineError::Script(self.take_exception()))
        } else {
            Ok(value)
        }
    }

    /// Pop the pending exception and describe it
    fn take_exception(&mut self) -> ScriptError {
        // SAFETY: ctx is valid; the exception value is freed after inspection
        unsafe {
            let exception = qjs::JS_GetException(self.ctx);
            let error = self.describe_exception(exception);
            qjs::JS_FreeValue(self.ctx, exception);
            error
        }
    }

    unsafe fn describe_exception(&mut self, exception: qjs::JSValue) -> ScriptError {
        // SAFETY: exception is a live value of self.ctx
        unsafe {
            if qjs::JS_VALUE_GET_TAG(exception) != qjs::JS_TAG_OBJECT {
                // Primitive exception (throw "string" or throw 42)
                let message = js_string_to_rust(self.ctx, exception)
                    .unwrap_or_else(|| "Unknown error".to_string());
                return ScriptError::new("Error", message);
            }

            let name = self
                .string_property(exception, c"name")
                .unwrap_or_else(|| "Error".to_string());
            let message = self.string_property(exception, c"message").unwrap_or_else(|| {
                js_string_to_rust(self.ctx, exception).unwrap_or_else(|| "Unknown error".into())
            });
            let file = self.string_property(exception, c"fileName");
            let line = self
                .number_property(exception, c"lineNumber")
                .map(|n| n as u32);

            let mut error = ScriptError::new(name, message).with_location(file, line);
            if let Some(stack) = self.string_property(exception, c"stack") {
                error = error.with_stack(stack);
            }
            error
        }
    }

    /// Get a string property, swallowing any exception raised by getters
    unsafe fn string_property(&mut self, object: qjs::JSValue, name: &CStr) -> Option<String> {
        // SAFETY: object is a live value of self.ctx
        unsafe {
            let value = qjs::JS_GetPropertyStr(self.ctx, object, name.as_ptr());
            if is_exception(value) {
                let pending = qjs::JS_GetException(self.ctx);
                qjs::JS_FreeValue(self.ctx, pending);
                return None;
            }

            let tag = qjs::JS_VALUE_GET_TAG(value);
            let result = if tag == qjs::JS_TAG_UNDEFINED || tag == qjs::JS_TAG_NULL {
                None
            } else {
                js_string_to_rust(self.ctx, value)
            };
            qjs::JS_FreeValue(self.ctx, value);
            result
        }
    }

    unsafe fn number_property(&mut self, object: qjs::JSValue, name: &CStr) -> Option<f64> {
        // SAFETY: object is a live value of self.ctx
        unsafe {
            let value = qjs::JS_GetPropertyStr(self.ctx, object, name.as_ptr());
            if is_exception(value) {
                let pending = qjs::JS_GetException(self.ctx);
                qjs::JS_FreeValue(self.ctx, pending);
                return None;
            }

            let tag = qjs::JS_VALUE_GET_TAG(value);
            let result = if tag == qjs::JS_TAG_INT || tag == qjs::JS_TAG_FLOAT64 {
                let mut number = 0f64;
                qjs::JS_ToFloat64(self.ctx, &mut number, value);
                Some(number)
            } else {
                None
            };
            qjs::JS_FreeValue(self.ctx, value);
            result.filter(|n| !n.is_nan())
        }
    }

    fn classify(&mut self, value: qjs::JSValue) -> EngineResult<ObjectKind> {
        let mut argv = [value];
        // SAFETY: classifier and value are live values of self.ctx
        let code = unsafe {
            let result = qjs::JS_Call(self.ctx, self.classifier, qjs::JS_UNDEFINED, 1, argv.as_mut_ptr());
            let result = self.check(result)?;
            let mut code = 0i32;
            qjs::JS_ToInt32(self.ctx, &mut code, result);
            qjs::JS_FreeValue(self.ctx, result);
            code
        };

        Ok(match code {
            1 => ObjectKind::Array,
            2 => ObjectKind::Function,
            _ => ObjectKind::Object,
        })
    }
}

impl Engine for QuickJs {
    type Value = qjs::JSValue;

    /// `quickjs-ng-<version>` as reported by the linked engine. Patch releases
    /// may bump the bytecode format, so every engine version gets its own id.
    fn build_id() -> &'static str {
        static BUILD_ID: OnceLock<String> = OnceLock::new();
        BUILD_ID.get_or_init(|| {
            // SAFETY: JS_GetVersion returns a static NUL-terminated string
            let version = unsafe { CStr::from_ptr(qjs::JS_GetVersion()) };
            format!("quickjs-ng-{}", version.to_string_lossy())
        })
    }

    fn evaluate(&mut self, source: &str, filename: &str, kind: EvalKind) -> EngineResult<QjsValue> {
        let source_cstr = to_cstring(source)?;
        let filename_cstr = to_cstring(filename)?;
        let flags = match kind {
            EvalKind::Script => qjs::JS_EVAL_TYPE_GLOBAL,
            EvalKind::Module => qjs::JS_EVAL_TYPE_MODULE,
        };

        // SAFETY: CStrings are valid null-terminated, ctx is valid
        let value = unsafe {
            qjs::JS_Eval(
                self.ctx,
                source_cstr.as_ptr(),
                source.len() as _,
                filename_cstr.as_ptr(),
                flags as _,
            )
        };
        self.check(value)
    }

    fn global_object(&mut self) -> QjsValue {
        // SAFETY: ctx is valid
        unsafe { qjs::JS_GetGlobalObject(self.ctx) }
    }

    fn get_property(&mut self, object: QjsValue, name: &str) -> EngineResult<QjsValue> {
        let name_cstr = to_cstring(name)?;
        // SAFETY: CString is valid, ctx and object are valid
        let value = unsafe { qjs::JS_GetPropertyStr(self.ctx, object, name_cstr.as_ptr()) };
        self.check(value)
    }

    fn set_property(&mut self, object: QjsValue, name: &str, value: QjsValue) -> EngineResult<()> {
        let name_cstr = match to_cstring(name) {
            Ok(name_cstr) => name_cstr,
            Err(e) => {
                self.free_value(value);
                return Err(e);
            }
        };

        // SAFETY: JS_SetPropertyStr takes ownership of value
        let status = unsafe { qjs::JS_SetPropertyStr(self.ctx, object, name_cstr.as_ptr(), value) };
        if status < 0 {
            return Err(EngineError::Script(self.take_exception()));
        }
        Ok(())
    }

    fn stringify(&mut self, value: QjsValue) -> EngineResult<Option<String>> {
        // SAFETY: ctx and value are valid
        unsafe {
            let json = qjs::JS_JSONStringify(self.ctx, value, qjs::JS_UNDEFINED, qjs::JS_UNDEFINED);
            let json = self.check(json)?;
            if qjs::JS_VALUE_GET_TAG(json) == qjs::JS_TAG_UNDEFINED {
                return Ok(None);
            }

            let result = js_string_to_rust(self.ctx, json);
            qjs::JS_FreeValue(self.ctx, json);
            Ok(result)
        }
    }

    fn array_length(&mut self, array: QjsValue) -> EngineResult<u32> {
        // SAFETY: ctx and array are valid
        unsafe {
            let length = qjs::JS_GetPropertyStr(self.ctx, array, c"length".as_ptr());
            let length = self.check(length)?;
            let mut number = 0f64;
            let status = qjs::JS_ToFloat64(self.ctx, &mut number, length);
            qjs::JS_FreeValue(self.ctx, length);
            if status < 0 {
                return Err(EngineError::Script(self.take_exception()));
            }
            Ok(number as u32)
        }
    }

    fn array_get(&mut self, array: QjsValue, index: u32) -> EngineResult<QjsValue> {
        // SAFETY: ctx and array are valid
        let value = unsafe { qjs::JS_GetPropertyUint32(self.ctx, array, index) };
        self.check(value)
    }

    fn call(
        &mut self,
        function: QjsValue,
        this: Option<QjsValue>,
        args: &[QjsValue],
    ) -> EngineResult<QjsValue> {
        let this = this.unwrap_or(qjs::JS_UNDEFINED);
        let mut argv = args.to_vec();

        // SAFETY: function, this and args are live values of self.ctx; JS_Call
        // borrows the arguments
        let value = unsafe {
            qjs::JS_Call(
                self.ctx,
                function,
                this,
                argv.len() as _,
                if argv.is_empty() {
                    ptr::null_mut()
                } else {
                    argv.as_mut_ptr()
                },
            )
        };
        self.check(value)
    }

    fn duplicate(&mut self, value: QjsValue) -> QjsValue {
        // SAFETY: value is a live value of self.ctx
        unsafe { qjs::JS_DupValue(self.ctx, value) }
    }

    fn free_value(&mut self, value: QjsValue) {
        // SAFETY: caller gives up one reference it owns
        unsafe { qjs::JS_FreeValue(self.ctx, value) }
    }

    fn parse_json(&mut self, text: &str) -> EngineResult<QjsValue> {
        let text_cstr = to_cstring(text)?;
        // SAFETY: CString is valid, ctx is valid
        let value = unsafe {
            qjs::JS_ParseJSON(
                self.ctx,
                text_cstr.as_ptr(),
                text.len() as _,
                c"<json>".as_ptr(),
            )
        };
        self.check(value)
    }

    fn compile(&mut self, source: &str, filename: &str) -> EngineResult<Vec<u8>> {
        let source_cstr = to_cstring(source)?;
        let filename_cstr = to_cstring(filename)?;

        // SAFETY: CStrings are valid; the compiled function is freed after
        // serialization and the output buffer with js_free
        unsafe {
            let function = qjs::JS_Eval(
                self.ctx,
                source_cstr.as_ptr(),
                source.len() as _,
                filename_cstr.as_ptr(),
                (qjs::JS_EVAL_TYPE_GLOBAL | qjs::JS_EVAL_FLAG_COMPILE_ONLY) as _,
            );
            let function = self.check(function)?;

            let mut size = MaybeUninit::uninit();
            let buffer = qjs::JS_WriteObject(
                self.ctx,
                size.as_mut_ptr(),
                function,
                qjs::JS_WRITE_OBJ_BYTECODE as _,
            );
            qjs::JS_FreeValue(self.ctx, function);

            if buffer.is_null() {
                let error = self.take_exception();
                return Err(EngineError::Bytecode(error.to_string()));
            }

            let size = size.assume_init() as usize;
            let bytes = slice::from_raw_parts(buffer as *const u8, size).to_vec();
            qjs::js_free(self.ctx, buffer as *mut c_void);
            Ok(bytes)
        }
    }

    fn execute(&mut self, bytecode: &[u8]) -> EngineResult<QjsValue> {
        // SAFETY: the buffer outlives the call; JS_EvalFunction consumes the
        // function object
        unsafe {
            let function = qjs::JS_ReadObject(
                self.ctx,
                bytecode.as_ptr(),
                bytecode.len() as _,
                qjs::JS_READ_OBJ_BYTECODE as _,
            );
            if is_exception(function) {
                let error = self.take_exception();
                return Err(EngineError::Bytecode(error.to_string()));
            }

            let value = qjs::JS_EvalFunction(self.ctx, function);
            self.check(value)
        }
    }

    fn execute_pending_job(&mut self) -> i32 {
        let mut job_ctx: *mut qjs::JSContext = ptr::null_mut();
        // SAFETY: rt is valid; job_ctx receives the context the job ran in
        let status = unsafe { qjs::JS_ExecutePendingJob(self.rt, &mut job_ctx) };
        if status < 0 {
            // Only one context exists per runtime, so the job ran in ours.
            let error = self.take_exception();
            self.job_error = Some(EngineError::Script(error));
        }
        status as i32
    }

    fn take_job_error(&mut self) -> Option<EngineError> {
        self.job_error.take()
    }

    fn rejection(&mut self, value: QjsValue) -> Option<ScriptError> {
        // SAFETY: value is a live value of self.ctx; the promise result is a
        // new reference freed after inspection
        unsafe {
            if qjs::JS_VALUE_GET_TAG(value) != qjs::JS_TAG_OBJECT
                || qjs::JS_PromiseState(self.ctx, value) != qjs::JSPromiseStateEnum_JS_PROMISE_REJECTED
            {
                return None;
            }
            let reason = qjs::JS_PromiseResult(self.ctx, value);
            let error = self.describe_exception(reason);
            qjs::JS_FreeValue(self.ctx, reason);
            Some(error)
        }
    }

    fn inspect(&mut self, value: QjsValue) -> EngineResult<Inspected> {
        // SAFETY: value is a live value of self.ctx; nothing here consumes it
        let primitive = unsafe {
            match qjs::JS_VALUE_GET_TAG(value) {
                qjs::JS_TAG_UNDEFINED => Primitive::Undefined,
                qjs::JS_TAG_NULL => Primitive::Null,
                qjs::JS_TAG_BOOL => Primitive::Bool(truthy(qjs::JS_ToBool(self.ctx, value))),
                qjs::JS_TAG_INT => {
                    let mut number = 0i32;
                    qjs::JS_ToInt32(self.ctx, &mut number, value);
                    Primitive::Int(number)
                }
                qjs::JS_TAG_FLOAT64 => {
                    let mut number = 0f64;
                    qjs::JS_ToFloat64(self.ctx, &mut number, value);
                    Primitive::Float(number)
                }
                qjs::JS_TAG_OBJECT => return Ok(Inspected::Object(self.classify(value)?)),
                // Strings, plus symbols and big integers rendered as text
                _ => Primitive::String(js_string_to_rust(self.ctx, value).unwrap_or_default()),
            }
        };
        Ok(Inspected::Primitive(primitive))
    }

    fn make_primitive(&mut self, primitive: &Primitive) -> EngineResult<QjsValue> {
        // SAFETY: ctx is valid; constructors return a fresh reference
        let value = unsafe {
            match primitive {
                Primitive::Undefined => qjs::JS_UNDEFINED,
                Primitive::Null => qjs::JS_NULL,
                Primitive::Bool(b) => qjs::JS_MKVAL(qjs::JS_TAG_BOOL, *b as i32),
                Primitive::Int(n) => qjs::JS_MKVAL(qjs::JS_TAG_INT, *n),
                Primitive::Float(n) => qjs::JS_NewFloat64(*n),
                Primitive::String(s) => {
                    qjs::JS_NewStringLen(self.ctx, s.as_ptr() as *const _, s.len() as _)
                }
            }
        };
        self.check(value)
    }
}

impl Drop for QuickJs {
    fn drop(&mut self) {
        // SAFETY: rt/ctx were created in new() and are released exactly once
        unsafe {
            qjs::JS_FreeValue(self.ctx, self.classifier);
            qjs::JS_FreeContext(self.ctx);
            qjs::JS_FreeRuntime(self.rt);
        }
        trace!("QuickJS runtime released");
    }
}
