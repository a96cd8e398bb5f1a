// Allow raw pointer dereference in public functions - this is an FFI wrapper
// where the caller is responsible for providing valid context pointers.
#![allow(clippy::not_unsafe_ptr_arg_deref)]

//! Engine collaborator layer for qjsbind.
//!
//! This crate defines the fixed operation set the binding layer needs from an
//! embedded script engine ([`Engine`]) and implements it for QuickJS on top of
//! the raw `rquickjs-sys` bindings ([`QuickJs`]).
//!
//! Values crossing this boundary are raw engine pointers with manual
//! reference counts. Ownership discipline (who frees what, and when) is the
//! job of `qjsbind-runtime`.
//!
//! # Example
//!
//! ```
//! use qjsbind_core::{Engine, EngineOptions, EvalKind, Inspected, Primitive, QuickJs};
//!
//! let mut engine = QuickJs::new(&EngineOptions::default()).unwrap();
//! let value = engine.evaluate("1 + 1", "<doc>", EvalKind::Script).unwrap();
//! assert_eq!(engine.inspect(value).unwrap(), Inspected::Primitive(Primitive::Int(2)));
//! engine.free_value(value);
//! ```
//!
//! # Thread Safety
//!
//! [`QuickJs`] is `!Send` and `!Sync`; a QuickJS runtime must stay on the
//! thread that created it.
//!
//! ```compile_fail
//! use qjsbind_core::{EngineOptions, QuickJs};
//! use std::thread;
//!
//! let engine = QuickJs::new(&EngineOptions::default()).unwrap();
//! thread::spawn(move || {
//!     drop(engine); // Error: QuickJs is !Send
//! });
//! ```

mod engine;
mod error;
mod options;
mod quickjs;
pub mod string;

pub use engine::{Engine, EvalKind, Inspected, ObjectKind, Primitive};
pub use error::{EngineError, EngineResult, ScriptError};
pub use options::EngineOptions;
pub use quickjs::{QjsValue, QuickJs};

// Re-export the raw bindings for direct FFI access when needed
pub use rquickjs_sys;
