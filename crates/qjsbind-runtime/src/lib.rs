//! qjsbind-runtime - reference-safe bindings over an embedded QuickJS engine.
//!
//! The engine manages its heap with manual reference counts; Rust code manages
//! memory through ownership. This crate sits between the two so that every
//! engine reference handed to the host is released exactly once.
//!
//! # Features
//!
//! - **Owned handles**: [`JsObject`] releases its engine references on drop
//! - **Tracked values**: [`Held`] wrappers are released once unreachable, or
//!   at context teardown at the latest
//! - **Promise jobs**: deferred jobs are drained after every top-level call
//! - **Exception routing**: script failures go to a per-context handler, or
//!   to `tracing` by default
//! - **Bytecode**: compile once, execute later on the same engine build
//!
//! # Example
//!
//! ```
//! use qjsbind_runtime::{EngineContext, Value};
//!
//! let ctx = EngineContext::create().unwrap();
//!
//! let add = ctx.evaluate("(a, b) => a + b").unwrap().into_object().unwrap();
//! let sum = ctx.call(&add, &[Value::from(2), Value::from(3)]).unwrap();
//! assert_eq!(sum.as_i32(), Some(5));
//!
//! let bytecode = ctx.compile("1 + 2").unwrap();
//! assert_eq!(ctx.execute(&bytecode).unwrap().as_i32(), Some(3));
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      EngineContext                          │
//! │  enter: release deferred handles, sweep dead Held wrappers  │
//! │  check: handle owner and kind                               │
//! └─────────────────────────────────────────────────────────────┘
//!        │                   │                    │
//!        ↓                   ↓                    ↓
//! ┌──────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │ Engine trait │  │ ExceptionBridge  │  │ ReferenceTracker │
//! │ (QuickJs)    │  │ handler / tracing│  │ Held -> release  │
//! └──────────────┘  └──────────────────┘  └──────────────────┘
//!        │
//!        ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │  job loop: execute_pending_job until empty or failed        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifetimes
//!
//! Handles borrow the context that produced them, so a handle cannot be used
//! after its context is destroyed:
//!
//! ```compile_fail
//! use qjsbind_runtime::EngineContext;
//!
//! let ctx = EngineContext::create().unwrap();
//! let global = ctx.global_object();
//! ctx.destroy(); // Error: `ctx` is still borrowed by `global`
//! drop(global);
//! ```
//!
//! A context and everything it hands out stay on the creating thread:
//!
//! ```compile_fail
//! use qjsbind_runtime::EngineContext;
//! use std::thread;
//!
//! let ctx = EngineContext::create().unwrap();
//! thread::spawn(move || {
//!     ctx.evaluate("1"); // Error: EngineContext is !Send
//! });
//! ```

pub mod bytecode;
pub mod config;
pub mod context;
pub mod error;
pub mod exception;
mod job_loop;
mod stats;
pub mod tracker;
pub mod value;

pub use bytecode::BytecodeError;
pub use config::{ContextConfig, DEFAULT_FILENAME};
pub use context::{ContextId, EngineContext};
pub use error::{CoreError, Error, Result, ScriptError};
pub use exception::ExceptionHandler;
pub use stats::StatsSnapshot;
pub use tracker::Held;
pub use value::{Handle, JsObject, Value};

// Re-export the engine layer
pub use qjsbind_core::{Engine, EngineOptions, ObjectKind, QuickJs};

pub mod prelude {
    pub use crate::config::ContextConfig;
    pub use crate::context::EngineContext;
    pub use crate::error::{Error, Result};
    pub use crate::exception::ExceptionHandler;
    pub use crate::tracker::Held;
    pub use crate::value::{Handle, JsObject, Value};
}
