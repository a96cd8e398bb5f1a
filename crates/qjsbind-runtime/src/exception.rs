//! Exception bridge
//!
//! Script failures never escape a context operation as errors. They are
//! rendered once and passed to the context's handler, or to the `tracing`
//! error sink when no handler is installed.

use std::cell::{Cell, RefCell};

use qjsbind_core::ScriptError;
use tracing::error;

use crate::context::ContextId;

/// Receives rendered script failures: `"<name>: <message>"` followed by the
/// stack trace when the engine provides one.
///
/// Any `FnMut(&str)` closure is a handler.
pub trait ExceptionHandler {
    fn handle(&mut self, error: &str);
}

impl<F> ExceptionHandler for F
where
    F: FnMut(&str),
{
    fn handle(&mut self, error: &str) {
        self(error)
    }
}

/// Per-context handler slot.
///
/// The handler is moved out of the slot while it runs so it may call back
/// into the context. If it installs or clears a handler during that call, the
/// new setting wins and the running handler is discarded afterwards.
pub(crate) struct ExceptionBridge {
    handler: RefCell<Option<Box<dyn ExceptionHandler>>>,
    generation: Cell<u64>,
}

impl ExceptionBridge {
    pub(crate) fn new() -> Self {
        Self {
            handler: RefCell::new(None),
            generation: Cell::new(0),
        }
    }

    pub(crate) fn set(&self, handler: Option<Box<dyn ExceptionHandler>>) {
        let previous = self.handler.replace(handler);
        self.generation.set(self.generation.get() + 1);
        drop(previous);
    }

    pub(crate) fn has_handler(&self) -> bool {
        self.handler.borrow().is_some()
    }

    pub(crate) fn report(&self, context: ContextId, failure: &ScriptError) {
        let rendered = failure.render();
        let taken = self.handler.borrow_mut().take();
        match taken {
            Some(mut handler) => {
                let generation = self.generation.get();
                handler.handle(&rendered);
                if self.generation.get() == generation {
                    *self.handler.borrow_mut() = Some(handler);
                }
            }
            None => error!(target: "qjsbind", context = %context, "{}", rendered),
        }
    }
}
