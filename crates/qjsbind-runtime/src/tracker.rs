//! Reference tracker
//!
//! [`Held`] ties engine references to a host value with shared ownership.
//! The tracker keeps a weak pointer to each wrapper next to the raw engine
//! pointer whose references it adopted. When the last clone of a wrapper goes
//! away it raises a flag, and the owning context sweeps dead entries at its
//! next operation. Teardown releases whatever is left in one forced pass.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use qjsbind_core::{Engine, ObjectKind, QuickJs};

use crate::context::ContextId;
use crate::value::{Handle, RawRef};

/// A shared, tracked reference to an engine object.
///
/// Cloning is cheap and does not touch the engine. The engine references are
/// released by the owning context once every clone is gone, or when the
/// context is torn down, whichever comes first.
pub struct Held<E: Engine = QuickJs> {
    inner: Rc<HeldInner<E>>,
}

struct HeldInner<E: Engine> {
    raw: E::Value,
    kind: ObjectKind,
    owner: ContextId,
    signal: Rc<Cell<bool>>,
}

impl<E: Engine> Drop for HeldInner<E> {
    fn drop(&mut self) {
        self.signal.set(true);
    }
}

impl<E: Engine> Held<E> {
    pub fn kind(&self) -> ObjectKind {
        self.inner.kind
    }

    /// Context that tracks this value
    pub fn context_id(&self) -> ContextId {
        self.inner.owner
    }

    /// Number of live clones of this wrapper
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }
}

impl<E: Engine> Clone for Held<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Engine> crate::value::sealed::Sealed for Held<E> {}

impl<E: Engine> Handle<E> for Held<E> {
    fn raw_ref(&self) -> RawRef<E::Value> {
        RawRef {
            raw: self.inner.raw,
            kind: self.inner.kind,
            owner: self.inner.owner,
        }
    }
}

impl<E: Engine> fmt::Debug for Held<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Held")
            .field("kind", &self.inner.kind)
            .field("context", &self.inner.owner)
            .finish()
    }
}

struct Entry<E: Engine> {
    wrapper: Weak<HeldInner<E>>,
    raw: E::Value,
    refs: u32,
}

/// Registry of held values for one context
pub(crate) struct ReferenceTracker<E: Engine> {
    entries: RefCell<Vec<Entry<E>>>,
    signal: Rc<Cell<bool>>,
}

impl<E: Engine> ReferenceTracker<E> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            signal: Rc::new(Cell::new(false)),
        }
    }

    /// Adopt `refs` engine references to `raw` and hand out the wrapper
    pub(crate) fn register(
        &self,
        owner: ContextId,
        raw: E::Value,
        kind: ObjectKind,
        refs: u32,
    ) -> Held<E> {
        let inner = Rc::new(HeldInner {
            raw,
            kind,
            owner,
            signal: Rc::clone(&self.signal),
        });
        self.entries.borrow_mut().push(Entry {
            wrapper: Rc::downgrade(&inner),
            raw,
            refs,
        });
        Held { inner }
    }

    /// True when some wrapper died since the last sweep
    pub(crate) fn needs_sweep(&self) -> bool {
        self.signal.get()
    }

    /// Release every entry whose wrapper is unreachable. Returns the number of
    /// entries released.
    pub(crate) fn sweep(&self, engine: &mut E) -> usize {
        self.signal.set(false);
        let mut released = 0;
        self.entries.borrow_mut().retain(|entry| {
            if entry.wrapper.strong_count() > 0 {
                return true;
            }
            release(engine, entry);
            released += 1;
            false
        });
        released
    }

    /// Release every entry regardless of reachability and clear the registry
    pub(crate) fn force_clean(&self, engine: &mut E) -> usize {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        self.signal.set(false);
        for entry in &entries {
            release(engine, entry);
        }
        entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

fn release<E: Engine>(engine: &mut E, entry: &Entry<E>) {
    for _ in 0..entry.refs {
        engine.free_value(entry.raw);
    }
}
