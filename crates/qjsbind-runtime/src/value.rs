//! Value handles
//!
//! A [`JsObject`] owns engine references to one object, array or function and
//! gives them back when it is freed or dropped. It borrows the context that
//! produced it, so it can never outlive that context. Primitives are copied
//! out of the engine into [`Value`] and need no handle at all.

use std::cell::Cell;
use std::fmt;
use std::mem::ManuallyDrop;

use qjsbind_core::{Engine, ObjectKind, Primitive, QuickJs};

use crate::context::{ContextId, EngineContext};

/// Raw view of a handle: the engine pointer, its kind and its owner
#[derive(Clone, Copy)]
pub struct RawRef<V: Copy> {
    pub(crate) raw: V,
    pub(crate) kind: ObjectKind,
    pub(crate) owner: ContextId,
}

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Anything that refers to an engine object: [`JsObject`] or [`crate::Held`].
///
/// This trait is sealed; the context operations accept `&impl Handle<E>`.
pub trait Handle<E: Engine>: sealed::Sealed {
    #[doc(hidden)]
    fn raw_ref(&self) -> RawRef<E::Value>;

    /// Context that produced this handle
    fn owner(&self) -> ContextId {
        self.raw_ref().owner
    }

    fn object_kind(&self) -> ObjectKind {
        self.raw_ref().kind
    }
}

/// An owned reference to an engine object, array or function.
///
/// The handle owns one engine reference, plus one per outstanding
/// [`EngineContext::duplicate`]. All of them are released when the handle is
/// passed to [`EngineContext::free`] or dropped.
pub struct JsObject<'ctx, E: Engine = QuickJs> {
    ctx: &'ctx EngineContext<E>,
    raw: E::Value,
    kind: ObjectKind,
    refs: Cell<u32>,
}

impl<'ctx, E: Engine> JsObject<'ctx, E> {
    /// Adopt one engine reference to `raw`
    pub(crate) fn adopt(ctx: &'ctx EngineContext<E>, raw: E::Value, kind: ObjectKind) -> Self {
        Self {
            ctx,
            raw,
            kind,
            refs: Cell::new(1),
        }
    }

    /// Give up the handle without releasing anything, returning what it owned
    pub(crate) fn into_parts(self) -> (E::Value, ObjectKind, u32) {
        let this = ManuallyDrop::new(self);
        (this.raw, this.kind, this.refs.get())
    }

    pub(crate) fn raw(&self) -> E::Value {
        self.raw
    }

    pub(crate) fn refs(&self) -> &Cell<u32> {
        &self.refs
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn is_array(&self) -> bool {
        self.kind == ObjectKind::Array
    }

    pub fn is_function(&self) -> bool {
        self.kind == ObjectKind::Function
    }

    /// Engine references currently owned by this handle
    pub fn references(&self) -> u32 {
        self.refs.get()
    }

    /// Context that produced this handle
    pub fn context_id(&self) -> ContextId {
        self.ctx.id()
    }
}

impl<E: Engine> sealed::Sealed for JsObject<'_, E> {}

impl<E: Engine> Handle<E> for JsObject<'_, E> {
    fn raw_ref(&self) -> RawRef<E::Value> {
        RawRef {
            raw: self.raw,
            kind: self.kind,
            owner: self.ctx.id(),
        }
    }
}

impl<E: Engine> Clone for JsObject<'_, E> {
    /// A second, independent handle backed by a duplicated engine reference
    fn clone(&self) -> Self {
        let raw = self.ctx.duplicate_raw(self.raw);
        Self::adopt(self.ctx, raw, self.kind)
    }
}

impl<E: Engine> Drop for JsObject<'_, E> {
    fn drop(&mut self) {
        self.ctx.release_raw(self.raw, self.refs.get());
    }
}

impl<E: Engine> fmt::Debug for JsObject<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsObject")
            .field("kind", &self.kind)
            .field("context", &self.ctx.id())
            .field("refs", &self.refs.get())
            .finish()
    }
}

/// A value returned from the engine
pub enum Value<'ctx, E: Engine = QuickJs> {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Float(f64),
    String(String),
    Object(JsObject<'ctx, E>),
}

impl<'ctx, E: Engine> Value<'ctx, E> {
    pub(crate) fn from_primitive(primitive: Primitive) -> Self {
        match primitive {
            Primitive::Undefined => Self::Undefined,
            Primitive::Null => Self::Null,
            Primitive::Bool(b) => Self::Bool(b),
            Primitive::Int(n) => Self::Int(n),
            Primitive::Float(n) => Self::Float(n),
            Primitive::String(s) => Self::String(s),
        }
    }

    /// The primitive to recreate inside the engine, `None` for objects
    pub(crate) fn to_primitive(&self) -> Option<Primitive> {
        Some(match self {
            Self::Undefined => Primitive::Undefined,
            Self::Null => Primitive::Null,
            Self::Bool(b) => Primitive::Bool(*b),
            Self::Int(n) => Primitive::Int(*n),
            Self::Float(n) => Primitive::Float(*n),
            Self::String(s) => Primitive::String(s.clone()),
            Self::Object(_) => return None,
        })
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// `null` or `undefined`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(n) if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 => {
                Some(*n as i32)
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&JsObject<'ctx, E>> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<JsObject<'ctx, E>> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Object(object) => match object.kind() {
                ObjectKind::Object => "object",
                ObjectKind::Array => "array",
                ObjectKind::Function => "function",
            },
            other => other
                .to_primitive()
                .map(|p| p.type_name())
                .unwrap_or("object"),
        }
    }
}

impl<E: Engine> fmt::Debug for Value<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "Undefined"),
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Int(n) => write!(f, "Int({})", n),
            Self::Float(n) => write!(f, "Float({})", n),
            Self::String(s) => write!(f, "String({:?})", s),
            Self::Object(object) => write!(f, "Object({:?})", object),
        }
    }
}

impl<E: Engine> From<bool> for Value<'_, E> {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<E: Engine> From<i32> for Value<'_, E> {
    fn from(n: i32) -> Self {
        Self::Int(n)
    }
}

impl<E: Engine> From<f64> for Value<'_, E> {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl<E: Engine> From<&str> for Value<'_, E> {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl<E: Engine> From<String> for Value<'_, E> {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl<'ctx, E: Engine> From<JsObject<'ctx, E>> for Value<'ctx, E> {
    fn from(object: JsObject<'ctx, E>) -> Self {
        Self::Object(object)
    }
}
