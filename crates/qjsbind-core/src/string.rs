//! String conversion between Rust and QuickJS

use rquickjs_sys as qjs;
use std::ffi::CString;
use std::mem::MaybeUninit;
use std::slice;

use crate::error::EngineResult;

/// Convert a JS value to a Rust string using the engine's `ToString`.
///
/// Returns `None` if the conversion itself throws; the pending exception is
/// cleared in that case.
///
/// # Safety
/// `ctx` must be a live context and `value` a value owned by it.
pub unsafe fn js_string_to_rust(ctx: *mut qjs::JSContext, value: qjs::JSValue) -> Option<String> {
    let mut len = MaybeUninit::uninit();
    // SAFETY: ctx and value are valid per caller contract
    unsafe {
        let ptr = qjs::JS_ToCStringLen(ctx, len.as_mut_ptr(), value);
        if ptr.is_null() {
            let pending = qjs::JS_GetException(ctx);
            qjs::JS_FreeValue(ctx, pending);
            return None;
        }

        let len = len.assume_init() as usize;
        let bytes = slice::from_raw_parts(ptr as *const u8, len);
        let result = String::from_utf8_lossy(bytes).into_owned();
        qjs::JS_FreeCString(ctx, ptr);
        Some(result)
    }
}

/// Null-terminated copy of a Rust string for the C API
pub fn to_cstring(s: &str) -> EngineResult<CString> {
    Ok(CString::new(s)?)
}
