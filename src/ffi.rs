//! C-callable boundary.
//!
//! Opaque handles wrap a type-erased column or an interpreter. Every entry
//! point is non-throwing: panics are caught and translated, errors become
//! null returns (constructors) or neutral values with a report into the
//! diagnostic channel (accessors). Strings are NUL-terminated host bytes.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::column::{AnyColumn, Bf16, Column};
use crate::error::{self, ErrorCode, ErrorRecord};
use crate::interpreter::Interpreter;

/// Type codes of the C surface
pub const COLVEX_TYPE_I32: u32 = 0;
pub const COLVEX_TYPE_F32: u32 = 1;
pub const COLVEX_TYPE_BF16: u32 = 2;

/// Opaque column handle
pub struct ColvexColumn {
    inner: AnyColumn,
}

/// Opaque interpreter handle
pub struct ColvexInterpreter {
    inner: Interpreter,
}

fn report_ffi(operation: &'static str, message: &'static str) {
    error::report(ErrorRecord::new(
        ErrorCode::InvalidOperation,
        "ffi",
        operation,
        message,
    ));
}

fn boxed_column(inner: AnyColumn) -> *mut ColvexColumn {
    Box::into_raw(Box::new(ColvexColumn { inner }))
}

/// Create a column of `size` elements filled with `fill`, all present.
/// Returns null for an unknown type code or on allocation failure.
#[unsafe(no_mangle)]
pub extern "C" fn colvex_column_create(ty: u32, size: usize, fill: f64) -> *mut ColvexColumn {
    catch_unwind(AssertUnwindSafe(|| {
        let column = match ty {
            COLVEX_TYPE_I32 => Column::with_fill(size, fill as i32).map(AnyColumn::I32),
            COLVEX_TYPE_F32 => Column::with_fill(size, fill as f32).map(AnyColumn::F32),
            COLVEX_TYPE_BF16 => {
                Column::with_fill(size, Bf16::from_f32(fill as f32)).map(AnyColumn::Bf16)
            }
            _ => {
                report_ffi("column_create", "unknown type code");
                return std::ptr::null_mut();
            }
        };
        match column {
            Ok(inner) => boxed_column(inner),
            Err(_) => {
                report_ffi("column_create", "allocation failed");
                std::ptr::null_mut()
            }
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

#[unsafe(no_mangle)]
pub extern "C" fn colvex_column_create_i32(size: usize, value: i32) -> *mut ColvexColumn {
    colvex_column_create(COLVEX_TYPE_I32, size, value as f64)
}

#[unsafe(no_mangle)]
pub extern "C" fn colvex_column_create_f32(size: usize, value: f32) -> *mut ColvexColumn {
    colvex_column_create(COLVEX_TYPE_F32, size, value as f64)
}

/// Destroy a column handle; null is a no-op.
///
/// # Safety
/// `col` must be a handle returned by this library that has not yet been
/// destroyed or transferred to an interpreter.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn colvex_column_destroy(col: *mut ColvexColumn) {
    if !col.is_null() {
        drop(unsafe { Box::from_raw(col) });
    }
}

/// # Safety
/// `col` must be a live handle or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn colvex_column_size(col: *const ColvexColumn) -> usize {
    match unsafe { col.as_ref() } {
        Some(handle) => handle.inner.len(),
        None => 0,
    }
}

/// Type code of a column, or `u32::MAX` for null.
///
/// # Safety
/// `col` must be a live handle or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn colvex_column_type(col: *const ColvexColumn) -> u32 {
    match unsafe { col.as_ref() } {
        Some(handle) => match handle.inner {
            AnyColumn::I32(_) => COLVEX_TYPE_I32,
            AnyColumn::F32(_) => COLVEX_TYPE_F32,
            AnyColumn::Bf16(_) => COLVEX_TYPE_BF16,
        },
        None => u32::MAX,
    }
}

/// Read an i32 lane. Wrong handle type or a bad index reports into the
/// diagnostic channel and returns 0.
///
/// # Safety
/// `col` must be a live handle or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn colvex_column_get_i32(col: *const ColvexColumn, index: usize) -> i32 {
    let Some(handle) = (unsafe { col.as_ref() }) else {
        report_ffi("get_i32", "null column handle");
        return 0;
    };
    let AnyColumn::I32(column) = &handle.inner else {
        report_ffi("get_i32", "column is not i32");
        return 0;
    };
    if index >= column.len() {
        report_ffi("get_i32", "index out of range");
        return 0;
    }
    column.value_unchecked(index)
}

/// Read an f32 lane; same error discipline as [`colvex_column_get_i32`].
///
/// # Safety
/// `col` must be a live handle or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn colvex_column_get_f32(col: *const ColvexColumn, index: usize) -> f32 {
    let Some(handle) = (unsafe { col.as_ref() }) else {
        report_ffi("get_f32", "null column handle");
        return 0.0;
    };
    let AnyColumn::F32(column) = &handle.inner else {
        report_ffi("get_f32", "column is not f32");
        return 0.0;
    };
    if index >= column.len() {
        report_ffi("get_f32", "index out of range");
        return 0.0;
    }
    column.value_unchecked(index)
}

/// Whether the lane at `index` is present; out-of-range reads as absent.
///
/// # Safety
/// `col` must be a live handle or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn colvex_column_present(col: *const ColvexColumn, index: usize) -> bool {
    match unsafe { col.as_ref() } {
        Some(handle) => index < handle.inner.len() && handle.inner.presence().test_unchecked(index),
        None => false,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn colvex_interpreter_create() -> *mut ColvexInterpreter {
    catch_unwind(AssertUnwindSafe(|| {
        Box::into_raw(Box::new(ColvexInterpreter {
            inner: Interpreter::new(),
        }))
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// # Safety
/// `interp` must be a handle returned by [`colvex_interpreter_create`]
/// that has not yet been destroyed, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn colvex_interpreter_destroy(interp: *mut ColvexInterpreter) {
    if !interp.is_null() {
        drop(unsafe { Box::from_raw(interp) });
    }
}

/// Bind a column under `name`, transferring ownership of the column
/// handle to the interpreter (the handle is consumed even when the name
/// is invalid). Returns false on any error.
///
/// # Safety
/// `interp` and `col` must be live handles or null; `name` must be a
/// NUL-terminated string or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn colvex_interpreter_register(
    interp: *mut ColvexInterpreter,
    name: *const c_char,
    col: *mut ColvexColumn,
) -> bool {
    if col.is_null() {
        report_ffi("register", "null column handle");
        return false;
    }
    let column = unsafe { Box::from_raw(col) };
    let Some(interp) = (unsafe { interp.as_mut() }) else {
        report_ffi("register", "null interpreter handle");
        return false;
    };
    if name.is_null() {
        report_ffi("register", "null name");
        return false;
    }
    let Ok(name) = unsafe { CStr::from_ptr(name) }.to_str() else {
        report_ffi("register", "name is not valid utf-8");
        return false;
    };
    catch_unwind(AssertUnwindSafe(|| {
        interp.inner.register(name, column.inner);
        true
    }))
    .unwrap_or(false)
}

/// Evaluate an expression; returns a freshly allocated column handle
/// owned by the caller, or null on any error.
///
/// # Safety
/// `interp` must be a live handle or null; `expression` must be a
/// NUL-terminated string or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn colvex_interpreter_eval(
    interp: *mut ColvexInterpreter,
    expression: *const c_char,
) -> *mut ColvexColumn {
    let Some(interp) = (unsafe { interp.as_mut() }) else {
        report_ffi("eval", "null interpreter handle");
        return std::ptr::null_mut();
    };
    if expression.is_null() {
        report_ffi("eval", "null expression");
        return std::ptr::null_mut();
    }
    let Ok(expression) = unsafe { CStr::from_ptr(expression) }.to_str() else {
        report_ffi("eval", "expression is not valid utf-8");
        return std::ptr::null_mut();
    };
    catch_unwind(AssertUnwindSafe(|| match interp.inner.eval(expression) {
        Ok(column) => boxed_column(column),
        Err(_) => {
            report_ffi("eval", "evaluation failed");
            std::ptr::null_mut()
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// # Safety
/// `interp` must be a live handle or null; `name` must be a
/// NUL-terminated string or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn colvex_interpreter_has_column(
    interp: *const ColvexInterpreter,
    name: *const c_char,
) -> bool {
    let Some(interp) = (unsafe { interp.as_ref() }) else {
        return false;
    };
    if name.is_null() {
        return false;
    }
    match unsafe { CStr::from_ptr(name) }.to_str() {
        Ok(name) => interp.inner.has(name),
        Err(_) => false,
    }
}

/// Number of registered columns, 0 for null.
///
/// # Safety
/// `interp` must be a live handle or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn colvex_interpreter_size(interp: *const ColvexInterpreter) -> usize {
    match unsafe { interp.as_ref() } {
        Some(interp) => interp.inner.size(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_column_lifecycle() {
        let col = colvex_column_create_i32(4, 7);
        assert!(!col.is_null());
        unsafe {
            assert_eq!(colvex_column_size(col), 4);
            assert_eq!(colvex_column_type(col), COLVEX_TYPE_I32);
            assert_eq!(colvex_column_get_i32(col, 2), 7);
            assert!(colvex_column_present(col, 0));
            colvex_column_destroy(col);
        }
    }

    #[test]
    fn test_bad_type_code_returns_null() {
        assert!(colvex_column_create(99, 4, 0.0).is_null());
    }

    #[test]
    fn test_wrong_type_access_reports_and_returns_zero() {
        let col = colvex_column_create_f32(2, 1.5);
        let before = crate::error::collector().len();
        unsafe {
            assert_eq!(colvex_column_get_i32(col, 0), 0);
            assert!(crate::error::collector().len() > before);
            assert_eq!(colvex_column_get_f32(col, 0), 1.5);
            colvex_column_destroy(col);
        }
    }

    #[test]
    fn test_interpreter_register_and_eval() {
        unsafe {
            let interp = colvex_interpreter_create();
            assert!(!interp.is_null());

            let a = colvex_column_create_i32(3, 2);
            let b = colvex_column_create_i32(3, 40);
            let name_a = CString::new("a").unwrap();
            let name_b = CString::new("b").unwrap();
            assert!(colvex_interpreter_register(interp, name_a.as_ptr(), a));
            assert!(colvex_interpreter_register(interp, name_b.as_ptr(), b));
            assert!(colvex_interpreter_has_column(interp, name_a.as_ptr()));
            assert_eq!(colvex_interpreter_size(interp), 2);

            let expr = CString::new("a + b").unwrap();
            let out = colvex_interpreter_eval(interp, expr.as_ptr());
            assert!(!out.is_null());
            assert_eq!(colvex_column_size(out), 3);
            assert_eq!(colvex_column_get_i32(out, 0), 42);

            colvex_column_destroy(out);
            colvex_interpreter_destroy(interp);
        }
    }

    #[test]
    fn test_eval_error_returns_null() {
        unsafe {
            let interp = colvex_interpreter_create();
            let expr = CString::new("nope + 1").unwrap();
            let out = colvex_interpreter_eval(interp, expr.as_ptr());
            assert!(out.is_null());
            colvex_interpreter_destroy(interp);
        }
    }

    #[test]
    fn test_null_handles_are_safe() {
        unsafe {
            assert_eq!(colvex_column_size(std::ptr::null()), 0);
            assert_eq!(colvex_column_type(std::ptr::null()), u32::MAX);
            assert!(!colvex_column_present(std::ptr::null(), 0));
            assert_eq!(colvex_interpreter_size(std::ptr::null()), 0);
            colvex_column_destroy(std::ptr::null_mut());
            colvex_interpreter_destroy(std::ptr::null_mut());
        }
    }
}
