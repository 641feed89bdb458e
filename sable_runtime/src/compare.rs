//! Equality and ordering over the value domain.
//!
//! Raw (primitive) rules are tried first; when none applies the comparator
//! dispatches to the `__eq` / `__lt` / `__le` metamethods through the
//! thread's trampoline, so a metamethod runs under the same quota as the
//! instruction that triggered it.

use crate::error::{RuntimeError, VmError};
use crate::thread::Thread;
use crate::value::Value;
use std::sync::Arc;

/// Raw equality.
///
/// `None` means no primitive rule applies and a metamethod must be
/// consulted. Integer-vs-float equality converts the integer to floating
/// value and compares; for integers outside the exactly-representable
/// float range this loses precision, which is the documented semantic.
pub fn raw_equal(x: &Value, y: &Value) -> Option<bool> {
    match (x, y) {
        (Value::Nil, Value::Nil) => Some(true),
        (Value::Bool(a), Value::Bool(b)) => Some(a == b),
        (Value::Int(a), Value::Int(b)) => Some(a == b),
        (Value::Float(a), Value::Float(b)) => Some(a == b),
        (Value::Int(a), Value::Float(b)) => Some(*a as f64 == *b),
        (Value::Float(a), Value::Int(b)) => Some(*a == *b as f64),
        (Value::Str(a), Value::Str(b)) => Some(a == b),
        (Value::Table(a), Value::Table(b)) if Arc::ptr_eq(a, b) => Some(true),
        (Value::Function(a), Value::Function(b)) if a.ptr_eq(b) => Some(true),
        _ => None,
    }
}

/// Equality with metamethod fallback.
///
/// Tables of distinct identity consult `__eq`; any other undecided pair is
/// simply unequal. Never fails except through a failing metamethod.
pub fn equals(thread: &Arc<Thread>, x: &Value, y: &Value) -> Result<bool, VmError> {
    if let Some(res) = raw_equal(x, y) {
        return Ok(res);
    }
    if let (Value::Table(_), Value::Table(_)) = (x, y) {
        if let Some(res) = meta_binary(thread, "__eq", x, y)? {
            return Ok(res.truth());
        }
    }
    Ok(false)
}

/// Whether `x < y`.
///
/// Native for numeric pairs (with int/float promotion) and string pairs
/// (byte order); otherwise `__lt`; otherwise a "not comparable" error.
pub fn less_than(thread: &Arc<Thread>, x: &Value, y: &Value) -> Result<bool, VmError> {
    if let Some(res) = raw_less(x, y, false) {
        return Ok(res);
    }
    if let Some(res) = meta_binary(thread, "__lt", x, y)? {
        return Ok(res.truth());
    }
    Err(RuntimeError::not_comparable("<", x.type_name(), y.type_name()).into())
}

/// Whether `x <= y`.
///
/// Native rules mirror [`less_than`]; without them the comparator tries
/// `__le`, then falls back to `not (y < x)` through `__lt` with swapped
/// operands. The derivation is legacy compatibility behavior: an error
/// raised by the derived `__lt` call still propagates.
pub fn less_or_equal(thread: &Arc<Thread>, x: &Value, y: &Value) -> Result<bool, VmError> {
    if let Some(res) = raw_less(x, y, true) {
        return Ok(res);
    }
    if let Some(res) = meta_binary(thread, "__le", x, y)? {
        return Ok(res.truth());
    }
    if let Some(res) = meta_binary(thread, "__lt", y, x)? {
        return Ok(!res.truth());
    }
    Err(RuntimeError::not_comparable("<=", x.type_name(), y.type_name()).into())
}

/// Native ordering rules shared by `<` and `<=`.
fn raw_less(x: &Value, y: &Value, or_equal: bool) -> Option<bool> {
    match (x, y) {
        (Value::Int(a), Value::Int(b)) => Some(if or_equal { a <= b } else { a < b }),
        (Value::Str(a), Value::Str(b)) => {
            Some(if or_equal { a <= b } else { a < b })
        }
        _ => {
            let a = x.as_number()?;
            let b = y.as_number()?;
            Some(if or_equal { a <= b } else { a < b })
        }
    }
}

/// Invoke a binary metamethod on whichever operand carries it.
///
/// Returns `Ok(None)` when neither operand has the metamethod.
fn meta_binary(
    thread: &Arc<Thread>,
    name: &str,
    x: &Value,
    y: &Value,
) -> Result<Option<Value>, VmError> {
    let method = match x.metamethod(name).or_else(|| y.metamethod(name)) {
        Some(m) => m,
        None => return Ok(None),
    };
    let f = method
        .as_function()
        .cloned()
        .ok_or_else(|| RuntimeError::msg(format!("metamethod {name} is not callable")))?;
    let mut results = thread.call_values(&f, &[x.clone(), y.clone()])?;
    Ok(Some(if results.is_empty() {
        Value::Nil
    } else {
        results.swap_remove(0)
    }))
}

// =============================================================================
// Tests
// =============================================================================
