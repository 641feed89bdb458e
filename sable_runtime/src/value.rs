//! The engine-minimal value domain.
//!
//! Only what the interpreter, comparator and coroutine machinery need:
//! nil, booleans, 64-bit integers and floats, immutable strings, tables
//! with an optional metatable, and callables. The full language value
//! lattice, userdata and the garbage collector are outside this core.

use crate::error::{RuntimeError, VmError};
use crate::thread::Thread;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use sable_code::Instruction;
use std::fmt;
use std::sync::Arc;

/// Signature of a natively-implemented function.
pub type HostFn = dyn Fn(&Arc<Thread>, &[Value]) -> Result<Vec<Value>, VmError> + Send + Sync;

// =============================================================================
// Value
// =============================================================================

/// A dynamically-typed script value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Table(Arc<Table>),
    Function(Function),
}

impl Value {
    /// Build a string value.
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    /// Everything is truthy except nil and false.
    #[inline]
    pub fn truth(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Numeric view with int-to-float promotion.
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Arc<Table>> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// The type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
        }
    }

    /// The metamethod named `name` attached to this value, if any.
    ///
    /// Only tables carry metatables in this core; metamethods on other
    /// kinds belong to the excluded library layer.
    pub fn metamethod(&self, name: &str) -> Option<Value> {
        let table = self.as_table()?;
        let meta = table.metatable()?;
        let m = meta.raw_get(&Value::str(name)).ok()?;
        if m.is_nil() { None } else { Some(m) }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Table(t) => write!(f, "table: {:p}", Arc::as_ptr(t)),
            Value::Function(_) => write!(f, "function"),
        }
    }
}

// =============================================================================
// Tables
// =============================================================================

/// Normalized table key. Float keys holding an exact integer collapse to
/// the integer key; nil and NaN keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TableKey {
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    Str(Arc<str>),
    Table(usize),
    Function(usize),
}

impl TableKey {
    fn normalize(v: &Value) -> Result<TableKey, RuntimeError> {
        Ok(match v {
            Value::Nil => return Err(RuntimeError::msg("table index is nil")),
            Value::Bool(b) => TableKey::Bool(*b),
            Value::Int(n) => TableKey::Int(*n),
            Value::Float(f) => {
                if f.is_nan() {
                    return Err(RuntimeError::msg("table index is NaN"));
                }
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    TableKey::Int(*f as i64)
                } else {
                    TableKey::FloatBits(f.to_bits())
                }
            }
            Value::Str(s) => TableKey::Str(Arc::clone(s)),
            Value::Table(t) => TableKey::Table(Arc::as_ptr(t) as usize),
            Value::Function(f) => TableKey::Function(f.addr()),
        })
    }
}

/// A mutable associative table with an optional metatable.
#[derive(Default)]
pub struct Table {
    inner: RwLock<TableData>,
}

#[derive(Default)]
struct TableData {
    map: FxHashMap<TableKey, Value>,
    metatable: Option<Arc<Table>>,
}

impl Table {
    pub fn new() -> Arc<Table> {
        Arc::new(Table::default())
    }

    /// Read a value without consulting metamethods. Missing keys read nil.
    pub fn raw_get(&self, key: &Value) -> Result<Value, RuntimeError> {
        let key = TableKey::normalize(key)?;
        Ok(self
            .inner
            .read()
            .map
            .get(&key)
            .cloned()
            .unwrap_or(Value::Nil))
    }

    /// Write a value without consulting metamethods. Writing nil removes
    /// the key.
    pub fn raw_set(&self, key: &Value, value: Value) -> Result<(), RuntimeError> {
        let key = TableKey::normalize(key)?;
        let mut data = self.inner.write();
        if value.is_nil() {
            data.map.remove(&key);
        } else {
            data.map.insert(key, value);
        }
        Ok(())
    }

    /// A border of the integer-keyed part: the largest `n` with keys
    /// `1..=n` all present.
    pub fn len(&self) -> i64 {
        let data = self.inner.read();
        let mut n = 0i64;
        while data.map.contains_key(&TableKey::Int(n + 1)) {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().map.is_empty()
    }

    pub fn metatable(&self) -> Option<Arc<Table>> {
        self.inner.read().metatable.clone()
    }

    pub fn set_metatable(&self, meta: Option<Arc<Table>>) {
        self.inner.write().metatable = meta;
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table: {:p}", self)
    }
}

// =============================================================================
// Functions and Chunks
// =============================================================================

/// A callable: either a host (native) function or a compiled chunk.
#[derive(Clone)]
pub enum Function {
    Host(Arc<HostFn>),
    Lua(Arc<Chunk>),
}

impl Function {
    /// Wrap a Rust closure as a host function.
    pub fn host<F>(f: F) -> Function
    where
        F: Fn(&Arc<Thread>, &[Value]) -> Result<Vec<Value>, VmError> + Send + Sync + 'static,
    {
        Function::Host(Arc::new(f))
    }

    /// Identity address, used for raw equality and table keys.
    pub(crate) fn addr(&self) -> usize {
        match self {
            Function::Host(f) => Arc::as_ptr(f) as *const () as usize,
            Function::Lua(c) => Arc::as_ptr(c) as usize,
        }
    }

    /// Pointer identity.
    pub fn ptr_eq(&self, other: &Function) -> bool {
        self.addr() == other.addr()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Host(_) => write!(f, "host function"),
            Function::Lua(_) => write!(f, "lua function"),
        }
    }
}

/// A compiled function body: the packed instruction stream, its constant
/// pool and the register window size it needs.
#[derive(Debug)]
pub struct Chunk {
    pub code: Vec<Instruction>,
    pub consts: Vec<Value>,
    pub reg_count: u16,
}

impl Chunk {
    pub fn new(code: Vec<Instruction>, consts: Vec<Value>, reg_count: u16) -> Arc<Chunk> {
        Arc::new(Chunk {
            code,
            consts,
            reg_count,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.truth());
        assert!(!Value::Bool(false).truth());
        assert!(Value::Bool(true).truth());
        assert!(Value::Int(0).truth());
        assert!(Value::Float(0.0).truth());
        assert!(Value::str("").truth());
    }

    #[test]
    fn test_table_raw_get_set() {
        let t = Table::new();
        t.raw_set(&Value::str("k"), Value::Int(7)).unwrap();
        assert_eq!(t.raw_get(&Value::str("k")).unwrap().as_int(), Some(7));
        assert!(t.raw_get(&Value::str("missing")).unwrap().is_nil());
    }

    #[test]
    fn test_table_nil_write_removes() {
        let t = Table::new();
        t.raw_set(&Value::Int(1), Value::Int(1)).unwrap();
        t.raw_set(&Value::Int(1), Value::Nil).unwrap();
        assert!(t.is_empty());
    }

    #[test]
    fn test_table_key_normalization() {
        let t = Table::new();
        t.raw_set(&Value::Float(2.0), Value::str("two")).unwrap();
        // 2.0 and 2 are the same key.
        assert!(!t.raw_get(&Value::Int(2)).unwrap().is_nil());
        assert!(t.raw_set(&Value::Nil, Value::Int(1)).is_err());
        assert!(t.raw_set(&Value::Float(f64::NAN), Value::Int(1)).is_err());
    }

    #[test]
    fn test_table_len_border() {
        let t = Table::new();
        for i in 1..=4 {
            t.raw_set(&Value::Int(i), Value::Int(i * 10)).unwrap();
        }
        t.raw_set(&Value::Int(9), Value::Int(90)).unwrap();
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_metamethod_lookup() {
        let t = Table::new();
        assert!(Value::Table(Arc::clone(&t)).metamethod("__eq").is_none());
        let meta = Table::new();
        meta.raw_set(
            &Value::str("__eq"),
            Value::Function(Function::host(|_, _| Ok(vec![Value::Bool(true)]))),
        )
        .unwrap();
        t.set_metatable(Some(meta));
        assert!(Value::Table(t).metamethod("__eq").is_some());
    }

    #[test]
    fn test_function_identity() {
        let f = Function::host(|_, _| Ok(vec![]));
        let g = f.clone();
        assert!(f.ptr_eq(&g));
        let h = Function::host(|_, _| Ok(vec![]));
        assert!(!f.ptr_eq(&h));
    }
}
