//! Mutable keyed table with a contiguous 1-based array part and a hashed
//! part for everything else.
//!
//! Integral float keys normalize into the array part when they land inside
//! or directly after it; `length` is the size of the contiguous non-nil
//! array prefix, which is the only ordering guarantee tables provide.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::exec::error::RunError;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new, fast_hash_map_with_capacity};
use crate::val::Value;

pub type TableRef = Rc<RefCell<Table>>;

/// Hashable identity of a non-string, non-array key. Numbers are keyed by
/// their normalized bit pattern, reference values by pointer identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Bool(bool),
    Number(u64),
    Vector([u32; 4]),
    Obj(usize),
}

impl TableKey {
    fn from_value(value: &Value) -> Option<TableKey> {
        match value {
            Value::Nil | Value::Str(_) => None,
            Value::Bool(b) => Some(TableKey::Bool(*b)),
            Value::Number(n) => {
                if n.is_nan() {
                    return None;
                }
                // fold -0.0 onto 0.0 so the two index the same slot
                let n = if *n == 0.0 { 0.0 } else { *n };
                Some(TableKey::Number(n.to_bits()))
            }
            Value::Vector(v) => Some(TableKey::Vector(v.map(f32::to_bits))),
            Value::Table(t) => Some(TableKey::Obj(Rc::as_ptr(t) as usize)),
            Value::Closure(c) => Some(TableKey::Obj(Rc::as_ptr(c) as usize)),
            Value::Native(n) => Some(TableKey::Obj(n.addr())),
        }
    }
}

#[derive(Default)]
pub struct Table {
    array: Vec<Value>,
    props: FastHashMap<Arc<str>, Value>,
    /// Non-string hashed entries; the original key value is kept alongside
    /// so iteration can hand it back.
    hash: FastHashMap<TableKey, (Value, Value)>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_ref() -> TableRef {
        Rc::new(RefCell::new(Table::new()))
    }

    pub fn with_capacity(narray: usize, nhash: usize) -> Self {
        Table {
            array: Vec::with_capacity(narray),
            props: fast_hash_map_with_capacity(nhash),
            hash: fast_hash_map_new(),
        }
    }

    /// Length of the contiguous non-nil 1-based integer prefix.
    pub fn length(&self) -> usize {
        self.array.iter().position(Value::is_nil).unwrap_or(self.array.len())
    }

    pub fn get(&self, key: &Value) -> Value {
        match key {
            Value::Nil => Value::Nil,
            Value::Str(s) => self.get_str(s),
            Value::Number(n) => {
                if let Some(i) = int_key(*n) {
                    self.get_int(i)
                } else {
                    self.get_hashed(key)
                }
            }
            _ => self.get_hashed(key),
        }
    }

    pub fn set(&mut self, key: Value, value: Value) -> Result<(), RunError> {
        match key {
            Value::Nil => Err(RunError::msg("table index is nil")),
            Value::Number(n) if n.is_nan() => Err(RunError::msg("table index is NaN")),
            Value::Str(s) => {
                self.set_str(s, value);
                Ok(())
            }
            Value::Number(n) => {
                if let Some(i) = int_key(n) {
                    self.set_int(i, value);
                } else {
                    self.set_hashed(Value::Number(n), value);
                }
                Ok(())
            }
            other => {
                self.set_hashed(other, value);
                Ok(())
            }
        }
    }

    pub fn get_str(&self, key: &str) -> Value {
        self.props.get(key).cloned().unwrap_or(Value::Nil)
    }

    pub fn set_str(&mut self, key: Arc<str>, value: Value) {
        if value.is_nil() {
            self.props.remove(&key);
        } else {
            self.props.insert(key, value);
        }
    }

    pub fn get_int(&self, i: i64) -> Value {
        if i >= 1 && (i as usize) <= self.array.len() {
            return self.array[i as usize - 1].clone();
        }
        self.get_hashed(&Value::Number(i as f64))
    }

    pub fn set_int(&mut self, i: i64, value: Value) {
        if i >= 1 && (i as usize) <= self.array.len() {
            let idx = i as usize - 1;
            if value.is_nil() && idx + 1 == self.array.len() {
                self.array.pop();
                while matches!(self.array.last(), Some(Value::Nil)) {
                    self.array.pop();
                }
            } else {
                self.array[idx] = value;
            }
            return;
        }
        if i >= 1 && i as usize == self.array.len() + 1 {
            if value.is_nil() {
                return;
            }
            self.array.push(value);
            // pull any keys that now continue the prefix out of the hash part
            loop {
                let next = TableKey::Number(((self.array.len() + 1) as f64).to_bits());
                match self.hash.remove(&next) {
                    Some((_, v)) => self.array.push(v),
                    None => break,
                }
            }
            return;
        }
        self.set_hashed(Value::Number(i as f64), value);
    }

    fn get_hashed(&self, key: &Value) -> Value {
        match TableKey::from_value(key) {
            Some(k) => self.hash.get(&k).map(|(_, v)| v.clone()).unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    fn set_hashed(&mut self, key: Value, value: Value) {
        if let Some(k) = TableKey::from_value(&key) {
            if value.is_nil() {
                self.hash.remove(&k);
            } else {
                self.hash.insert(k, (key, value));
            }
        }
    }

    pub(crate) fn array_len(&self) -> usize {
        self.array.len()
    }

    pub(crate) fn array_get(&self, idx: usize) -> Option<&Value> {
        self.array.get(idx)
    }

    /// Snapshot of the string keys, for iteration.
    pub(crate) fn prop_keys(&self) -> Vec<Arc<str>> {
        self.props.keys().cloned().collect()
    }

    /// Snapshot of the hashed keys, for iteration.
    pub(crate) fn hash_keys(&self) -> Vec<TableKey> {
        self.hash.keys().cloned().collect()
    }

    pub(crate) fn hashed_entry(&self, key: &TableKey) -> Option<(Value, Value)> {
        self.hash.get(key).cloned()
    }
}

fn int_key(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}
