//! Generalized iteration over non-function iterables.
//!
//! The reference runtime drives these loops with a coroutine per active
//! loop; here each loop owns an [`Iteration`] state machine whose `next`
//! returns the bound key/value pair, with `None` as the end-of-stream
//! marker that replaces the coroutine's terminator sentinel.

use crate::exec::error::RunError;
use crate::val::table::TableKey;
use crate::val::{TableRef, Value};

/// Trait implemented by iterator state machines driven by generic loops.
pub trait Iteration {
    /// Advance and return the next bound pair if available.
    fn next(&mut self) -> Result<Option<(Value, Value)>, RunError>;

    /// Human readable identifier used for diagnostics.
    fn debug_name(&self) -> &'static str {
        "iterator"
    }
}

/// Build the iterator for a value, or fail when the value has no iteration
/// protocol.
pub fn make_iterator(value: &Value) -> Result<Box<dyn Iteration>, RunError> {
    match value {
        Value::Table(t) => Ok(Box::new(TableIter::new(t.clone()))),
        other => Err(RunError::msg(format!(
            "attempt to iterate over a {} value",
            other.type_name()
        ))),
    }
}

/// Iterates the array part in index order, then the string keys, then the
/// remaining hashed keys. Key snapshots are taken up front so concurrent
/// inserts during the loop do not reshuffle the walk; entries removed
/// mid-loop are skipped.
pub struct TableIter {
    table: TableRef,
    array_idx: usize,
    prop_keys: Option<Vec<std::sync::Arc<str>>>,
    prop_idx: usize,
    hash_keys: Option<Vec<TableKey>>,
    hash_idx: usize,
}

impl TableIter {
    pub fn new(table: TableRef) -> Self {
        TableIter {
            table,
            array_idx: 0,
            prop_keys: None,
            prop_idx: 0,
            hash_keys: None,
            hash_idx: 0,
        }
    }
}

impl Iteration for TableIter {
    fn next(&mut self) -> Result<Option<(Value, Value)>, RunError> {
        let table = self.table.clone();
        let table = table.borrow();

        while self.array_idx < table.array_len() {
            let idx = self.array_idx;
            self.array_idx += 1;
            if let Some(v) = table.array_get(idx)
                && !v.is_nil()
            {
                return Ok(Some((Value::Number((idx + 1) as f64), v.clone())));
            }
        }

        let prop_keys = self.prop_keys.get_or_insert_with(|| table.prop_keys());
        while self.prop_idx < prop_keys.len() {
            let key = prop_keys[self.prop_idx].clone();
            self.prop_idx += 1;
            let v = table.get_str(&key);
            if !v.is_nil() {
                return Ok(Some((Value::Str(key), v)));
            }
        }

        let hash_keys = self.hash_keys.get_or_insert_with(|| table.hash_keys());
        while self.hash_idx < hash_keys.len() {
            let key = hash_keys[self.hash_idx].clone();
            self.hash_idx += 1;
            if let Some((k, v)) = table.hashed_entry(&key) {
                return Ok(Some((k, v)));
            }
        }

        Ok(None)
    }

    fn debug_name(&self) -> &'static str {
        "table iterator"
    }
}
