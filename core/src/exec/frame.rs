//! Per-invocation frame state.

use std::cell::RefCell;
use std::rc::Rc;

use crate::exec::upvalue::UpvalueCell;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::Value;
use crate::val::iter::Iteration;

/// Register stack shared between the frame and any open upvalue cells
/// aliasing its slots.
pub type RegStack = Rc<RefCell<Vec<Value>>>;

pub(crate) struct Frame {
    pub stack: RegStack,
    pub varargs: Vec<Value>,
    /// Highest live register index, only meaningful after a multi-return
    /// CALL/GETVARARGS/RETURN/SETLIST participant.
    pub top: isize,
    /// Open cells by register index. Cells leave this map when closed.
    pub open_upvalues: FastHashMap<usize, UpvalueCell>,
    /// Live generalized iterators, keyed by the pc of their loop
    /// instruction.
    pub iterators: FastHashMap<usize, Box<dyn Iteration>>,
}

impl Frame {
    pub fn new(max_stack: usize) -> Self {
        Frame {
            stack: Rc::new(RefCell::new(vec![Value::Nil; max_stack])),
            varargs: Vec::new(),
            top: -1,
            open_upvalues: fast_hash_map_new(),
            iterators: fast_hash_map_new(),
        }
    }

    #[inline]
    pub fn reg(&self, index: usize) -> Value {
        self.stack.borrow().get(index).cloned().unwrap_or(Value::Nil)
    }

    #[inline]
    pub fn set_reg(&self, index: usize, value: Value) {
        let mut regs = self.stack.borrow_mut();
        if index >= regs.len() {
            regs.resize(index + 1, Value::Nil);
        }
        regs[index] = value;
    }

    /// Clone a contiguous run of registers, padding with nil past the end.
    pub fn read_span(&self, start: usize, count: usize) -> Vec<Value> {
        let regs = self.stack.borrow();
        (start..start + count)
            .map(|i| regs.get(i).cloned().unwrap_or(Value::Nil))
            .collect()
    }

    /// The shared open cell for a register, created on first capture.
    pub fn open_cell(&mut self, index: usize) -> UpvalueCell {
        self.open_upvalues
            .entry(index)
            .or_insert_with(|| UpvalueCell::open(self.stack.clone(), index))
            .clone()
    }

    /// Close every open cell aliasing register `from` or above.
    pub fn close_upvalues_from(&mut self, from: usize) {
        self.open_upvalues.retain(|&index, cell| {
            if index >= from {
                cell.close();
                false
            } else {
                true
            }
        });
    }

    /// Frame-exit duties: close remaining open cells and drop live
    /// iterators.
    pub fn close_all(&mut self) {
        self.close_upvalues_from(0);
        self.iterators.clear();
    }
}
