//! In-memory module graph produced by the loader.
//!
//! A [`Module`] owns its interned string table and every [`Prototype`];
//! prototypes refer to each other by id (`protos` lists indices into the
//! module list), which keeps the graph acyclic for ownership purposes even
//! when the closure nesting is recursive.

use std::sync::Arc;

use crate::bytecode::instr::Instr;
use crate::val::Value;

/// A constant-pool entry. Scalar kinds are stored pre-converted; structured
/// kinds keep the shape the K-binding pass and the dispatch loop need.
#[derive(Debug, Clone)]
pub enum Constant {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    /// Packed import chain: `count << 30 | id0 << 20 | id1 << 10 | id2`.
    Import(u32),
    /// Template keys of a table constant; values are filled in at runtime.
    Table(Arc<[Arc<str>]>),
    /// Prototype id for `DUPCLOSURE`.
    Closure(u32),
    /// Host-constructed vector value.
    Vector(Value),
}

/// A compiled function body. Immutable once the loader returns.
#[derive(Debug)]
pub struct Prototype {
    pub max_stack_size: u8,
    pub num_params: u8,
    pub num_upvalues: u8,
    pub is_vararg: bool,
    /// Decoded instructions, with one placeholder slot per AUX word so the
    /// PC advances by exactly one per wire word.
    pub code: Vec<Instr>,
    pub constants: Vec<Constant>,
    /// Ids of nested prototypes, indexing into [`Module::protos`].
    pub protos: Vec<u32>,
    pub line_defined: u32,
    pub debug_name: Option<Arc<str>>,
    /// Per-instruction source lines, materialized from the gap-compressed
    /// wire representation when line info is present.
    pub instruction_line_info: Option<Vec<u32>>,
    /// Position of this prototype in the module list.
    pub bytecode_id: u32,
}

impl Prototype {
    pub fn debug_name_or_default(&self) -> &str {
        self.debug_name.as_deref().unwrap_or("(??)")
    }

    pub fn line_for_pc(&self, pc: usize) -> Option<u32> {
        self.instruction_line_info.as_ref().and_then(|lines| lines.get(pc).copied())
    }
}

#[derive(Debug)]
pub struct Module {
    pub strings: Vec<Arc<str>>,
    pub protos: Vec<Arc<Prototype>>,
    /// Id of the entry prototype.
    pub main_id: u32,
    pub types_version: u8,
}

impl Module {
    pub fn main(&self) -> &Arc<Prototype> {
        &self.protos[self.main_id as usize]
    }
}
