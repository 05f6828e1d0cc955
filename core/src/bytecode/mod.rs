//! Bytecode subsystem: wire-format reader, opcode metadata, the module
//! loader, and the byte-level builder used to synthesize fixtures.

pub mod builder;
pub mod instr;
pub mod loader;
pub mod module;
pub mod opcode;
pub mod reader;

pub use instr::{Instr, KRef};
pub use loader::load_module;
pub use module::{Constant, Module, Prototype};
pub use opcode::{OpInfo, OpMode, Opcode};
pub use reader::Reader;
