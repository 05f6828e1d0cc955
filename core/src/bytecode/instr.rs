//! Decoded instruction records.
//!
//! Pass 1 of the loader turns each 32-bit code word into an [`Instr`] with
//! its operands pre-extracted; pass 2 fills in the `K` references from the
//! constant pool so the dispatch loop never touches raw constant indices.

use std::fmt;
use std::sync::Arc;

use crate::bytecode::opcode::Opcode;
use crate::val::Value;

/// A constant reference resolved by the K-binding pass.
#[derive(Debug, Clone, Default)]
pub enum KRef {
    #[default]
    None,
    /// A directly usable value (scalar constants, strings, vectors, booleans
    /// from the AUX low bit, and pre-resolved imports).
    Value(Value),
    /// Key template of a table-shaped constant (`DUPTABLE`).
    Keys(Arc<[Arc<str>]>),
    /// Prototype id of a closure-shaped constant (`DUPCLOSURE`).
    Proto(u32),
    /// Loop-variable count nibble (`FORGLOOP`).
    VarCount(u8),
}

#[derive(Debug, Clone)]
pub struct Instr {
    /// Decoded opcode; `None` for bytes outside the opcode table, which the
    /// dispatch loop warns about and skips.
    pub op: Option<Opcode>,
    /// Raw opcode byte, kept for diagnostics on unknown instructions.
    pub opbyte: u8,
    pub a: u8,
    pub b: u8,
    pub c: u8,
    /// Signed 16-bit operand occupying the top half of the word.
    pub d: i16,
    /// Signed 24-bit operand occupying everything above the opcode byte.
    pub e: i32,
    /// AUX word following the instruction, when the opcode carries one.
    pub aux: u32,
    pub k: KRef,
    /// Negation flag from the AUX sign bit (JUMPXEQK* family).
    pub kn: bool,
    /// Import-chain constants (`GETIMPORT`), in walk order.
    pub k0: Option<Value>,
    pub k1: Option<Value>,
    pub k2: Option<Value>,
    /// Number of import-chain steps encoded in the AUX top bits.
    pub kc: u8,
}

impl Instr {
    pub(crate) fn decode(word: u32) -> Self {
        let opbyte = (word & 0xFF) as u8;
        let op = Opcode::from_byte(opbyte);
        let mut instr = Instr {
            op,
            opbyte,
            a: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            aux: 0,
            k: KRef::None,
            kn: false,
            k0: None,
            k1: None,
            k2: None,
            kc: 0,
        };
        use crate::bytecode::opcode::OpMode;
        let mode = match op {
            Some(op) => op.info().mode,
            None => OpMode::None,
        };
        match mode {
            OpMode::None => {}
            OpMode::A => {
                instr.a = (word >> 8) as u8;
            }
            OpMode::Ab => {
                instr.a = (word >> 8) as u8;
                instr.b = (word >> 16) as u8;
            }
            OpMode::Abc => {
                instr.a = (word >> 8) as u8;
                instr.b = (word >> 16) as u8;
                instr.c = (word >> 24) as u8;
            }
            OpMode::Ad => {
                instr.a = (word >> 8) as u8;
                instr.d = (word >> 16) as i16;
            }
            OpMode::Ae => {
                instr.e = (word as i32) >> 8;
            }
        }
        instr
    }

    /// Placeholder occupying the code slot of an AUX word, so that jump
    /// deltas measured in words stay valid against the decoded sequence.
    pub(crate) fn aux_slot() -> Self {
        Instr {
            op: Some(Opcode::Nop),
            opbyte: Opcode::Nop as u8,
            a: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            aux: 0,
            k: KRef::None,
            kn: false,
            k0: None,
            k1: None,
            k2: None,
            kc: 0,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self.op {
            Some(op) => op.mnemonic(),
            None => "UNKNOWN",
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} a={} b={} c={} d={} e={}",
            self.mnemonic(),
            self.a,
            self.b,
            self.c,
            self.d,
            self.e
        )
    }
}
