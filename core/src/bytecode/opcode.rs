//! Static per-opcode metadata: operand layout, constant-binding mode, and
//! whether an AUX word follows the instruction.

use once_cell::sync::Lazy;

/// Operand layout of an instruction word. The low byte is always the opcode;
/// the remaining 24 bits are carved up per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    /// No operands.
    None,
    /// A only.
    A,
    /// A and B.
    Ab,
    /// A, B and C.
    Abc,
    /// A and signed 16-bit D.
    Ad,
    /// Signed 24-bit E.
    Ae,
}

/// How the loader's constant-binding pass populates the instruction's `K`
/// references. Mode numbers follow the wire-format convention:
///
/// - 0: no constant
/// - 1: `K = constants[aux]`
/// - 2: `K = constants[C]`
/// - 3: `K = constants[D]`
/// - 4: AUX is a packed import chain (`K0`/`K1`/`K2`/`KC`)
/// - 5: `K = aux & 1` as a boolean, `KN = aux >> 31`
/// - 6: `K = constants[aux & 0xFFFFFF]`, `KN = aux >> 31`
/// - 7: `K = constants[B]`
/// - 8: `K = aux & 0xF` (loop-variable count nibble)
pub type KMode = u8;

#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub mnemonic: &'static str,
    pub mode: OpMode,
    pub kmode: KMode,
    pub has_aux: bool,
}

macro_rules! opcodes {
    ($(($variant:ident, $byte:literal, $name:literal, $mode:ident, $kmode:literal, $aux:literal),)+) => {
        /// The full instruction set, one variant per opcode byte.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($variant = $byte,)+
        }

        pub const OP_COUNT: usize = [$($byte),+].len();

        impl Opcode {
            /// Decode an opcode byte. Bytes outside the table are left to the
            /// dispatch loop to warn about (or to the loader to reject, when
            /// unknown opcodes are configured as fatal).
            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $($byte => Some(Opcode::$variant),)+
                    _ => None,
                }
            }
        }

        static INFO: Lazy<[OpInfo; OP_COUNT]> = Lazy::new(|| {
            [$(OpInfo {
                mnemonic: $name,
                mode: OpMode::$mode,
                kmode: $kmode,
                has_aux: $aux,
            },)+]
        });
    };
}

opcodes! {
    (Nop,           0, "NOP",            None, 0, false),
    (Break,         1, "BREAK",          None, 0, false),
    (LoadNil,       2, "LOADNIL",        A,    0, false),
    (LoadB,         3, "LOADB",          Abc,  0, false),
    (LoadN,         4, "LOADN",          Ad,   0, false),
    (LoadK,         5, "LOADK",          Ad,   3, false),
    (Move,          6, "MOVE",           Ab,   0, false),
    (GetGlobal,     7, "GETGLOBAL",      Abc,  1, true),
    (SetGlobal,     8, "SETGLOBAL",      Abc,  1, true),
    (GetUpval,      9, "GETUPVAL",       Ab,   0, false),
    (SetUpval,     10, "SETUPVAL",       Ab,   0, false),
    (CloseUpvals,  11, "CLOSEUPVALS",    A,    0, false),
    (GetImport,    12, "GETIMPORT",      Ad,   4, true),
    (GetTable,     13, "GETTABLE",       Abc,  0, false),
    (SetTable,     14, "SETTABLE",       Abc,  0, false),
    (GetTableKs,   15, "GETTABLEKS",     Abc,  1, true),
    (SetTableKs,   16, "SETTABLEKS",     Abc,  1, true),
    (GetTableN,    17, "GETTABLEN",      Abc,  0, false),
    (SetTableN,    18, "SETTABLEN",      Abc,  0, false),
    (NewClosure,   19, "NEWCLOSURE",     Ad,   0, false),
    (Namecall,     20, "NAMECALL",       Abc,  1, true),
    (Call,         21, "CALL",           Abc,  0, false),
    (Return,       22, "RETURN",         Ab,   0, false),
    (Jump,         23, "JUMP",           Ad,   0, false),
    (JumpBack,     24, "JUMPBACK",       Ad,   0, false),
    (JumpIf,       25, "JUMPIF",         Ad,   0, false),
    (JumpIfNot,    26, "JUMPIFNOT",      Ad,   0, false),
    (JumpIfEq,     27, "JUMPIFEQ",       Ad,   0, true),
    (JumpIfLe,     28, "JUMPIFLE",       Ad,   0, true),
    (JumpIfLt,     29, "JUMPIFLT",       Ad,   0, true),
    (JumpIfNotEq,  30, "JUMPIFNOTEQ",    Ad,   0, true),
    (JumpIfNotLe,  31, "JUMPIFNOTLE",    Ad,   0, true),
    (JumpIfNotLt,  32, "JUMPIFNOTLT",    Ad,   0, true),
    (Add,          33, "ADD",            Abc,  0, false),
    (Sub,          34, "SUB",            Abc,  0, false),
    (Mul,          35, "MUL",            Abc,  0, false),
    (Div,          36, "DIV",            Abc,  0, false),
    (Mod,          37, "MOD",            Abc,  0, false),
    (Pow,          38, "POW",            Abc,  0, false),
    (AddK,         39, "ADDK",           Abc,  2, false),
    (SubK,         40, "SUBK",           Abc,  2, false),
    (MulK,         41, "MULK",           Abc,  2, false),
    (DivK,         42, "DIVK",           Abc,  2, false),
    (ModK,         43, "MODK",           Abc,  2, false),
    (PowK,         44, "POWK",           Abc,  2, false),
    (And,          45, "AND",            Abc,  0, false),
    (Or,           46, "OR",             Abc,  0, false),
    (AndK,         47, "ANDK",           Abc,  2, false),
    (OrK,          48, "ORK",            Abc,  2, false),
    (Concat,       49, "CONCAT",         Abc,  0, false),
    (Not,          50, "NOT",            Ab,   0, false),
    (Minus,        51, "MINUS",          Ab,   0, false),
    (Length,       52, "LENGTH",         Ab,   0, false),
    (NewTable,     53, "NEWTABLE",       Ab,   0, true),
    (DupTable,     54, "DUPTABLE",       Ad,   3, false),
    (SetList,      55, "SETLIST",        Abc,  0, true),
    (ForNPrep,     56, "FORNPREP",       Ad,   0, false),
    (ForNLoop,     57, "FORNLOOP",       Ad,   0, false),
    (ForGLoop,     58, "FORGLOOP",       Ad,   8, true),
    (ForGPrepINext,59, "FORGPREP_INEXT", Ad,   0, false),
    (FastCall3,    60, "FASTCALL3",      Abc,  0, true),
    (ForGPrepNext, 61, "FORGPREP_NEXT",  Ad,   0, false),
    (NativeCall,   62, "NATIVECALL",     None, 0, false),
    (GetVarargs,   63, "GETVARARGS",     Ab,   0, false),
    (DupClosure,   64, "DUPCLOSURE",     Ad,   3, false),
    (PrepVarargs,  65, "PREPVARARGS",    A,    0, false),
    (LoadKX,       66, "LOADKX",         A,    1, true),
    (JumpX,        67, "JUMPX",          Ae,   0, false),
    (FastCall,     68, "FASTCALL",       Abc,  0, false),
    (Coverage,     69, "COVERAGE",       Ae,   0, false),
    (Capture,      70, "CAPTURE",        Ab,   0, false),
    (SubRK,        71, "SUBRK",          Abc,  7, false),
    (DivRK,        72, "DIVRK",          Abc,  7, false),
    (FastCall1,    73, "FASTCALL1",      Abc,  0, false),
    (FastCall2,    74, "FASTCALL2",      Abc,  0, true),
    (FastCall2K,   75, "FASTCALL2K",     Abc,  0, true),
    (ForGPrep,     76, "FORGPREP",       Ad,   0, false),
    (JumpXEqKNil,  77, "JUMPXEQKNIL",    Ad,   5, true),
    (JumpXEqKB,    78, "JUMPXEQKB",      Ad,   5, true),
    (JumpXEqKN,    79, "JUMPXEQKN",      Ad,   6, true),
    (JumpXEqKS,    80, "JUMPXEQKS",      Ad,   6, true),
    (IDiv,         81, "IDIV",           Abc,  0, false),
    (IDivK,        82, "IDIVK",          Abc,  2, false),
}

impl Opcode {
    #[inline]
    pub fn info(self) -> &'static OpInfo {
        &INFO[self as usize]
    }

    #[inline]
    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    #[inline]
    pub fn has_aux(self) -> bool {
        self.info().has_aux
    }
}
