//! Host callbacks fired from inside the dispatch loop.

use std::rc::Rc;
use std::sync::Arc;

use crate::bytecode::module::{Module, Prototype};
use crate::exec::frame::RegStack;
use crate::exec::upvalue::UpvalueCell;
use crate::val::Value;

/// Snapshot handed to the step and break hooks before an instruction
/// executes. The register stack is the live one — hooks may mutate it.
pub struct StepEvent<'a> {
    pub stack: &'a RegStack,
    pub pc: usize,
    pub proto: &'a Prototype,
    pub module: &'a Arc<Module>,
    pub upvalues: &'a [UpvalueCell],
}

pub type StepFn = Rc<dyn Fn(&StepEvent<'_>)>;
pub type InterruptFn = Rc<dyn Fn()>;
pub type PanicFn = Rc<dyn Fn(&Value)>;

/// Hook bundle. All hooks run synchronously between instructions:
///
/// - `step` before every executed instruction;
/// - `break_hook` on `BREAK` (without it, `BREAK` only logs a warning);
/// - `interrupt` before `CALL`, `RETURN`, `JUMPBACK`, `JUMPX` and each
///   numeric/generic loop iteration — every point that can loop or yield
///   control, which makes it the place to enforce deadlines or call a
///   script handle's `close`;
/// - `panic` once at protected-call failure, with the raw error payload.
#[derive(Default, Clone)]
pub struct CallHooks {
    pub step: Option<StepFn>,
    pub break_hook: Option<StepFn>,
    pub interrupt: Option<InterruptFn>,
    pub panic: Option<PanicFn>,
}
