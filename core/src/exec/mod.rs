//! Execution subsystem: closures, frames, upvalues, the dispatch loop and
//! the protected-call boundary.

pub mod closure;
pub mod error;
pub mod frame;
pub mod upvalue;
pub mod vm;

pub(crate) mod arith;
pub(crate) mod dispatch;

pub use closure::{Closure, NativeCallable, NativeFn};
pub use error::RunError;
pub use frame::RegStack;
pub use upvalue::UpvalueCell;
pub use vm::{Script, Vm};
