//! Interpreter core for versioned stack-plus-register bytecode modules.
//!
//! A compiled module arrives as an opaque blob; [`bytecode::load_module`]
//! decodes it into an immutable prototype graph, and [`exec::Vm`] binds the
//! main prototype against a host-supplied environment to produce a callable
//! [`exec::Script`]. Host integration points — extensions, call hooks, the
//! native namecall dispatcher, import pre-resolution — live in [`host`].
//!
//! ```no_run
//! use lbvm_core::{Settings, Table, Value, Vm};
//!
//! let blob = std::fs::read("module.bin").expect("read module");
//! let vm = Vm::new(Settings::default());
//! let env = Table::new_ref();
//! let script = vm.load(&blob, env).expect("load module");
//! let results = script.call(&[Value::Number(1.0)]).expect("run module");
//! println!("{:?}", results);
//! ```

pub mod bytecode;
pub mod exec;
pub mod host;
pub mod util;
pub mod val;

pub use exec::{NativeCallable, RunError, Script, Vm};
pub use host::{CallHooks, Settings};
pub use val::{Table, TableRef, Value};
