//! Engine state, the host-facing entry points, and the protected-call
//! boundary.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::bytecode::loader::load_module;
use crate::bytecode::module::{Module, Prototype};
use crate::exec::closure::{Closure, call_closure};
use crate::exec::error::RunError;
use crate::host::settings::Settings;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{TableRef, Value};

/// Engine tag used in formatted diagnostics.
const ENGINE: &str = "lbvm";

/// Nested script-call limit; guards the native stack against runaway
/// recursion in interpreted code.
const MAX_CALL_DEPTH: usize = 200;

/// Last-executed-instruction record used by diagnostics.
#[derive(Clone)]
pub(crate) struct DebugRecord {
    pub name: Option<Arc<str>>,
    pub pc: usize,
    pub opname: &'static str,
}

impl Default for DebugRecord {
    fn default() -> Self {
        DebugRecord {
            name: None,
            pc: 0,
            opname: "NONE",
        }
    }
}

/// Shared per-script execution state: configuration, environment, the kill
/// switch, and observational counters.
pub(crate) struct Machine {
    pub settings: Settings,
    pub env: TableRef,
    pub alive: Cell<bool>,
    pub debug: RefCell<DebugRecord>,
    coverage: RefCell<FastHashMap<(u32, u32), u64>>,
    call_depth: Cell<usize>,
}

impl Machine {
    fn new(settings: Settings, env: TableRef) -> Self {
        Machine {
            settings,
            env,
            alive: Cell::new(true),
            debug: RefCell::new(DebugRecord::default()),
            coverage: RefCell::new(fast_hash_map_new()),
            call_depth: Cell::new(0),
        }
    }

    /// Extensions shadow the environment on reads.
    pub fn get_global(&self, name: &str) -> Value {
        if let Some(value) = self.settings.extensions.get(name) {
            return value.clone();
        }
        self.env.borrow().get_str(name)
    }

    pub fn set_global(&self, name: Arc<str>, value: Value) {
        self.env.borrow_mut().set_str(name, value);
    }

    #[inline]
    pub fn record_debug(&self, proto: &Prototype, pc: usize, opname: &'static str) {
        let mut debug = self.debug.borrow_mut();
        debug.name = proto.debug_name.clone();
        debug.pc = pc;
        debug.opname = opname;
    }

    #[inline]
    pub fn interrupt(&self) {
        if let Some(hook) = &self.settings.hooks.interrupt {
            hook();
        }
    }

    pub fn bump_coverage(&self, proto_id: u32, pc: usize) {
        *self.coverage.borrow_mut().entry((proto_id, pc as u32)).or_insert(0) += 1;
    }

    pub fn enter_call(&self) -> Result<(), RunError> {
        let depth = self.call_depth.get();
        if depth >= MAX_CALL_DEPTH {
            return Err(RunError::msg("stack overflow"));
        }
        self.call_depth.set(depth + 1);
        Ok(())
    }

    pub fn leave_call(&self) {
        self.call_depth.set(self.call_depth.get().saturating_sub(1));
    }
}

/// The execution engine: a settings bundle from which scripts are loaded.
pub struct Vm {
    settings: Settings,
}

impl Vm {
    pub fn new(settings: Settings) -> Self {
        Vm { settings }
    }

    /// Decode a module blob and bind its main prototype against `env`,
    /// producing a callable script handle. Load failures surface here;
    /// no interpreted code runs until the handle is called.
    pub fn load(&self, bytes: &[u8], env: TableRef) -> Result<Script> {
        let module = Arc::new(load_module(bytes, &self.settings).context("module load failed")?);
        let machine = Rc::new(Machine::new(self.settings.clone(), env));
        let main = Rc::new(Closure {
            module: module.clone(),
            proto_id: module.main_id,
            upvalues: Vec::new(),
        });
        Ok(Script { machine, module, main })
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new(Settings::default())
    }
}

/// A loaded module bound to an environment: the entry point plus its close
/// handle.
pub struct Script {
    machine: Rc<Machine>,
    module: Arc<Module>,
    main: Rc<Closure>,
}

impl Script {
    /// Invoke the main prototype. With `error_handling` enabled this is a
    /// protected call: failures fire the panic hook with the raw payload
    /// and come back as a formatted diagnostic. Without it, the raw error
    /// propagates untouched.
    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>, RunError> {
        let result = call_closure(&self.machine, &self.main, args);
        if !self.machine.settings.error_handling {
            return result;
        }
        result.map_err(|err| self.protect(err))
    }

    fn protect(&self, err: RunError) -> RunError {
        if let Some(panic) = &self.machine.settings.hooks.panic {
            panic(err.payload());
        }
        let message = err.message(self.machine.settings.allow_proxy_errors);
        let debug = self.machine.debug.borrow();
        let name = debug.name.as_deref().unwrap_or("NONE");
        RunError::msg(format!(
            "{}>lvm error [name>{}>opcode {}@{}]>{}",
            ENGINE, name, debug.opname, debug.pc, message
        ))
    }

    /// Cooperative kill switch: the dispatch loop finishes the current
    /// instruction, closes upvalues and iterators, and exits.
    pub fn close(&self) {
        self.machine.alive.set(false);
    }

    pub fn is_alive(&self) -> bool {
        self.machine.alive.get()
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn env(&self) -> &TableRef {
        &self.machine.env
    }

    /// Hit count recorded by COVERAGE instructions of a prototype.
    pub fn coverage_count(&self, proto_id: u32, pc: usize) -> u64 {
        self.machine
            .coverage
            .borrow()
            .get(&(proto_id, pc as u32))
            .copied()
            .unwrap_or(0)
    }
}
