//! Closure objects and the uniform call path.

use std::rc::Rc;
use std::sync::Arc;

use crate::bytecode::module::{Module, Prototype};
use crate::exec::error::RunError;
use crate::exec::frame::Frame;
use crate::exec::upvalue::UpvalueCell;
use crate::exec::vm::Machine;
use crate::val::Value;

/// A prototype bound to its captured upvalues. The prototype is named by id
/// so ownership stays with the module even for recursive nestings.
pub struct Closure {
    pub module: Arc<Module>,
    pub proto_id: u32,
    pub upvalues: Vec<UpvalueCell>,
}

impl Closure {
    pub fn proto(&self) -> &Arc<Prototype> {
        &self.module.protos[self.proto_id as usize]
    }
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closure")
            .field("proto_id", &self.proto_id)
            .field("name", &self.proto().debug_name_or_default())
            .field("upvalues", &self.upvalues.len())
            .finish()
    }
}

pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Vec<Value>, RunError>>;

/// An opaque callable supplied by the host environment.
#[derive(Clone)]
pub struct NativeCallable {
    name: Option<Arc<str>>,
    func: NativeFn,
}

impl NativeCallable {
    pub fn new(name: Option<&str>, func: NativeFn) -> Self {
        NativeCallable {
            name: name.map(Arc::from),
            func,
        }
    }

    /// Wrap a plain closure as an anonymous callable value.
    pub fn value<F>(func: F) -> Value
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, RunError> + 'static,
    {
        Value::Native(NativeCallable {
            name: None,
            func: Rc::new(func),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>, RunError> {
        (self.func)(args)
    }

    pub(crate) fn ptr_eq(&self, other: &NativeCallable) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.func) as *const () as usize
    }
}

impl std::fmt::Debug for NativeCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeCallable({})", self.name.as_deref().unwrap_or("?"))
    }
}

/// Invoke any callable value with already-materialized arguments.
pub(crate) fn call_value(machine: &Machine, func: &Value, args: &[Value]) -> Result<Vec<Value>, RunError> {
    match func {
        Value::Closure(closure) => call_closure(machine, closure, args),
        Value::Native(native) => native.call(args),
        other => Err(RunError::type_error("call", other)),
    }
}

/// Set up a fresh frame for a scripted closure and run the dispatch loop.
///
/// Arguments beyond the declared parameter count are always captured as
/// varargs; the prototype's vararg flag only governs whether the compiler
/// emitted `GETVARARGS` to read them.
pub(crate) fn call_closure(machine: &Machine, closure: &Closure, args: &[Value]) -> Result<Vec<Value>, RunError> {
    let proto = closure.proto();

    machine.enter_call()?;
    let mut frame = Frame::new(proto.max_stack_size as usize);
    let num_params = proto.num_params as usize;
    for (i, arg) in args.iter().take(num_params).enumerate() {
        frame.set_reg(i, arg.clone());
    }
    if args.len() > num_params {
        frame.varargs = args[num_params..].to_vec();
    }

    let result = crate::exec::dispatch::run(machine, closure, &mut frame);
    frame.close_all();
    machine.leave_call();
    result
}
