//! Engine configuration supplied by the host.

use std::rc::Rc;
use std::sync::Arc;

use crate::exec::error::RunError;
use crate::host::hooks::CallHooks;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::{TableRef, Value};

/// Builds a vector value from the lanes read out of a vector constant.
/// Receives 3 or 4 components depending on [`Settings::vector_size`].
pub type VectorCtor = Rc<dyn Fn(&[f32]) -> Value>;

/// Native `NAMECALL` dispatcher. Receives the method name and the full
/// argument list (receiver first); `Ok(None)` means "not handled", which
/// sends the call down the ordinary method-lookup path.
pub type NamecallFn = Rc<dyn Fn(&str, &[Value]) -> Result<Option<Vec<Value>>, RunError>>;

#[derive(Clone)]
pub struct Settings {
    /// Custom vector constructor; lane count per `vector_size`.
    pub vector_ctor: Option<VectorCtor>,
    /// 3 or 4 meaningful vector lanes.
    pub vector_size: usize,
    /// Route `NAMECALL` through `namecall_handler` before the fallback
    /// method lookup.
    pub use_native_namecall: bool,
    pub namecall_handler: Option<NamecallFn>,
    /// Read-shadow over the environment for `GETGLOBAL`/`GETIMPORT`.
    pub extensions: FastHashMap<Arc<str>, Value>,
    pub hooks: CallHooks,
    /// Wrap top-level calls in the protected boundary that formats
    /// diagnostics and fires the panic hook.
    pub error_handling: bool,
    /// Drive generic loops over non-function iterables.
    pub generalized_iteration: bool,
    /// Surface non-string error payloads as-is instead of reducing them to
    /// their type tag.
    pub allow_proxy_errors: bool,
    /// Resolve import chains against `static_environment` at load time.
    pub use_import_constants: bool,
    pub static_environment: Option<TableRef>,
    /// Reject modules containing unknown opcodes at load time instead of
    /// warning and skipping them during execution.
    pub fatal_unknown_opcodes: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            vector_ctor: None,
            vector_size: 4,
            use_native_namecall: false,
            namecall_handler: None,
            extensions: fast_hash_map_new(),
            hooks: CallHooks::default(),
            error_handling: true,
            generalized_iteration: true,
            allow_proxy_errors: false,
            use_import_constants: false,
            static_environment: None,
            fatal_unknown_opcodes: false,
        }
    }
}

impl Settings {
    /// Build the vector value for a constant, through the host ctor when
    /// one is installed.
    pub(crate) fn make_vector(&self, lanes: [f32; 4]) -> Value {
        let count = if self.vector_size == 3 { 3 } else { 4 };
        match &self.vector_ctor {
            Some(ctor) => ctor(&lanes[..count]),
            None => {
                let mut out = [0f32; 4];
                out[..count].copy_from_slice(&lanes[..count]);
                Value::Vector(out)
            }
        }
    }
}
