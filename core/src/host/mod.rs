//! Host-facing configuration: the settings record and call hooks.

pub mod hooks;
pub mod settings;

pub use hooks::{CallHooks, InterruptFn, PanicFn, StepEvent, StepFn};
pub use settings::{NamecallFn, Settings, VectorCtor};
