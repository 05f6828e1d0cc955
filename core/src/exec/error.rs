//! Runtime error carrying an arbitrary value payload.
//!
//! Errors raised by executing code are values in the interpreted language,
//! not strings, so the payload keeps its original shape until the protected
//! boundary decides how to present it (see `exec::vm`). Load-time failures
//! never reach this type; they surface as `anyhow` errors from the loader.

use std::fmt;

use crate::val::Value;

#[derive(Debug, Clone)]
pub struct RunError {
    payload: Value,
}

impl RunError {
    pub fn new(payload: Value) -> Self {
        RunError { payload }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        RunError {
            payload: Value::Str(message.into().into()),
        }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// The payload as a message string: strings pass through, anything else
    /// is reduced to its type tag unless proxy payloads are allowed.
    pub fn message(&self, allow_proxy: bool) -> String {
        match &self.payload {
            Value::Str(s) => s.to_string(),
            other if allow_proxy => other.to_string(),
            other => other.type_name().to_string(),
        }
    }

    pub(crate) fn type_error(action: &str, value: &Value) -> Self {
        RunError::msg(format!("attempt to {} a {} value", action, value.type_name()))
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.payload)
    }
}

impl std::error::Error for RunError {}

impl From<anyhow::Error> for RunError {
    fn from(err: anyhow::Error) -> Self {
        RunError::msg(format!("{:#}", err))
    }
}
