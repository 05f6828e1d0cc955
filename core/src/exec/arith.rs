//! Arithmetic, comparison, concatenation and coercion helpers shared by the
//! dispatch loop.

use crate::exec::error::RunError;
use crate::val::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    IDiv,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "subtract",
            ArithOp::Mul => "multiply",
            ArithOp::Div => "divide",
            ArithOp::Mod => "take modulo of",
            ArithOp::Pow => "raise",
            ArithOp::IDiv => "floor-divide",
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            // euclidean-style modulo matching the source language: result
            // takes the sign of the divisor
            ArithOp::Mod => a - (a / b).floor() * b,
            ArithOp::Pow => a.powf(b),
            ArithOp::IDiv => (a / b).floor(),
        }
    }
}

/// Numeric coercion: numbers pass through, strings parse as decimal or
/// `0x`-prefixed hex.
pub(crate) fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::Str(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16).ok().map(|v| v as f64)
            } else {
                s.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

pub(crate) fn arith(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value, RunError> {
    if let (Some(a), Some(b)) = (to_number(lhs), to_number(rhs)) {
        return Ok(Value::Number(op.apply(a, b)));
    }
    match (lhs, rhs) {
        (Value::Vector(a), Value::Vector(b)) => {
            let mut out = [0f32; 4];
            for i in 0..4 {
                out[i] = op.apply(a[i] as f64, b[i] as f64) as f32;
            }
            Ok(Value::Vector(out))
        }
        (Value::Vector(a), Value::Number(n)) => Ok(Value::Vector(a.map(|x| op.apply(x as f64, *n) as f32))),
        (Value::Number(n), Value::Vector(b)) => Ok(Value::Vector(b.map(|x| op.apply(*n, x as f64) as f32))),
        _ => {
            let offender = if to_number(lhs).is_none() { lhs } else { rhs };
            Err(RunError::type_error(op.name(), offender))
        }
    }
}

pub(crate) fn negate(value: &Value) -> Result<Value, RunError> {
    match value {
        Value::Vector(v) => Ok(Value::Vector(v.map(|x| -x))),
        other => match to_number(other) {
            Some(n) => Ok(Value::Number(-n)),
            None => Err(RunError::type_error("negate", other)),
        },
    }
}

pub(crate) fn length_of(value: &Value) -> Result<Value, RunError> {
    match value {
        Value::Str(s) => Ok(Value::Number(s.len() as f64)),
        Value::Table(t) => Ok(Value::Number(t.borrow().length() as f64)),
        other => Err(RunError::type_error("get length of", other)),
    }
}

/// `<` with number and string orderings; anything else is a type error.
pub(crate) fn less_than(lhs: &Value, rhs: &Value) -> Result<bool, RunError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(a < b),
        (Value::Str(a), Value::Str(b)) => Ok(a < b),
        _ => Err(compare_error(lhs, rhs)),
    }
}

pub(crate) fn less_equal(lhs: &Value, rhs: &Value) -> Result<bool, RunError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(a <= b),
        (Value::Str(a), Value::Str(b)) => Ok(a <= b),
        _ => Err(compare_error(lhs, rhs)),
    }
}

fn compare_error(lhs: &Value, rhs: &Value) -> RunError {
    RunError::msg(format!(
        "attempt to compare {} with {}",
        lhs.type_name(),
        rhs.type_name()
    ))
}

/// Left-to-right concatenation of a register span; strings and numbers
/// only.
pub(crate) fn concat(values: &[Value]) -> Result<Value, RunError> {
    let mut out = String::new();
    for value in values {
        match value {
            Value::Str(s) => out.push_str(s),
            Value::Number(_) => out.push_str(&value.to_string()),
            other => return Err(RunError::type_error("concatenate", other)),
        }
    }
    Ok(Value::Str(out.into()))
}
