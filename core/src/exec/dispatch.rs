//! The dispatch loop.
//!
//! PC discipline: the pc is advanced once per fetched instruction before the
//! handler runs. Handlers of AUX-bearing opcodes advance it once more to
//! step over the placeholder slot; conditional jumps take `pc += D` from the
//! post-increment base and encode their fall-through as the AUX skip.

use std::rc::Rc;
use std::sync::Arc;

use tracing::warn;

use crate::bytecode::instr::{Instr, KRef};
use crate::bytecode::opcode::Opcode;
use crate::exec::arith::{self, ArithOp};
use crate::exec::closure::{Closure, call_value};
use crate::exec::error::RunError;
use crate::exec::frame::Frame;
use crate::exec::upvalue::UpvalueCell;
use crate::exec::vm::Machine;
use crate::host::hooks::StepEvent;
use crate::val::Value;
use crate::val::iter::make_iterator;

pub(crate) fn run(machine: &Machine, closure: &Closure, frame: &mut Frame) -> Result<Vec<Value>, RunError> {
    let module = &closure.module;
    let proto: &crate::bytecode::module::Prototype = closure.proto();
    let code = &proto.code;
    let mut pc: usize = 0;

    while machine.alive.get() {
        let Some(inst) = code.get(pc) else { break };
        let saved_pc = pc;
        pc += 1;
        machine.record_debug(proto, saved_pc, inst.mnemonic());

        if let Some(step) = &machine.settings.hooks.step {
            step(&StepEvent {
                stack: &frame.stack,
                pc: saved_pc,
                proto,
                module,
                upvalues: &closure.upvalues,
            });
        }

        let Some(op) = inst.op else {
            warn!(opcode = inst.opbyte, pc = saved_pc, "skipping unknown opcode");
            continue;
        };

        match op {
            Opcode::Nop | Opcode::PrepVarargs | Opcode::NativeCall => {}

            Opcode::Break => {
                if let Some(hook) = &machine.settings.hooks.break_hook {
                    hook(&StepEvent {
                        stack: &frame.stack,
                        pc: saved_pc,
                        proto,
                        module,
                        upvalues: &closure.upvalues,
                    });
                } else {
                    warn!(pc = saved_pc, "BREAK executed with no break hook installed");
                }
            }

            Opcode::LoadNil => frame.set_reg(inst.a as usize, Value::Nil),

            Opcode::LoadB => {
                frame.set_reg(inst.a as usize, Value::Bool(inst.b != 0));
                pc += inst.c as usize;
            }

            Opcode::LoadN => frame.set_reg(inst.a as usize, Value::Number(inst.d as f64)),

            Opcode::LoadK => frame.set_reg(inst.a as usize, kval(inst)?),

            Opcode::LoadKX => {
                pc += 1;
                frame.set_reg(inst.a as usize, kval(inst)?);
            }

            Opcode::Move => frame.set_reg(inst.a as usize, frame.reg(inst.b as usize)),

            Opcode::GetGlobal => {
                pc += 1;
                let name = kstr(inst)?;
                frame.set_reg(inst.a as usize, machine.get_global(&name));
            }

            Opcode::SetGlobal => {
                pc += 1;
                let name = kstr(inst)?;
                machine.set_global(name, frame.reg(inst.a as usize));
            }

            Opcode::GetUpval => {
                let cell = upvalue(closure, inst.b)?;
                frame.set_reg(inst.a as usize, cell.get());
            }

            Opcode::SetUpval => {
                let cell = upvalue(closure, inst.b)?;
                cell.set(frame.reg(inst.a as usize));
            }

            Opcode::CloseUpvals => frame.close_upvalues_from(inst.a as usize),

            Opcode::GetImport => {
                pc += 1;
                let value = match &inst.k {
                    KRef::Value(v) => v.clone(),
                    _ => walk_import(machine, inst)?,
                };
                frame.set_reg(inst.a as usize, value);
            }

            Opcode::GetTable => {
                let base = frame.reg(inst.b as usize);
                let key = frame.reg(inst.c as usize);
                frame.set_reg(inst.a as usize, index_value(&base, &key)?);
            }

            Opcode::SetTable => {
                let base = frame.reg(inst.b as usize);
                let key = frame.reg(inst.c as usize);
                set_index(&base, key, frame.reg(inst.a as usize))?;
            }

            Opcode::GetTableKs => {
                pc += 1;
                let base = frame.reg(inst.b as usize);
                frame.set_reg(inst.a as usize, index_value(&base, &kval(inst)?)?);
            }

            Opcode::SetTableKs => {
                pc += 1;
                let base = frame.reg(inst.b as usize);
                set_index(&base, kval(inst)?, frame.reg(inst.a as usize))?;
            }

            Opcode::GetTableN => {
                let base = frame.reg(inst.b as usize);
                match base.as_table() {
                    Some(t) => frame.set_reg(inst.a as usize, t.borrow().get_int(inst.c as i64 + 1)),
                    None => return Err(RunError::type_error("index", &base)),
                }
            }

            Opcode::SetTableN => {
                let base = frame.reg(inst.b as usize);
                match base.as_table() {
                    Some(t) => t.borrow_mut().set_int(inst.c as i64 + 1, frame.reg(inst.a as usize)),
                    None => return Err(RunError::type_error("index", &base)),
                }
            }

            Opcode::NewClosure => {
                let child_id = proto
                    .protos
                    .get(inst.d as usize)
                    .copied()
                    .ok_or_else(|| RunError::msg(format!("closure prototype {} out of range", inst.d)))?;
                let value = make_closure(closure, frame, code, &mut pc, child_id, false)?;
                frame.set_reg(inst.a as usize, value);
            }

            Opcode::DupClosure => {
                let KRef::Proto(child_id) = inst.k else {
                    return Err(RunError::msg("DUPCLOSURE requires a closure constant"));
                };
                let value = make_closure(closure, frame, code, &mut pc, child_id, true)?;
                frame.set_reg(inst.a as usize, value);
            }

            Opcode::Namecall => {
                pc += 1;
                let a = inst.a as usize;
                let receiver = frame.reg(inst.b as usize);
                frame.set_reg(a + 1, receiver.clone());
                let method = kstr(inst)?;

                let mut handled = false;
                if machine.settings.use_native_namecall
                    && let Some(handler) = &machine.settings.namecall_handler
                    && let Some(call_inst) = code.get(pc)
                    && call_inst.op == Some(Opcode::Call)
                {
                    let ca = call_inst.a as usize;
                    let cb = call_inst.b as usize;
                    let cc = call_inst.c as usize;
                    let nargs = if cb == 0 {
                        (frame.top - ca as isize).max(0) as usize
                    } else {
                        cb - 1
                    };
                    let args = frame.read_span(ca + 1, nargs);
                    if let Some(rets) = handler(&method, &args)? {
                        machine.interrupt();
                        pc += 1; // the CALL is consumed
                        splice(frame, ca, cc, rets);
                        handled = true;
                    }
                }
                if !handled {
                    frame.set_reg(a, index_value(&receiver, &Value::Str(method))?);
                }
            }

            Opcode::Call => {
                machine.interrupt();
                let a = inst.a as usize;
                let b = inst.b as usize;
                let c = inst.c as usize;
                let nargs = if b == 0 { (frame.top - a as isize).max(0) as usize } else { b - 1 };
                let func = frame.reg(a);
                let args = frame.read_span(a + 1, nargs);
                let rets = call_value(machine, &func, &args)?;
                splice(frame, a, c, rets);
            }

            Opcode::Return => {
                machine.interrupt();
                let a = inst.a as usize;
                let b = inst.b as usize;
                let n = if b == 0 {
                    (frame.top - a as isize + 1).max(0) as usize
                } else {
                    b - 1
                };
                return Ok(frame.read_span(a, n));
            }

            Opcode::Jump => pc = jump(pc, inst.d as i32)?,

            Opcode::JumpBack => {
                machine.interrupt();
                pc = jump(pc, inst.d as i32)?;
            }

            Opcode::JumpX => {
                machine.interrupt();
                pc = jump(pc, inst.e)?;
            }

            Opcode::JumpIf => {
                if frame.reg(inst.a as usize).truthy() {
                    pc = jump(pc, inst.d as i32)?;
                }
            }

            Opcode::JumpIfNot => {
                if !frame.reg(inst.a as usize).truthy() {
                    pc = jump(pc, inst.d as i32)?;
                }
            }

            Opcode::JumpIfEq | Opcode::JumpIfNotEq => {
                let eq = frame.reg(inst.a as usize) == frame.reg(inst.aux as usize);
                let taken = eq == (op == Opcode::JumpIfEq);
                pc = if taken { jump(pc, inst.d as i32)? } else { pc + 1 };
            }

            Opcode::JumpIfLe | Opcode::JumpIfNotLe => {
                let le = arith::less_equal(&frame.reg(inst.a as usize), &frame.reg(inst.aux as usize))?;
                let taken = le == (op == Opcode::JumpIfLe);
                pc = if taken { jump(pc, inst.d as i32)? } else { pc + 1 };
            }

            Opcode::JumpIfLt | Opcode::JumpIfNotLt => {
                let lt = arith::less_than(&frame.reg(inst.a as usize), &frame.reg(inst.aux as usize))?;
                let taken = lt == (op == Opcode::JumpIfLt);
                pc = if taken { jump(pc, inst.d as i32)? } else { pc + 1 };
            }

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Pow | Opcode::IDiv => {
                let lhs = frame.reg(inst.b as usize);
                let rhs = frame.reg(inst.c as usize);
                frame.set_reg(inst.a as usize, arith::arith(arith_op(op), &lhs, &rhs)?);
            }

            Opcode::AddK
            | Opcode::SubK
            | Opcode::MulK
            | Opcode::DivK
            | Opcode::ModK
            | Opcode::PowK
            | Opcode::IDivK => {
                let lhs = frame.reg(inst.b as usize);
                let rhs = kval(inst)?;
                frame.set_reg(inst.a as usize, arith::arith(arith_op(op), &lhs, &rhs)?);
            }

            Opcode::SubRK | Opcode::DivRK => {
                let lhs = kval(inst)?;
                let rhs = frame.reg(inst.c as usize);
                let ao = if op == Opcode::SubRK { ArithOp::Sub } else { ArithOp::Div };
                frame.set_reg(inst.a as usize, arith::arith(ao, &lhs, &rhs)?);
            }

            Opcode::And | Opcode::AndK => {
                let lhs = frame.reg(inst.b as usize);
                let rhs = if op == Opcode::And { frame.reg(inst.c as usize) } else { kval(inst)? };
                frame.set_reg(inst.a as usize, select_and(lhs, rhs));
            }

            Opcode::Or | Opcode::OrK => {
                let lhs = frame.reg(inst.b as usize);
                let rhs = if op == Opcode::Or { frame.reg(inst.c as usize) } else { kval(inst)? };
                frame.set_reg(inst.a as usize, select_or(lhs, rhs));
            }

            Opcode::Concat => {
                let (b, c) = (inst.b as usize, inst.c as usize);
                if c < b {
                    return Err(RunError::msg("malformed CONCAT range"));
                }
                let parts = frame.read_span(b, c - b + 1);
                frame.set_reg(inst.a as usize, arith::concat(&parts)?);
            }

            Opcode::Not => {
                let v = frame.reg(inst.b as usize);
                frame.set_reg(inst.a as usize, Value::Bool(!v.truthy()));
            }

            Opcode::Minus => {
                let v = frame.reg(inst.b as usize);
                frame.set_reg(inst.a as usize, arith::negate(&v)?);
            }

            Opcode::Length => {
                let v = frame.reg(inst.b as usize);
                frame.set_reg(inst.a as usize, arith::length_of(&v)?);
            }

            Opcode::NewTable => {
                pc += 1;
                let hash_hint = if inst.b == 0 { 0 } else { 1usize << (inst.b - 1).min(16) };
                let table = crate::val::Table::with_capacity(inst.aux as usize, hash_hint);
                frame.set_reg(inst.a as usize, Value::Table(Rc::new(std::cell::RefCell::new(table))));
            }

            Opcode::DupTable => {
                let KRef::Keys(keys) = &inst.k else {
                    return Err(RunError::msg("DUPTABLE requires a table constant"));
                };
                let table = crate::val::Table::with_capacity(0, keys.len());
                frame.set_reg(inst.a as usize, Value::Table(Rc::new(std::cell::RefCell::new(table))));
            }

            Opcode::SetList => {
                pc += 1;
                let a = inst.a as usize;
                let b = inst.b as usize;
                let c = inst.c as usize;
                let count = if c == 0 {
                    (frame.top - b as isize + 1).max(0) as usize
                } else {
                    c - 1
                };
                let base = frame.reg(a);
                let Some(table) = base.as_table() else {
                    return Err(RunError::type_error("index", &base));
                };
                let start = inst.aux as i64;
                for i in 0..count {
                    let value = frame.reg(b + i);
                    table.borrow_mut().set_int(start + i as i64, value);
                }
            }

            Opcode::ForNPrep => {
                let a = inst.a as usize;
                let limit = coerce_loop_number(frame, a, "limit")?;
                let step = coerce_loop_number(frame, a + 1, "step")?;
                let index = coerce_loop_number(frame, a + 2, "initial value")?;
                if !numeric_loop_continues(index, limit, step) {
                    pc = jump(pc, inst.d as i32)?;
                }
            }

            Opcode::ForNLoop => {
                machine.interrupt();
                let a = inst.a as usize;
                let limit = coerce_loop_number(frame, a, "limit")?;
                let step = coerce_loop_number(frame, a + 1, "step")?;
                let index = coerce_loop_number(frame, a + 2, "initial value")? + step;
                frame.set_reg(a + 2, Value::Number(index));
                if numeric_loop_continues(index, limit, step) {
                    pc = jump(pc, inst.d as i32)?;
                }
            }

            Opcode::ForGPrep => {
                let target = jump(pc, inst.d as i32)?;
                if machine.settings.generalized_iteration {
                    let iterable = frame.reg(inst.a as usize);
                    if !iterable.is_callable() {
                        // a re-entered loop gets a fresh iterator
                        frame.iterators.insert(target, make_iterator(&iterable)?);
                    }
                }
                pc = target;
            }

            Opcode::ForGPrepINext | Opcode::ForGPrepNext => {
                let iterable = frame.reg(inst.a as usize);
                if !iterable.is_callable() {
                    return Err(RunError::msg(format!(
                        "attempt to iterate over a {} value",
                        iterable.type_name()
                    )));
                }
                pc = jump(pc, inst.d as i32)?;
            }

            Opcode::ForGLoop => {
                machine.interrupt();
                let a = inst.a as usize;
                let nvars = match inst.k {
                    KRef::VarCount(n) => n as usize,
                    _ => return Err(RunError::msg("FORGLOOP is missing its variable count")),
                };
                frame.top = a as isize + 6;

                let installed = frame
                    .iterators
                    .get_mut(&saved_pc)
                    .map(|it| it.next())
                    .transpose()?;
                if let Some(step) = installed {
                    match step {
                        None => {
                            frame.iterators.remove(&saved_pc);
                            pc += 1;
                        }
                        Some((key, value)) => {
                            bind_loop_vars(frame, a, nvars, &[key.clone(), value]);
                            frame.set_reg(a + 2, key);
                            pc = jump(pc, inst.d as i32)?;
                        }
                    }
                } else {
                    let func = frame.reg(a);
                    if !func.is_callable() {
                        return Err(RunError::msg(format!(
                            "attempt to iterate over a {} value",
                            func.type_name()
                        )));
                    }
                    let args = [frame.reg(a + 1), frame.reg(a + 2)];
                    let rets = call_value(machine, &func, &args)?;
                    bind_loop_vars(frame, a, nvars, &rets);
                    let control = frame.reg(a + 3);
                    if control.is_nil() {
                        pc += 1;
                    } else {
                        frame.set_reg(a + 2, control);
                        pc = jump(pc, inst.d as i32)?;
                    }
                }
            }

            Opcode::GetVarargs => {
                let a = inst.a as usize;
                let b = inst.b as usize;
                if b == 0 {
                    let n = frame.varargs.len();
                    for (i, v) in frame.varargs.clone().into_iter().enumerate() {
                        frame.set_reg(a + i, v);
                    }
                    frame.top = a as isize + n as isize - 1;
                } else {
                    for i in 0..b - 1 {
                        let v = frame.varargs.get(i).cloned().unwrap_or(Value::Nil);
                        frame.set_reg(a + i, v);
                    }
                }
            }

            Opcode::JumpXEqKNil | Opcode::JumpXEqKB | Opcode::JumpXEqKN | Opcode::JumpXEqKS => {
                let lhs = frame.reg(inst.a as usize);
                let eq = match op {
                    Opcode::JumpXEqKNil => lhs.is_nil(),
                    _ => lhs == kval(inst)?,
                };
                // branch on equality XOR the negation flag
                pc = if eq != inst.kn { jump(pc, inst.d as i32)? } else { pc + 1 };
            }

            Opcode::Coverage => machine.bump_coverage(proto.bytecode_id, saved_pc),

            Opcode::Capture => {
                return Err(RunError::msg("CAPTURE outside a closure capture list"));
            }

            // runtime fast paths; the general call path that follows them
            // already implements the semantics
            Opcode::FastCall | Opcode::FastCall1 => {}
            Opcode::FastCall2 | Opcode::FastCall2K | Opcode::FastCall3 => pc += 1,
        }
    }

    Ok(Vec::new())
}

fn arith_op(op: Opcode) -> ArithOp {
    match op {
        Opcode::Add | Opcode::AddK => ArithOp::Add,
        Opcode::Sub | Opcode::SubK => ArithOp::Sub,
        Opcode::Mul | Opcode::MulK => ArithOp::Mul,
        Opcode::Div | Opcode::DivK => ArithOp::Div,
        Opcode::Mod | Opcode::ModK => ArithOp::Mod,
        Opcode::Pow | Opcode::PowK => ArithOp::Pow,
        Opcode::IDiv | Opcode::IDivK => ArithOp::IDiv,
        other => unreachable!("{:?} is not an arithmetic opcode", other),
    }
}

/// `A = B and C`, preserving source truthiness: a falsey C coerces to a
/// canonical false so the result stays falsey.
fn select_and(lhs: Value, rhs: Value) -> Value {
    if !lhs.truthy() {
        lhs
    } else if rhs.truthy() {
        rhs
    } else {
        Value::Bool(false)
    }
}

fn select_or(lhs: Value, rhs: Value) -> Value {
    if lhs.truthy() {
        lhs
    } else if rhs.truthy() {
        rhs
    } else {
        Value::Bool(false)
    }
}

fn bind_loop_vars(frame: &Frame, a: usize, nvars: usize, values: &[Value]) {
    for i in 0..nvars {
        frame.set_reg(a + 3 + i, values.get(i).cloned().unwrap_or(Value::Nil));
    }
}

fn jump(pc: usize, delta: i32) -> Result<usize, RunError> {
    let target = pc as i64 + delta as i64;
    if target < 0 {
        return Err(RunError::msg("jump target out of range"));
    }
    Ok(target as usize)
}

fn kval(inst: &Instr) -> Result<Value, RunError> {
    match &inst.k {
        KRef::Value(v) => Ok(v.clone()),
        _ => Err(RunError::msg(format!("{} is missing its constant", inst.mnemonic()))),
    }
}

fn kstr(inst: &Instr) -> Result<Arc<str>, RunError> {
    match &inst.k {
        KRef::Value(Value::Str(s)) => Ok(s.clone()),
        _ => Err(RunError::msg(format!("{} requires a string constant", inst.mnemonic()))),
    }
}

fn upvalue(closure: &Closure, index: u8) -> Result<UpvalueCell, RunError> {
    closure
        .upvalues
        .get(index as usize)
        .cloned()
        .ok_or_else(|| RunError::msg(format!("upvalue {} out of range", index)))
}

/// Splice call results back into the frame at `base`: `c == 0` keeps every
/// result and records the new top, otherwise the results are padded or
/// truncated to `c - 1`.
fn splice(frame: &mut Frame, base: usize, c: usize, rets: Vec<Value>) {
    if c == 0 {
        let n = rets.len();
        for (i, v) in rets.into_iter().enumerate() {
            frame.set_reg(base + i, v);
        }
        frame.top = base as isize + n as isize - 1;
    } else {
        for i in 0..c - 1 {
            frame.set_reg(base + i, rets.get(i).cloned().unwrap_or(Value::Nil));
        }
    }
}

fn index_value(base: &Value, key: &Value) -> Result<Value, RunError> {
    match base {
        Value::Table(t) => Ok(t.borrow().get(key)),
        Value::Vector(lanes) => {
            let Value::Str(field) = key else {
                return Err(RunError::type_error("index", key));
            };
            let lane = match &**field {
                "x" | "X" => 0,
                "y" | "Y" => 1,
                "z" | "Z" => 2,
                "w" | "W" => 3,
                _ => return Err(RunError::msg(format!("'{}' is not a valid vector field", field))),
            };
            Ok(Value::Number(lanes[lane] as f64))
        }
        other => Err(RunError::type_error("index", other)),
    }
}

fn set_index(base: &Value, key: Value, value: Value) -> Result<(), RunError> {
    match base {
        Value::Table(t) => t.borrow_mut().set(key, value),
        other => Err(RunError::type_error("index", other)),
    }
}

/// Uncached import: the first step reads through extensions and then the
/// environment, each further step indexes into the previous result,
/// stopping at the first nil.
fn walk_import(machine: &Machine, inst: &Instr) -> Result<Value, RunError> {
    let Some(Value::Str(first)) = &inst.k0 else {
        return Err(RunError::msg("GETIMPORT is missing its import chain"));
    };
    let mut current = machine.get_global(first);
    for step in [&inst.k1, &inst.k2].into_iter().take(inst.kc.saturating_sub(1) as usize) {
        if current.is_nil() {
            break;
        }
        let Some(name) = step else { break };
        current = match &current {
            Value::Table(t) => t.borrow().get(name),
            _ => Value::Nil,
        };
    }
    Ok(current)
}

/// Consume the CAPTURE pseudo-instructions that follow NEWCLOSURE or
/// DUPCLOSURE and build the closure. `dup` forbids reference captures, as
/// duplicated closures cannot alias the creating frame.
fn make_closure(
    parent: &Closure,
    frame: &mut Frame,
    code: &[Instr],
    pc: &mut usize,
    child_id: u32,
    dup: bool,
) -> Result<Value, RunError> {
    let child_proto = parent
        .module
        .protos
        .get(child_id as usize)
        .ok_or_else(|| RunError::msg(format!("prototype {} out of range", child_id)))?;
    let nups = child_proto.num_upvalues as usize;
    let mut upvalues = Vec::with_capacity(nups);
    for _ in 0..nups {
        let pseudo = code
            .get(*pc)
            .ok_or_else(|| RunError::msg("truncated closure capture list"))?;
        *pc += 1;
        if pseudo.op != Some(Opcode::Capture) {
            return Err(RunError::msg(format!(
                "expected CAPTURE in closure capture list, found {}",
                pseudo.mnemonic()
            )));
        }
        let cell = match pseudo.a {
            0 => UpvalueCell::closed(frame.reg(pseudo.b as usize)),
            1 if !dup => frame.open_cell(pseudo.b as usize),
            2 => upvalue(parent, pseudo.b)?,
            other => {
                return Err(RunError::msg(format!("unsupported capture type {}", other)));
            }
        };
        upvalues.push(cell);
    }
    Ok(Value::Closure(Rc::new(Closure {
        module: parent.module.clone(),
        proto_id: child_id,
        upvalues,
    })))
}

fn coerce_loop_number(frame: &Frame, reg: usize, what: &str) -> Result<f64, RunError> {
    let value = frame.reg(reg);
    match arith::to_number(&value) {
        Some(n) => {
            frame.set_reg(reg, Value::Number(n));
            Ok(n)
        }
        None => Err(RunError::msg(format!(
            "invalid 'for' {} (number expected, got {})",
            what,
            value.type_name()
        ))),
    }
}

fn numeric_loop_continues(index: f64, limit: f64, step: f64) -> bool {
    if step > 0.0 { index <= limit } else { index >= limit }
}
