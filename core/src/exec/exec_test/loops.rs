use super::*;
use crate::bytecode::builder::{BuildConst, ProtoBuilder};
use crate::bytecode::opcode::Opcode;
use crate::exec::closure::NativeCallable;

#[test]
fn numeric_loop_concatenates_digits() {
    // local s = ""; for i = 1, 3 do s = s .. i end; return s
    let mut mb = ModuleBuilder::new();
    let empty = mb.string("");
    let mut proto = ProtoBuilder::new(6, 0);
    let k = proto.constant(BuildConst::Str(empty));
    proto.op_ad(Opcode::LoadK, 0, k as i16); // s
    proto.op_ad(Opcode::LoadN, 1, 3); // limit
    proto.op_ad(Opcode::LoadN, 2, 1); // step
    proto.op_ad(Opcode::LoadN, 3, 1); // index
    proto.op_ad(Opcode::ForNPrep, 1, 5); // empty range -> pc 10
    proto.op_abc(Opcode::Move, 4, 0, 0); // 5
    proto.op_abc(Opcode::Move, 5, 3, 0); // 6
    proto.op_abc(Opcode::Concat, 0, 4, 5); // 7
    proto.op_abc(Opcode::Nop, 0, 0, 0); // 8
    proto.op_ad(Opcode::ForNLoop, 1, -5); // 9: back to 5
    proto.op_abc(Opcode::Return, 0, 2, 0); // 10
    mb.proto(proto);

    assert_eq!(run(&mb), vec![Value::str("123")]);
}

#[test]
fn numeric_loop_skips_an_empty_range() {
    // for i = 5, 1 do r0 = 99 end; return r0 (stays 0)
    let mut proto = ProtoBuilder::new(5, 0);
    proto.op_ad(Opcode::LoadN, 0, 0);
    proto.op_ad(Opcode::LoadN, 1, 1); // limit
    proto.op_ad(Opcode::LoadN, 2, 1); // step
    proto.op_ad(Opcode::LoadN, 3, 5); // index > limit
    proto.op_ad(Opcode::ForNPrep, 1, 2);
    proto.op_ad(Opcode::LoadN, 0, 99);
    proto.op_ad(Opcode::ForNLoop, 1, -2);
    proto.op_abc(Opcode::Return, 0, 2, 0);
    let mut mb = ModuleBuilder::new();
    mb.proto(proto);

    assert_eq!(run(&mb), vec![number(0.0)]);
}

#[test]
fn numeric_loop_counts_down_with_negative_step() {
    // for i = 3, 1, -1 do n = n + 1 end
    let mut proto = ProtoBuilder::new(5, 0);
    proto.op_ad(Opcode::LoadN, 0, 0);
    proto.op_ad(Opcode::LoadN, 1, 1); // limit
    proto.op_ad(Opcode::LoadN, 2, -1); // step
    proto.op_ad(Opcode::LoadN, 3, 3); // index
    proto.op_ad(Opcode::ForNPrep, 1, 3);
    proto.op_ad(Opcode::LoadN, 4, 1);
    proto.op_abc(Opcode::Add, 0, 0, 4);
    proto.op_ad(Opcode::ForNLoop, 1, -3);
    proto.op_abc(Opcode::Return, 0, 2, 0);
    let mut mb = ModuleBuilder::new();
    mb.proto(proto);

    assert_eq!(run(&mb), vec![number(3.0)]);
}

#[test]
fn fornprep_coerces_numeric_strings() {
    // limit arrives as "3"
    let mut mb = ModuleBuilder::new();
    let s = mb.string("3");
    let mut proto = ProtoBuilder::new(5, 0);
    let k = proto.constant(BuildConst::Str(s));
    proto.op_ad(Opcode::LoadN, 0, 0);
    proto.op_ad(Opcode::LoadK, 1, k as i16);
    proto.op_ad(Opcode::LoadN, 2, 1);
    proto.op_ad(Opcode::LoadN, 3, 1);
    proto.op_ad(Opcode::ForNPrep, 1, 3);
    proto.op_ad(Opcode::LoadN, 4, 1);
    proto.op_abc(Opcode::Add, 0, 0, 4);
    proto.op_ad(Opcode::ForNLoop, 1, -3);
    proto.op_abc(Opcode::Return, 0, 2, 0);
    mb.proto(proto);

    assert_eq!(run(&mb), vec![number(3.0)]);
}

#[test]
fn fornprep_rejects_non_numeric_bounds() {
    let mut mb = ModuleBuilder::new();
    let s = mb.string("not a number");
    let mut proto = ProtoBuilder::new(4, 0);
    let k = proto.constant(BuildConst::Str(s));
    proto.op_ad(Opcode::LoadK, 1, k as i16);
    proto.op_ad(Opcode::LoadN, 2, 1);
    proto.op_ad(Opcode::LoadN, 3, 1);
    proto.op_ad(Opcode::ForNPrep, 1, 1);
    proto.op_abc(Opcode::Return, 0, 1, 0);
    mb.proto(proto);

    let err = run_with(&mb, Settings::default(), Table::new_ref(), &[]).err().unwrap();
    assert!(err.to_string().contains("invalid 'for' limit"));
}

/// Stateless inext-style iterator: (t, i) -> i+1, t[i+1] while present.
fn inext_native() -> Value {
    NativeCallable::value(|args| {
        let table = args[0].as_table().cloned().expect("iterator state");
        let i = args.get(1).and_then(Value::as_number).unwrap_or(0.0) as i64 + 1;
        let v = table.borrow().get_int(i);
        if v.is_nil() {
            Ok(vec![Value::Nil])
        } else {
            Ok(vec![Value::Number(i as f64), v])
        }
    })
}

#[test]
fn generic_loop_drives_a_function_iterator() {
    // local t = {}; for i, v in inext, arr, 0 do t[i] = v end
    // return t[1], t[2]
    let env = Table::new_ref();
    env.borrow_mut().set_str("inext".into(), inext_native());
    let arr = Table::new_ref();
    arr.borrow_mut().set_int(1, Value::str("a"));
    arr.borrow_mut().set_int(2, Value::str("b"));
    env.borrow_mut().set_str("arr".into(), Value::Table(arr));

    let mut mb = ModuleBuilder::new();
    let ki = mb.string("inext");
    let ka = mb.string("arr");
    let mut proto = ProtoBuilder::new(8, 0);
    let kinext = proto.constant(BuildConst::Str(ki));
    let karr = proto.constant(BuildConst::Str(ka));
    proto.op_abc(Opcode::NewTable, 0, 0, 0).aux(0); // 0 (+aux 1)
    proto.op_abc(Opcode::GetGlobal, 1, 0, 0).aux(kinext); // 2 (+3)
    proto.op_abc(Opcode::GetGlobal, 2, 0, 0).aux(karr); // 4 (+5)
    proto.op_ad(Opcode::LoadN, 3, 0); // 6
    proto.op_ad(Opcode::ForGPrep, 1, 1); // 7 -> FORGLOOP at 9
    proto.op_abc(Opcode::SetTable, 5, 0, 4); // 8: t[i] = v
    proto.op_ad(Opcode::ForGLoop, 1, -2).aux(2); // 9 (+aux 10)
    proto.op_abc(Opcode::GetTableN, 1, 0, 0); // 11
    proto.op_abc(Opcode::GetTableN, 2, 0, 1); // 12
    proto.op_abc(Opcode::Return, 1, 3, 0); // 13
    mb.proto(proto);

    assert_eq!(run_in(&mb, env), vec![Value::str("a"), Value::str("b")]);
}

fn generalized_sum_module() -> ModuleBuilder {
    // local n = 0; for _, v in t do n = n + v end; return n
    let mut mb = ModuleBuilder::new();
    let kt = mb.string("t");
    let mut proto = ProtoBuilder::new(8, 0);
    let k = proto.constant(BuildConst::Str(kt));
    proto.op_ad(Opcode::LoadN, 0, 0); // 0: n
    proto.op_abc(Opcode::GetGlobal, 1, 0, 0).aux(k); // 1 (+2)
    proto.op_abc(Opcode::LoadNil, 2, 0, 0); // 3
    proto.op_abc(Opcode::LoadNil, 3, 0, 0); // 4
    proto.op_ad(Opcode::ForGPrep, 1, 1); // 5 -> FORGLOOP at 7
    proto.op_abc(Opcode::Add, 0, 0, 5); // 6: n = n + v
    proto.op_ad(Opcode::ForGLoop, 1, -2).aux(2); // 7 (+8)
    proto.op_abc(Opcode::Return, 0, 2, 0); // 9
    mb.proto(proto);
    mb
}

#[test]
fn generalized_iteration_walks_the_array_part() {
    let t = Table::new_ref();
    for (i, v) in [10.0, 20.0, 30.0].into_iter().enumerate() {
        t.borrow_mut().set_int(i as i64 + 1, Value::Number(v));
    }
    let env = Table::new_ref();
    env.borrow_mut().set_str("t".into(), Value::Table(t));

    assert_eq!(run_in(&generalized_sum_module(), env), vec![number(60.0)]);
}

#[test]
fn generalized_iteration_requires_the_setting() {
    let t = Table::new_ref();
    t.borrow_mut().set_int(1, Value::Number(1.0));
    let env = Table::new_ref();
    env.borrow_mut().set_str("t".into(), Value::Table(t));

    let settings = Settings {
        generalized_iteration: false,
        ..Settings::default()
    };
    let err = run_with(&generalized_sum_module(), settings, env, &[]).err().unwrap();
    assert!(err.to_string().contains("attempt to iterate over a table value"));
}

#[test]
fn generalized_iteration_rejects_non_iterables() {
    let env = Table::new_ref();
    env.borrow_mut().set_str("t".into(), Value::Number(3.0));

    let err = run_with(&generalized_sum_module(), Settings::default(), env, &[]).err().unwrap();
    assert!(err.to_string().contains("attempt to iterate over a number value"));
}

#[test]
fn reentering_a_generic_loop_restarts_iteration() {
    // outer numeric loop runs the generic loop twice; both passes see the
    // full table
    let t = Table::new_ref();
    t.borrow_mut().set_int(1, Value::Number(5.0));
    t.borrow_mut().set_int(2, Value::Number(7.0));
    let env = Table::new_ref();
    env.borrow_mut().set_str("t".into(), Value::Table(t));

    let mut mb = ModuleBuilder::new();
    let kt = mb.string("t");
    let mut proto = ProtoBuilder::new(12, 0);
    let k = proto.constant(BuildConst::Str(kt));
    proto.op_ad(Opcode::LoadN, 0, 0); // 0: total
    proto.op_ad(Opcode::LoadN, 1, 2); // 1: outer limit
    proto.op_ad(Opcode::LoadN, 2, 1); // 2: outer step
    proto.op_ad(Opcode::LoadN, 3, 1); // 3: outer index
    proto.op_ad(Opcode::ForNPrep, 1, 9); // 4 -> 14
    proto.op_abc(Opcode::GetGlobal, 5, 0, 0).aux(k); // 5 (+6)
    proto.op_abc(Opcode::LoadNil, 6, 0, 0); // 7
    proto.op_abc(Opcode::LoadNil, 7, 0, 0); // 8
    proto.op_ad(Opcode::ForGPrep, 5, 1); // 9 -> FORGLOOP at 11
    proto.op_abc(Opcode::Add, 0, 0, 9); // 10: total += v
    proto.op_ad(Opcode::ForGLoop, 5, -2).aux(2); // 11 (+12)
    proto.op_ad(Opcode::ForNLoop, 1, -9); // 13: back to 5
    proto.op_abc(Opcode::Return, 0, 2, 0); // 14
    mb.proto(proto);

    assert_eq!(run_in(&mb, env), vec![number(24.0)]);
}

#[test]
fn forgprep_next_validates_function_iterators() {
    let mut mb = ModuleBuilder::new();
    let kt = mb.string("t");
    let mut proto = ProtoBuilder::new(8, 0);
    let k = proto.constant(BuildConst::Str(kt));
    proto.op_abc(Opcode::GetGlobal, 1, 0, 0).aux(k);
    proto.op_abc(Opcode::LoadNil, 2, 0, 0);
    proto.op_abc(Opcode::LoadNil, 3, 0, 0);
    proto.op_ad(Opcode::ForGPrepNext, 1, 1);
    proto.op_abc(Opcode::Nop, 0, 0, 0);
    proto.op_ad(Opcode::ForGLoop, 1, -2).aux(1);
    proto.op_abc(Opcode::Return, 0, 1, 0);
    mb.proto(proto);

    let env = Table::new_ref();
    env.borrow_mut().set_str("t".into(), Value::table());
    let err = run_with(&mb, Settings::default(), env, &[]).err().unwrap();
    assert!(err.to_string().contains("attempt to iterate over a table value"));
}

#[test]
fn loop_iterations_fire_the_interrupt_hook() {
    use std::cell::Cell;
    use std::rc::Rc;

    let hits: Rc<Cell<u32>> = Rc::new(Cell::new(0));
    let hook_hits = hits.clone();
    let settings = Settings {
        hooks: crate::host::hooks::CallHooks {
            interrupt: Some(Rc::new(move || {
                hook_hits.set(hook_hits.get() + 1);
            })),
            ..Default::default()
        },
        ..Settings::default()
    };

    // three-pass numeric loop, then return
    let mut proto = ProtoBuilder::new(5, 0);
    proto.op_ad(Opcode::LoadN, 1, 3);
    proto.op_ad(Opcode::LoadN, 2, 1);
    proto.op_ad(Opcode::LoadN, 3, 1);
    proto.op_ad(Opcode::ForNPrep, 1, 1);
    proto.op_ad(Opcode::ForNLoop, 1, -1);
    proto.op_abc(Opcode::Return, 0, 1, 0);
    let mut mb = ModuleBuilder::new();
    mb.proto(proto);

    run_with(&mb, settings, Table::new_ref(), &[]).unwrap();
    // three FORNLOOP iterations plus the RETURN
    assert_eq!(hits.get(), 4);
}
