use super::*;
use crate::bytecode::builder::{BuildConst, ProtoBuilder};
use crate::bytecode::opcode::Opcode;

#[test]
fn setlist_and_gettablen() {
    // local t = {10, 20, 30}; return t[2]
    let mut proto = ProtoBuilder::new(5, 0);
    proto.op_abc(Opcode::NewTable, 0, 0, 0).aux(3);
    proto.op_ad(Opcode::LoadN, 1, 10);
    proto.op_ad(Opcode::LoadN, 2, 20);
    proto.op_ad(Opcode::LoadN, 3, 30);
    proto.op_abc(Opcode::SetList, 0, 1, 4).aux(1);
    proto.op_abc(Opcode::GetTableN, 1, 0, 1); // key C+1 = 2
    proto.op_abc(Opcode::Return, 1, 2, 0);
    let mut mb = ModuleBuilder::new();
    mb.proto(proto);

    assert_eq!(run(&mb), vec![number(20.0)]);
}

#[test]
fn setlist_multret_consumes_to_top() {
    // t = { f() } with f returning three values
    let mut mb = ModuleBuilder::new();
    let mut f = ProtoBuilder::new(3, 0);
    f.op_ad(Opcode::LoadN, 0, 7);
    f.op_ad(Opcode::LoadN, 1, 8);
    f.op_ad(Opcode::LoadN, 2, 9);
    f.op_abc(Opcode::Return, 0, 4, 0);
    let f_id = mb.proto(f);

    let mut main = ProtoBuilder::new(6, 0);
    main.op_abc(Opcode::NewTable, 0, 0, 0).aux(0);
    main.op_ad(Opcode::NewClosure, 1, 0);
    main.op_abc(Opcode::Call, 1, 1, 0); // multret into r1..
    main.op_abc(Opcode::SetList, 0, 1, 0).aux(1); // C = 0: consume to top
    main.op_abc(Opcode::Length, 1, 0, 0);
    main.op_abc(Opcode::GetTableN, 2, 0, 2); // t[3]
    main.op_abc(Opcode::Return, 1, 3, 0);
    main.child(f_id);
    let main_id = mb.proto(main);
    let mb = mb.main(main_id);

    assert_eq!(run(&mb), vec![number(3.0), number(9.0)]);
}

#[test]
fn string_keyed_access() {
    // t.answer = 42; return t.answer
    let mut mb = ModuleBuilder::new();
    let s = mb.string("answer");
    let mut proto = ProtoBuilder::new(3, 0);
    let k = proto.constant(BuildConst::Str(s));
    proto.op_abc(Opcode::NewTable, 0, 0, 0).aux(0);
    proto.op_ad(Opcode::LoadN, 1, 42);
    proto.op_abc(Opcode::SetTableKs, 1, 0, 0).aux(k);
    proto.op_abc(Opcode::GetTableKs, 2, 0, 0).aux(k);
    proto.op_abc(Opcode::Return, 2, 2, 0);
    mb.proto(proto);

    assert_eq!(run(&mb), vec![number(42.0)]);
}

#[test]
fn dynamic_keys_route_by_type() {
    // t[k] = v with a register key, read back with GETTABLE
    let mut mb = ModuleBuilder::new();
    let s = mb.string("name");
    let mut proto = ProtoBuilder::new(5, 0);
    let k = proto.constant(BuildConst::Str(s));
    proto.op_abc(Opcode::NewTable, 0, 0, 0).aux(0);
    proto.op_ad(Opcode::LoadK, 1, k as i16);
    proto.op_ad(Opcode::LoadN, 2, 5);
    proto.op_abc(Opcode::SetTable, 2, 0, 1); // t["name"] = 5
    proto.op_abc(Opcode::GetTable, 3, 0, 1);
    proto.op_abc(Opcode::Return, 3, 2, 0);
    mb.proto(proto);

    assert_eq!(run(&mb), vec![number(5.0)]);
}

#[test]
fn settablen_writes_integer_slots() {
    let mut proto = ProtoBuilder::new(3, 0);
    proto.op_abc(Opcode::NewTable, 0, 0, 0).aux(0);
    proto.op_ad(Opcode::LoadN, 1, 11);
    proto.op_abc(Opcode::SetTableN, 1, 0, 0); // t[1] = 11
    proto.op_abc(Opcode::Length, 2, 0, 0);
    proto.op_abc(Opcode::Return, 2, 2, 0);
    let mut mb = ModuleBuilder::new();
    mb.proto(proto);

    assert_eq!(run(&mb), vec![number(1.0)]);
}

#[test]
fn duptable_starts_empty() {
    let mut mb = ModuleBuilder::new();
    let a = mb.string("a");
    let mut proto = ProtoBuilder::new(2, 0);
    let ka = proto.constant(BuildConst::Str(a));
    let kt = proto.constant(BuildConst::Table(vec![ka]));
    proto.op_ad(Opcode::DupTable, 0, kt as i16);
    proto.op_abc(Opcode::GetTableKs, 1, 0, 0).aux(ka);
    proto.op_abc(Opcode::Return, 1, 2, 0);
    mb.proto(proto);

    // template keys only shape the table; values stay nil until written
    assert_eq!(run(&mb), vec![Value::Nil]);
}

#[test]
fn vector_fields_read_through_string_keys() {
    let mut mb = ModuleBuilder::new();
    let x = mb.string("x");
    let z = mb.string("z");
    let mut proto = ProtoBuilder::new(3, 0);
    let kv = proto.constant(BuildConst::Vector(1.5, 2.5, 3.5, 0.0));
    let kx = proto.constant(BuildConst::Str(x));
    let kz = proto.constant(BuildConst::Str(z));
    proto.op_ad(Opcode::LoadK, 0, kv as i16);
    proto.op_abc(Opcode::GetTableKs, 1, 0, 0).aux(kx);
    proto.op_abc(Opcode::GetTableKs, 2, 0, 0).aux(kz);
    proto.op_abc(Opcode::Return, 1, 3, 0);
    mb.proto(proto);

    assert_eq!(run(&mb), vec![number(1.5), number(3.5)]);
}

#[test]
fn indexing_a_number_is_a_type_error() {
    let mut proto = ProtoBuilder::new(3, 0);
    proto.op_ad(Opcode::LoadN, 0, 1);
    proto.op_ad(Opcode::LoadN, 1, 2);
    proto.op_abc(Opcode::GetTable, 2, 0, 1);
    proto.op_abc(Opcode::Return, 2, 2, 0);
    let mut mb = ModuleBuilder::new();
    mb.proto(proto);

    let err = run_with(&mb, Settings::default(), Table::new_ref(), &[]).err().unwrap();
    assert!(err.to_string().contains("attempt to index a number value"));
}
