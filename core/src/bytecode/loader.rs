//! Versioned module decoder.
//!
//! Decoding is two-pass per prototype: pass 1 turns code words into
//! [`Instr`] records (reading AUX words and appending placeholder slots so
//! jump deltas stay word-accurate), pass 2 binds constant references per
//! each opcode's K-mode. Any failure aborts the whole load; no interpreter
//! state exists until the loader returns.

use std::sync::Arc;

use anyhow::{Context, Result, bail, ensure};
use tracing::debug;

use crate::bytecode::instr::{Instr, KRef};
use crate::bytecode::module::{Constant, Module, Prototype};
use crate::bytecode::reader::Reader;
use crate::host::settings::Settings;
use crate::val::Value;

const MIN_VERSION: u8 = 3;
const MAX_VERSION: u8 = 6;

pub fn load_module(bytes: &[u8], settings: &Settings) -> Result<Module> {
    let mut r = Reader::new(bytes);

    let version = r.read_u8()?;
    if version == 0 {
        // version 0 marks a module the compiler rejected; the rest of the
        // blob is the error text
        bail!("module rejected by compiler: {}", r.read_rest_lossy());
    }
    ensure!(
        (MIN_VERSION..=MAX_VERSION).contains(&version),
        "unsupported bytecode version {} (supported {}..{})",
        version,
        MIN_VERSION,
        MAX_VERSION
    );

    let types_version = if version >= 4 {
        let tv = r.read_u8()?;
        ensure!((1..=3).contains(&tv), "unsupported types version {}", tv);
        tv
    } else {
        0
    };

    let n_strings = r.read_varint()? as usize;
    let mut strings: Vec<Arc<str>> = Vec::with_capacity(n_strings);
    for _ in 0..n_strings {
        let len = r.read_varint()? as usize;
        strings.push(Arc::from(r.read_string(len)?));
    }

    if types_version == 3 {
        // userdata type remap: (index, varint) pairs terminated by index 0
        loop {
            let index = r.read_u8()?;
            if index == 0 {
                break;
            }
            r.read_varint()?;
        }
    }

    let n_protos = r.read_varint()? as usize;
    let mut protos: Vec<Arc<Prototype>> = Vec::with_capacity(n_protos);
    for id in 0..n_protos {
        let proto = read_proto(&mut r, version, &strings, settings, id as u32, n_protos)
            .with_context(|| format!("prototype {}", id))?;
        protos.push(Arc::new(proto));
    }

    let main_id = r.read_varint()?;
    ensure!(
        (main_id as usize) < n_protos,
        "main prototype id {} out of range ({} prototypes)",
        main_id,
        n_protos
    );

    debug!(
        version,
        types_version,
        strings = strings.len(),
        protos = protos.len(),
        main = main_id,
        "module loaded"
    );

    Ok(Module {
        strings,
        protos,
        main_id,
        types_version,
    })
}

fn read_proto(
    r: &mut Reader<'_>,
    version: u8,
    strings: &[Arc<str>],
    settings: &Settings,
    bytecode_id: u32,
    n_protos: usize,
) -> Result<Prototype> {
    let max_stack_size = r.read_u8()?;
    let num_params = r.read_u8()?;
    let num_upvalues = r.read_u8()?;
    let is_vararg = r.read_u8()? != 0;

    if version >= 4 {
        let _flags = r.read_u8()?;
        let type_size = r.read_varint()? as usize;
        for _ in 0..type_size {
            r.read_u8()?;
        }
    }

    // pass 1: decode words, folding AUX words into their instruction and
    // keeping a placeholder slot in their place
    let size_code = r.read_varint()? as usize;
    let mut code: Vec<Instr> = Vec::with_capacity(size_code);
    let mut word_index = 0;
    while word_index < size_code {
        let word = r.read_u32_le()?;
        let mut instr = Instr::decode(word);
        word_index += 1;
        match instr.op {
            None => {
                ensure!(
                    !settings.fatal_unknown_opcodes,
                    "unknown opcode {} at pc {}",
                    instr.opbyte,
                    word_index - 1
                );
                code.push(instr);
            }
            Some(op) if op.has_aux() => {
                ensure!(word_index < size_code, "instruction at pc {} is missing its AUX word", word_index - 1);
                instr.aux = r.read_u32_le()?;
                word_index += 1;
                code.push(instr);
                code.push(Instr::aux_slot());
            }
            Some(_) => code.push(instr),
        }
    }

    let size_k = r.read_varint()? as usize;
    let mut constants: Vec<Constant> = Vec::with_capacity(size_k);
    for ki in 0..size_k {
        let tag = r.read_u8()?;
        let constant = match tag {
            0 => Constant::Nil,
            1 => Constant::Bool(r.read_u8()? != 0),
            2 => Constant::Number(r.read_f64()?),
            3 => {
                let index = r.read_varint()? as usize;
                ensure!(
                    index >= 1 && index <= strings.len(),
                    "string constant {} references string {} of {}",
                    ki,
                    index,
                    strings.len()
                );
                Constant::Str(strings[index - 1].clone())
            }
            4 => Constant::Import(r.read_u32_le()?),
            5 => {
                let len = r.read_varint()? as usize;
                let mut keys = Vec::with_capacity(len);
                for _ in 0..len {
                    let key_index = r.read_varint()? as usize;
                    match constants.get(key_index) {
                        Some(Constant::Str(s)) => keys.push(s.clone()),
                        _ => bail!("table constant {} references non-string key constant {}", ki, key_index),
                    }
                }
                Constant::Table(keys.into())
            }
            6 => {
                let proto_id = r.read_varint()?;
                ensure!(
                    (proto_id as usize) < n_protos,
                    "closure constant {} references prototype {}",
                    ki,
                    proto_id
                );
                Constant::Closure(proto_id)
            }
            7 => {
                let lanes = [r.read_f32()?, r.read_f32()?, r.read_f32()?, r.read_f32()?];
                Constant::Vector(settings.make_vector(lanes))
            }
            other => bail!("malformed constant tag {} in constant {}", other, ki),
        };
        constants.push(constant);
    }

    // pass 2: bind constants per K-mode
    for pc in 0..code.len() {
        let Some(op) = code[pc].op else { continue };
        let kmode = op.info().kmode;
        if kmode == 0 {
            continue;
        }
        let instr = &code[pc];
        let (aux, b, c, d) = (instr.aux, instr.b as usize, instr.c as usize, instr.d);
        let bound = match kmode {
            1 => Some(kref_at(&constants, aux as usize)?),
            2 => Some(kref_at(&constants, c)?),
            3 => {
                ensure!(d >= 0, "negative constant index {} at pc {}", d, pc);
                Some(kref_at(&constants, d as usize)?)
            }
            4 => {
                let count = (aux >> 30) as u8;
                ensure!((1..=3).contains(&count), "import chain at pc {} has count {}", pc, count);
                let ids = [(aux >> 20) & 0x3FF, (aux >> 10) & 0x3FF, aux & 0x3FF];
                let mut names: [Option<Value>; 3] = [None, None, None];
                for step in 0..count as usize {
                    let value = kref_at(&constants, ids[step] as usize)?;
                    match value {
                        KRef::Value(v) => names[step] = Some(v),
                        _ => bail!("import chain at pc {} references a non-scalar constant", pc),
                    }
                }
                let resolved = if settings.use_import_constants {
                    Some(resolve_static_import(settings, &names, count)?)
                } else {
                    None
                };
                let instr = &mut code[pc];
                instr.kc = count;
                let [k0, k1, k2] = names;
                instr.k0 = k0;
                instr.k1 = k1;
                instr.k2 = k2;
                if let Some(value) = resolved {
                    instr.k = KRef::Value(value);
                }
                continue;
            }
            5 => {
                let instr = &mut code[pc];
                instr.k = KRef::Value(Value::Bool(aux & 1 == 1));
                instr.kn = aux >> 31 == 1;
                continue;
            }
            6 => {
                let value = kref_at(&constants, (aux & 0xFF_FFFF) as usize)?;
                let instr = &mut code[pc];
                instr.k = value;
                instr.kn = aux >> 31 == 1;
                continue;
            }
            7 => Some(kref_at(&constants, b)?),
            8 => {
                // variable-count nibble; the narrow mask is part of the
                // format
                code[pc].k = KRef::VarCount((aux & 0xF) as u8);
                continue;
            }
            other => bail!("opcode {} declares unsupported K-mode {}", op.mnemonic(), other),
        };
        if let Some(kref) = bound {
            code[pc].k = kref;
        }
    }

    let size_p = r.read_varint()? as usize;
    let mut child_protos = Vec::with_capacity(size_p);
    for _ in 0..size_p {
        let child = r.read_varint()?;
        ensure!((child as usize) < n_protos, "child prototype id {} out of range", child);
        child_protos.push(child);
    }

    let line_defined = r.read_varint()?;
    let debug_name_index = r.read_varint()? as usize;
    let debug_name = if debug_name_index == 0 {
        None
    } else {
        ensure!(debug_name_index <= strings.len(), "debug name index {} out of range", debug_name_index);
        Some(strings[debug_name_index - 1].clone())
    };

    let instruction_line_info = if r.read_u8()? != 0 {
        Some(read_line_info(r, size_code)?)
    } else {
        None
    };

    if r.read_u8()? != 0 {
        skip_debug_info(r)?;
    }

    Ok(Prototype {
        max_stack_size,
        num_params,
        num_upvalues,
        is_vararg,
        code,
        constants,
        protos: child_protos,
        line_defined,
        debug_name,
        instruction_line_info,
        bytecode_id,
    })
}

fn kref_at(constants: &[Constant], index: usize) -> Result<KRef> {
    let constant = constants
        .get(index)
        .with_context(|| format!("constant index {} out of range ({} constants)", index, constants.len()))?;
    Ok(match constant {
        Constant::Nil => KRef::Value(Value::Nil),
        Constant::Bool(b) => KRef::Value(Value::Bool(*b)),
        Constant::Number(n) => KRef::Value(Value::Number(*n)),
        Constant::Str(s) => KRef::Value(Value::Str(s.clone())),
        Constant::Vector(v) => KRef::Value(v.clone()),
        Constant::Table(keys) => KRef::Keys(keys.clone()),
        Constant::Closure(id) => KRef::Proto(*id),
        Constant::Import(_) => KRef::None,
    })
}

/// Walk the static environment along the import chain, stopping at the
/// first nil.
fn resolve_static_import(settings: &Settings, names: &[Option<Value>; 3], count: u8) -> Result<Value> {
    let env = settings
        .static_environment
        .as_ref()
        .context("use_import_constants requires a static_environment")?;
    let mut current = match &names[0] {
        Some(name) => env.borrow().get(name),
        None => Value::Nil,
    };
    for name in names.iter().take(count as usize).skip(1) {
        if current.is_nil() {
            break;
        }
        let Some(name) = name else { break };
        current = match &current {
            Value::Table(t) => t.borrow().get(name),
            _ => Value::Nil,
        };
    }
    Ok(current)
}

fn read_line_info(r: &mut Reader<'_>, size_code: usize) -> Result<Vec<u32>> {
    let gap_log2 = r.read_u8()? as u32;

    let mut rel: Vec<u8> = Vec::with_capacity(size_code);
    let mut last: u8 = 0;
    for _ in 0..size_code {
        last = last.wrapping_add(r.read_u8()?);
        rel.push(last);
    }

    let abs_count = if size_code == 0 { 0 } else { ((size_code - 1) >> gap_log2) + 1 };
    let mut abs: Vec<u32> = Vec::with_capacity(abs_count);
    let mut last_abs: u32 = 0;
    for _ in 0..abs_count {
        last_abs = last_abs.wrapping_add(r.read_u32_le()?);
        abs.push(last_abs);
    }

    Ok((0..size_code)
        .map(|pc| abs[pc >> gap_log2].wrapping_add(rel[pc] as u32))
        .collect())
}

/// Locals and upvalue names; read and discarded.
fn skip_debug_info(r: &mut Reader<'_>) -> Result<()> {
    let size_locals = r.read_varint()? as usize;
    for _ in 0..size_locals {
        r.read_varint()?; // name
        r.read_varint()?; // start pc
        r.read_varint()?; // end pc
        r.read_u8()?; // register
    }
    let size_upvalues = r.read_varint()? as usize;
    for _ in 0..size_upvalues {
        r.read_varint()?; // name
    }
    Ok(())
}
