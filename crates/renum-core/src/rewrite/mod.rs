//! Static initializer rewriting.
//!
//! This module re-scans the `<clinit>` of an enum classified by
//! [`crate::classify`] and points the name literal of every construction
//! sequence at the declared field name.
//!
//! ## Output Layout
//!
//! The rewritten class is spliced together from the original bytes:
//!
//! 1. header and original constant pool, verbatim
//! 2. appended `CONSTANT_String`/`CONSTANT_Utf8` entries, if any were needed
//! 3. everything up to the static initializer's `Code` attribute, verbatim
//! 4. the rebuilt `Code` attribute
//! 5. everything after it, verbatim
//!
//! Only `constant_pool_count` and the `Code` attribute can change; when every
//! literal already matches, the output equals the input.

mod machine;
mod relocate;

use crate::classfile::{
    opcode, ClassLayout, CodeAttribute, ConstantPool, Depth, STATIC_INITIALIZER,
    STATIC_INITIALIZER_DESCRIPTOR,
};
use crate::classify::UnitDescriptor;
use crate::error::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, trace};

pub use machine::{Action, ConstructionMachine, Literal, Step};
pub use relocate::{relocate_code, remap_attribute, remap_exception, Relocation};

/// Result of rewriting one enum class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenUnit {
    /// New class file bytes
    pub bytes: Vec<u8>,
    /// Size of `bytes`, for the archive entry
    pub size: u64,
    /// Construction sites visited (equals the number of enum constants)
    pub substitutions: usize,
    /// Sites whose literal actually changed
    pub changed: usize,
}

impl RewrittenUnit {
    fn new(bytes: Vec<u8>, substitutions: usize, changed: usize) -> Self {
        Self {
            size: bytes.len() as u64,
            bytes,
            substitutions,
            changed,
        }
    }
}

/// Rewrite the static initializer of `data` so each construction sequence
/// loads the name of the field it is stored into.
pub fn rewrite_unit(data: &[u8], unit: &UnitDescriptor) -> Result<RewrittenUnit> {
    let layout = ClassLayout::parse(data, Depth::Full)?;
    let mut machine = ConstructionMachine::new(&unit.internal_name, &unit.enum_field_names);

    let Some(clinit) = layout.method(STATIC_INITIALIZER, STATIC_INITIALIZER_DESCRIPTOR)? else {
        // No initializer means no constructions; finish() reports the mismatch
        let substitutions = machine.finish()?;
        return Ok(RewrittenUnit::new(data.to_vec(), substitutions, 0));
    };
    let span = layout.attribute(clinit, "Code")?.ok_or_else(|| {
        Error::malformed(0, format!("{} has a static initializer without code", unit.internal_name))
    })?;
    let code_attr = CodeAttribute::parse(data, span)?;
    let code = &data[code_attr.code.clone()];
    let instructions = opcode::decode_all(code)?;

    let mut pool = layout.pool.clone();
    let mut patches: HashMap<usize, u16> = HashMap::new();
    let mut substituted = 0usize;

    for instruction in &instructions {
        let description: String;
        let step = match instruction.opcode {
            opcode::NEW => Step::Allocate {
                class: layout.pool.class_name(instruction.u2_operand(code))?,
            },
            opcode::LDC | opcode::LDC_W | opcode::LDC2_W => {
                let index = constant_operand(instruction, code);
                match layout.pool.string_value(index)? {
                    Some(value) => Step::LoadConstant(Literal::String(value)),
                    None => {
                        description = layout.pool.get(index)?.to_string();
                        Step::LoadConstant(Literal::Other(&description))
                    }
                }
            }
            opcode::PUTSTATIC => {
                let field = layout.pool.member_ref(instruction.u2_operand(code))?;
                Step::StoreStatic {
                    owner: field.owner,
                    name: field.name,
                    descriptor: field.descriptor,
                }
            }
            _ => Step::Other,
        };

        if let Action::Substitute(name) = machine.observe(step)? {
            substituted += 1;
            let current = constant_operand(instruction, code);
            if layout.pool.string_value(current)? == Some(name) {
                continue;
            }
            let target = pool.intern_string(name)?;
            if target != current {
                trace!(
                    "{}: ldc at {} now loads #{} instead of #{}",
                    unit.internal_name,
                    instruction.offset,
                    target,
                    current
                );
                patches.insert(instruction.offset, target);
            }
        }
    }

    let substitutions = machine.finish()?;
    debug_assert_eq!(substitutions, substituted);

    if patches.is_empty() {
        debug!(
            "{}: all {} name literals already match",
            unit.internal_name, substitutions
        );
        return Ok(RewrittenUnit::new(data.to_vec(), substitutions, 0));
    }

    let needs_relocation = instructions.iter().any(|i| {
        i.opcode == opcode::LDC && patches.get(&i.offset).is_some_and(|&index| index > 0xFF)
    });

    let new_code_attribute = if needs_relocation {
        debug!("{}: widening ldc, relocating static initializer", unit.internal_name);
        let (new_code, relocation) =
            relocate_code(&unit.internal_name, code, &instructions, &patches)?;
        build_code_attribute(data, span.name_index, &code_attr, &layout.pool, &new_code, Some(&relocation))?
    } else {
        let mut new_code = code.to_vec();
        for (&offset, &index) in &patches {
            if new_code[offset] == opcode::LDC {
                new_code[offset + 1] = index as u8;
            } else {
                new_code[offset + 1..offset + 3].copy_from_slice(&index.to_be_bytes());
            }
        }
        build_code_attribute(data, span.name_index, &code_attr, &layout.pool, &new_code, None)?
    };

    let bytes = splice(data, &layout, &pool, span.range.clone(), &new_code_attribute)?;
    debug!(
        "{}: {} of {} name literals changed ({} -> {} bytes)",
        unit.internal_name,
        patches.len(),
        substitutions,
        data.len(),
        bytes.len()
    );
    Ok(RewrittenUnit::new(bytes, substitutions, patches.len()))
}

/// Constant pool operand of an `ldc`-family instruction
fn constant_operand(instruction: &opcode::Instruction, code: &[u8]) -> u16 {
    if instruction.opcode == opcode::LDC {
        code[instruction.offset + 1] as u16
    } else {
        instruction.u2_operand(code)
    }
}

/// Serialize a complete `Code` attribute (header included) around `new_code`
fn build_code_attribute(
    data: &[u8],
    name_index: u16,
    original: &CodeAttribute,
    pool: &ConstantPool,
    new_code: &[u8],
    relocation: Option<&Relocation>,
) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(original.code.len() + 64);
    body.extend_from_slice(&original.max_stack.to_be_bytes());
    body.extend_from_slice(&original.max_locals.to_be_bytes());
    body.extend_from_slice(&(new_code.len() as u32).to_be_bytes());
    body.extend_from_slice(new_code);

    body.extend_from_slice(&(original.exception_table.len() as u16).to_be_bytes());
    for row in &original.exception_table {
        let mut values = [row.start_pc, row.end_pc, row.handler_pc, row.catch_type];
        if let Some(relocation) = relocation {
            values = remap_exception(relocation, values)?;
        }
        for value in values {
            body.extend_from_slice(&value.to_be_bytes());
        }
    }

    body.extend_from_slice(&(original.attributes.len() as u16).to_be_bytes());
    for attribute in &original.attributes {
        match relocation {
            None => body.extend_from_slice(&data[attribute.range.clone()]),
            Some(relocation) => {
                let name = pool.utf8(attribute.name_index)?;
                let payload = remap_attribute(relocation, name, &data[attribute.body.clone()])?;
                body.extend_from_slice(&attribute.name_index.to_be_bytes());
                body.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                body.extend_from_slice(&payload);
            }
        }
    }

    let mut attribute = Vec::with_capacity(body.len() + 6);
    attribute.extend_from_slice(&name_index.to_be_bytes());
    attribute.extend_from_slice(&(body.len() as u32).to_be_bytes());
    attribute.extend_from_slice(&body);
    Ok(attribute)
}

/// Reassemble the class around a replaced `Code` attribute and an extended pool
fn splice(
    data: &[u8],
    layout: &ClassLayout,
    pool: &ConstantPool,
    code_range: std::ops::Range<usize>,
    new_code_attribute: &[u8],
) -> Result<Vec<u8>> {
    let count = u16::try_from(pool.count())
        .map_err(|_| Error::malformed(8, "constant pool overflows 65535 entries"))?;
    let appended = pool.appended_bytes();

    let mut out = Vec::with_capacity(
        data.len() + appended.len() + new_code_attribute.len() - code_range.len(),
    );
    out.extend_from_slice(&data[..8]);
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(&data[10..layout.pool_end]);
    out.extend_from_slice(appended);
    out.extend_from_slice(&data[layout.pool_end..code_range.start]);
    out.extend_from_slice(new_code_attribute);
    out.extend_from_slice(&data[code_range.end..]);
    Ok(out)
}
