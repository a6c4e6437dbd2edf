//! Re-layout of a method body after an instruction grows.
//!
//! Widening `ldc` to `ldc_w` shifts every later instruction by one byte.
//! Everything in the `Code` attribute that names a code offset has to follow:
//! jump operands, switch padding, the exception table, and the debug and
//! verification attributes.

use crate::classfile::opcode::{self, Instruction, Jump};
use crate::classfile::ByteReader;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Old-to-new mapping of instruction offsets
#[derive(Debug, Clone)]
pub struct Relocation {
    unit: String,
    old_starts: Vec<usize>,
    new_starts: Vec<usize>,
    old_len: usize,
    new_len: usize,
}

impl Relocation {
    /// New offset of the instruction that started at `old`, or of the code end
    pub fn map(&self, old: usize) -> Result<usize> {
        if old == self.old_len {
            return Ok(self.new_len);
        }
        self.old_starts
            .binary_search(&old)
            .map(|i| self.new_starts[i])
            .map_err(|_| {
                Error::relocation(
                    &self.unit,
                    format!("offset {} is not an instruction boundary", old),
                )
            })
    }

    fn map_u2(&self, old: u16) -> Result<u16> {
        let new = self.map(old as usize)?;
        u16::try_from(new).map_err(|_| {
            Error::relocation(&self.unit, format!("offset {} does not fit in u2", new))
        })
    }

    /// Length of the relocated code array
    pub fn new_len(&self) -> usize {
        self.new_len
    }
}

/// Re-emit `code` with constant operands replaced by `patches`.
///
/// `patches` maps the offset of an `ldc`/`ldc_w` to its new constant index;
/// a narrow `ldc` whose new index does not fit in one byte becomes `ldc_w`.
pub fn relocate_code(
    unit: &str,
    code: &[u8],
    instructions: &[Instruction],
    patches: &HashMap<usize, u16>,
) -> Result<(Vec<u8>, Relocation)> {
    let widened = |instruction: &Instruction| {
        instruction.opcode == opcode::LDC
            && patches
                .get(&instruction.offset)
                .is_some_and(|&index| index > 0xFF)
    };

    let mut new_starts = Vec::with_capacity(instructions.len());
    let mut cursor = 0usize;
    for instruction in instructions {
        new_starts.push(cursor);
        cursor += if widened(instruction) {
            3
        } else if instruction.jump() == Some(Jump::Switch) {
            instruction.len - opcode::switch_padding(instruction.offset)
                + opcode::switch_padding(cursor)
        } else {
            instruction.len
        };
    }
    if cursor > u16::MAX as usize {
        return Err(Error::relocation(
            unit,
            format!("code grows to {} bytes", cursor),
        ));
    }

    let relocation = Relocation {
        unit: unit.to_owned(),
        old_starts: instructions.iter().map(|i| i.offset).collect(),
        new_starts,
        old_len: code.len(),
        new_len: cursor,
    };

    let mut out = Vec::with_capacity(cursor);
    for (instruction, &new_offset) in instructions.iter().zip(&relocation.new_starts) {
        let old_offset = instruction.offset;
        let original = &code[old_offset..instruction.end()];

        if let Some(&index) = patches.get(&old_offset) {
            if instruction.opcode == opcode::LDC && index <= 0xFF {
                out.extend_from_slice(&[opcode::LDC, index as u8]);
            } else {
                out.push(opcode::LDC_W);
                out.extend_from_slice(&index.to_be_bytes());
            }
            continue;
        }

        match instruction.jump() {
            None => out.extend_from_slice(original),
            Some(Jump::Short) => {
                let target = jump_target(old_offset, i16::from_be_bytes([original[1], original[2]]) as i32);
                let delta = relocation.map(target)? as i64 - new_offset as i64;
                let delta = i16::try_from(delta).map_err(|_| {
                    Error::relocation(
                        unit,
                        format!("jump at {} no longer fits a 16-bit offset", old_offset),
                    )
                })?;
                out.push(instruction.opcode);
                out.extend_from_slice(&delta.to_be_bytes());
            }
            Some(Jump::Long) => {
                let relative = opcode::read_i4(code, old_offset + 1, old_offset)?;
                let target = jump_target(old_offset, relative);
                let delta = (relocation.map(target)? as i64 - new_offset as i64) as i32;
                out.push(instruction.opcode);
                out.extend_from_slice(&delta.to_be_bytes());
            }
            Some(Jump::Switch) => {
                emit_switch(code, instruction, new_offset, &relocation, &mut out)?;
            }
        }
    }

    debug_assert_eq!(out.len(), relocation.new_len);
    Ok((out, relocation))
}

/// Absolute target of a jump; a negative target wraps and then fails to map
fn jump_target(offset: usize, relative: i32) -> usize {
    (offset as i64 + relative as i64) as usize
}

fn emit_switch(
    code: &[u8],
    instruction: &Instruction,
    new_offset: usize,
    relocation: &Relocation,
    out: &mut Vec<u8>,
) -> Result<()> {
    let old_offset = instruction.offset;
    let remap = |relative: i32| -> Result<[u8; 4]> {
        let target = jump_target(old_offset, relative);
        let delta = (relocation.map(target)? as i64 - new_offset as i64) as i32;
        Ok(delta.to_be_bytes())
    };

    out.push(instruction.opcode);
    out.resize(out.len() + opcode::switch_padding(new_offset), 0);

    let mut at = old_offset + 1 + opcode::switch_padding(old_offset);
    let default = opcode::read_i4(code, at, old_offset)?;
    out.extend_from_slice(&remap(default)?);
    at += 4;

    if instruction.opcode == opcode::TABLESWITCH {
        let low = opcode::read_i4(code, at, old_offset)?;
        let high = opcode::read_i4(code, at + 4, old_offset)?;
        out.extend_from_slice(&code[at..at + 8]);
        at += 8;
        for _ in low..=high {
            out.extend_from_slice(&remap(opcode::read_i4(code, at, old_offset)?)?);
            at += 4;
        }
    } else {
        let pairs = opcode::read_i4(code, at, old_offset)?;
        out.extend_from_slice(&code[at..at + 4]);
        at += 4;
        for _ in 0..pairs {
            out.extend_from_slice(&code[at..at + 4]);
            out.extend_from_slice(&remap(opcode::read_i4(code, at + 4, old_offset)?)?);
            at += 8;
        }
    }
    Ok(())
}

/// Remap one exception table row
pub fn remap_exception(relocation: &Relocation, row: [u16; 4]) -> Result<[u16; 4]> {
    let [start, end, handler, catch_type] = row;
    Ok([
        relocation.map_u2(start)?,
        relocation.map_u2(end)?,
        relocation.map_u2(handler)?,
        catch_type,
    ])
}

/// Remap the payload of a `Code` sub-attribute
pub fn remap_attribute(relocation: &Relocation, name: &str, body: &[u8]) -> Result<Vec<u8>> {
    match name {
        "LineNumberTable" => remap_line_numbers(relocation, body),
        "LocalVariableTable" | "LocalVariableTypeTable" => remap_local_variables(relocation, body),
        "StackMapTable" => remap_stack_map(relocation, body),
        other => Err(Error::relocation(
            &relocation.unit,
            format!("don't know how to relocate the {} attribute", other),
        )),
    }
}

fn remap_line_numbers(relocation: &Relocation, body: &[u8]) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(body);
    let count = reader.u2()?;
    let mut out = count.to_be_bytes().to_vec();
    for _ in 0..count {
        let start = reader.u2()?;
        let line = reader.u2()?;
        out.extend_from_slice(&relocation.map_u2(start)?.to_be_bytes());
        out.extend_from_slice(&line.to_be_bytes());
    }
    Ok(out)
}

fn remap_local_variables(relocation: &Relocation, body: &[u8]) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(body);
    let count = reader.u2()?;
    let mut out = count.to_be_bytes().to_vec();
    for _ in 0..count {
        let start = reader.u2()?;
        let length = reader.u2()?;
        let rest = reader.bytes(6)?;
        let new_start = relocation.map_u2(start)?;
        let new_end = relocation.map_u2(start.saturating_add(length))?;
        out.extend_from_slice(&new_start.to_be_bytes());
        out.extend_from_slice(&(new_end - new_start).to_be_bytes());
        out.extend_from_slice(rest);
    }
    Ok(out)
}

/// Verification type, with the offset of `Uninitialized` kept separately
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VerificationType {
    tag: u8,
    operand: Option<u16>,
}

const ITEM_OBJECT: u8 = 7;
const ITEM_UNINITIALIZED: u8 = 8;

impl VerificationType {
    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let at = reader.position();
        let tag = reader.u1()?;
        let operand = match tag {
            0..=6 => None,
            ITEM_OBJECT | ITEM_UNINITIALIZED => Some(reader.u2()?),
            other => {
                return Err(Error::malformed(
                    at,
                    format!("unknown verification type tag {}", other),
                ))
            }
        };
        Ok(Self { tag, operand })
    }

    fn write(&self, relocation: &Relocation, out: &mut Vec<u8>) -> Result<()> {
        out.push(self.tag);
        match (self.tag, self.operand) {
            (ITEM_UNINITIALIZED, Some(offset)) => {
                out.extend_from_slice(&relocation.map_u2(offset)?.to_be_bytes())
            }
            (_, Some(operand)) => out.extend_from_slice(&operand.to_be_bytes()),
            (_, None) => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Same,
    SameLocals1(VerificationType),
    Chop(u8),
    Append(Vec<VerificationType>),
    Full {
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

fn read_types(reader: &mut ByteReader<'_>, count: usize) -> Result<Vec<VerificationType>> {
    (0..count).map(|_| VerificationType::read(reader)).collect()
}

fn remap_stack_map(relocation: &Relocation, body: &[u8]) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(body);
    let count = reader.u2()?;
    let mut out = count.to_be_bytes().to_vec();

    let mut old_previous: Option<usize> = None;
    let mut new_previous: Option<usize> = None;

    for _ in 0..count {
        let at = reader.position();
        let frame_type = reader.u1()?;
        let (delta, frame) = match frame_type {
            0..=63 => (frame_type as u16, Frame::Same),
            64..=127 => (
                (frame_type - 64) as u16,
                Frame::SameLocals1(VerificationType::read(&mut reader)?),
            ),
            247 => {
                let delta = reader.u2()?;
                (delta, Frame::SameLocals1(VerificationType::read(&mut reader)?))
            }
            248..=250 => (reader.u2()?, Frame::Chop(251 - frame_type)),
            251 => (reader.u2()?, Frame::Same),
            252..=254 => {
                let delta = reader.u2()?;
                let types = read_types(&mut reader, (frame_type - 251) as usize)?;
                (delta, Frame::Append(types))
            }
            255 => {
                let delta = reader.u2()?;
                let locals_count = reader.u2()? as usize;
                let locals = read_types(&mut reader, locals_count)?;
                let stack_count = reader.u2()? as usize;
                let stack = read_types(&mut reader, stack_count)?;
                (delta, Frame::Full { locals, stack })
            }
            other => {
                return Err(Error::malformed(
                    at,
                    format!("reserved stack map frame type {}", other),
                ))
            }
        };

        let old_offset = match old_previous {
            None => delta as usize,
            Some(previous) => previous + delta as usize + 1,
        };
        let new_offset = relocation.map(old_offset)?;
        let new_delta = match new_previous {
            None => new_offset,
            Some(previous) => new_offset - previous - 1,
        };
        let new_delta = u16::try_from(new_delta).map_err(|_| {
            Error::relocation(&relocation.unit, "stack map frame delta overflows")
        })?;
        old_previous = Some(old_offset);
        new_previous = Some(new_offset);

        write_frame(relocation, &frame, new_delta, &mut out)?;
    }

    Ok(out)
}

fn write_frame(relocation: &Relocation, frame: &Frame, delta: u16, out: &mut Vec<u8>) -> Result<()> {
    match frame {
        Frame::Same if delta <= 63 => out.push(delta as u8),
        Frame::Same => {
            out.push(251);
            out.extend_from_slice(&delta.to_be_bytes());
        }
        Frame::SameLocals1(item) => {
            if delta <= 63 {
                out.push(64 + delta as u8);
            } else {
                out.push(247);
                out.extend_from_slice(&delta.to_be_bytes());
            }
            item.write(relocation, out)?;
        }
        Frame::Chop(k) => {
            out.push(251 - k);
            out.extend_from_slice(&delta.to_be_bytes());
        }
        Frame::Append(items) => {
            out.push(251 + items.len() as u8);
            out.extend_from_slice(&delta.to_be_bytes());
            for item in items {
                item.write(relocation, out)?;
            }
        }
        Frame::Full { locals, stack } => {
            out.push(255);
            out.extend_from_slice(&delta.to_be_bytes());
            out.extend_from_slice(&(locals.len() as u16).to_be_bytes());
            for item in locals {
                item.write(relocation, out)?;
            }
            out.extend_from_slice(&(stack.len() as u16).to_be_bytes());
            for item in stack {
                item.write(relocation, out)?;
            }
        }
    }
    Ok(())
}
