//! JVM instruction boundaries.
//!
//! Only instruction lengths and a handful of operand shapes matter here: the
//! rewriter never interprets code, it just has to step over every
//! instruction correctly and recognize the few it reacts to.

use crate::error::{Error, Result};

#[allow(missing_docs)]
pub const LDC: u8 = 0x12;
#[allow(missing_docs)]
pub const LDC_W: u8 = 0x13;
#[allow(missing_docs)]
pub const LDC2_W: u8 = 0x14;
#[allow(missing_docs)]
pub const GOTO: u8 = 0xA7;
#[allow(missing_docs)]
pub const JSR: u8 = 0xA8;
#[allow(missing_docs)]
pub const TABLESWITCH: u8 = 0xAA;
#[allow(missing_docs)]
pub const LOOKUPSWITCH: u8 = 0xAB;
#[allow(missing_docs)]
pub const RETURN: u8 = 0xB1;
#[allow(missing_docs)]
pub const GETSTATIC: u8 = 0xB2;
#[allow(missing_docs)]
pub const PUTSTATIC: u8 = 0xB3;
#[allow(missing_docs)]
pub const INVOKESPECIAL: u8 = 0xB7;
#[allow(missing_docs)]
pub const NEW: u8 = 0xBB;
#[allow(missing_docs)]
pub const ANEWARRAY: u8 = 0xBD;
#[allow(missing_docs)]
pub const WIDE: u8 = 0xC4;
#[allow(missing_docs)]
pub const IFNULL: u8 = 0xC6;
#[allow(missing_docs)]
pub const IFNONNULL: u8 = 0xC7;
#[allow(missing_docs)]
pub const GOTO_W: u8 = 0xC8;
#[allow(missing_docs)]
pub const JSR_W: u8 = 0xC9;
#[allow(missing_docs)]
pub const IINC: u8 = 0x84;

/// How an instruction encodes a jump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jump {
    /// Signed 16-bit offset right after the opcode
    Short,
    /// Signed 32-bit offset right after the opcode
    Long,
    /// `tableswitch` or `lookupswitch`
    Switch,
}

/// One decoded instruction boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the opcode within the code array
    pub offset: usize,
    /// The opcode byte
    pub opcode: u8,
    /// Total length including operands and switch padding
    pub len: usize,
}

impl Instruction {
    /// Offset just past this instruction
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// Read the unsigned 16-bit operand following the opcode
    pub fn u2_operand(&self, code: &[u8]) -> u16 {
        u16::from_be_bytes([code[self.offset + 1], code[self.offset + 2]])
    }

    /// Constant pool index of an `ldc`, `ldc_w` or `ldc2_w`
    pub fn constant_index(&self, code: &[u8]) -> Option<u16> {
        match self.opcode {
            LDC => Some(code[self.offset + 1] as u16),
            LDC_W | LDC2_W => Some(self.u2_operand(code)),
            _ => None,
        }
    }

    /// Jump encoding, if this instruction branches
    pub fn jump(&self) -> Option<Jump> {
        jump_kind(self.opcode)
    }
}

/// Jump encoding of an opcode, if it branches
pub fn jump_kind(opcode: u8) -> Option<Jump> {
    match opcode {
        0x99..=JSR | IFNULL | IFNONNULL => Some(Jump::Short),
        GOTO_W | JSR_W => Some(Jump::Long),
        TABLESWITCH | LOOKUPSWITCH => Some(Jump::Switch),
        _ => None,
    }
}

/// Padding between a switch opcode at `offset` and its 4-byte aligned operands
pub fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

/// Decode the instruction starting at `offset`
pub fn decode(code: &[u8], offset: usize) -> Result<Instruction> {
    let opcode = code[offset];
    let len = match opcode {
        0x00..=0x0F => 1,
        0x10 => 2,
        0x11 => 3,
        LDC => 2,
        LDC_W | LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1A..=0x35 => 1,
        0x36..=0x3A => 2,
        0x3B..=0x83 => 1,
        IINC => 3,
        0x85..=0x98 => 1,
        0x99..=JSR => 3,
        0xA9 => 2,
        TABLESWITCH => {
            let base = offset + 1 + switch_padding(offset);
            let low = read_i4(code, base + 4, offset)?;
            let high = read_i4(code, base + 8, offset)?;
            if high < low {
                return Err(Error::malformed(
                    offset,
                    format!("tableswitch with high {} below low {}", high, low),
                ));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            base + 12 + count * 4 - offset
        }
        LOOKUPSWITCH => {
            let base = offset + 1 + switch_padding(offset);
            let pairs = read_i4(code, base + 4, offset)?;
            if pairs < 0 {
                return Err(Error::malformed(
                    offset,
                    format!("lookupswitch with {} pairs", pairs),
                ));
            }
            base + 8 + pairs as usize * 8 - offset
        }
        0xAC..=RETURN => 1,
        GETSTATIC..=0xB8 => 3,
        0xB9 | 0xBA => 5,
        NEW => 3,
        0xBC => 2,
        ANEWARRAY => 3,
        0xBE | 0xBF => 1,
        0xC0 | 0xC1 => 3,
        0xC2 | 0xC3 => 1,
        WIDE => match code.get(offset + 1) {
            Some(&IINC) => 6,
            Some(_) => 4,
            None => return Err(Error::malformed(offset, "truncated wide instruction")),
        },
        0xC5 => 4,
        IFNULL | IFNONNULL => 3,
        GOTO_W | JSR_W => 5,
        other => {
            return Err(Error::malformed(
                offset,
                format!("invalid opcode 0x{:02x}", other),
            ))
        }
    };

    if offset + len > code.len() {
        return Err(Error::malformed(
            offset,
            format!("instruction 0x{:02x} runs past the end of the code array", opcode),
        ));
    }

    Ok(Instruction {
        offset,
        opcode,
        len,
    })
}

/// Decode every instruction of a code array, in order
pub fn decode_all(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let instruction = decode(code, offset)?;
        offset = instruction.end();
        instructions.push(instruction);
    }
    Ok(instructions)
}

/// Read a big-endian i32 at `at`, blaming the instruction at `offset`
pub fn read_i4(code: &[u8], at: usize, offset: usize) -> Result<i32> {
    code.get(at..at + 4)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::malformed(offset, "truncated switch operands"))
}
