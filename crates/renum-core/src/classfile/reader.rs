//! Big-endian cursor over class file bytes.
//!
//! Every multi-byte quantity in a class file is stored big-endian. The cursor
//! tracks its absolute offset so decode errors can point at the exact byte.

use crate::error::{Error, Result};

/// Forward-only reader over a byte slice
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Creates a reader positioned at `position`
    pub fn at(data: &'a [u8], position: usize) -> Self {
        Self { data, position }
    }

    /// Current absolute offset
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Consume `len` bytes and return them
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::malformed(
                    self.position,
                    format!("need {} bytes, have {}", len, self.remaining()),
                )
            })?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    /// Skip `len` bytes
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len).map(|_| ())
    }

    /// Read an unsigned byte
    pub fn u1(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    /// Read a big-endian u16
    pub fn u2(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Read a big-endian u32
    pub fn u4(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a big-endian i32
    pub fn i4(&mut self) -> Result<i32> {
        self.u4().map(|v| v as i32)
    }

    /// Read a big-endian 8-byte quantity
    pub fn u4_pair(&mut self) -> Result<u64> {
        let high = self.u4()? as u64;
        let low = self.u4()? as u64;
        Ok((high << 32) | low)
    }
}

/// Decode a "modified UTF-8" string as stored in `CONSTANT_Utf8` entries.
///
/// Differs from standard UTF-8 in encoding NUL as `C0 80` and supplementary
/// characters as surrogate pairs of 3-byte sequences. Unpaired surrogates
/// decode to U+FFFD.
pub fn decode_modified_utf8(bytes: &[u8], offset: usize) -> Result<String> {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Ok(s.to_owned());
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        let (unit, len) = if b0 & 0x80 == 0 {
            (b0, 1)
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = continuation(bytes, i + 1, offset)?;
            (((b0 & 0x1F) << 6) | b1, 2)
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = continuation(bytes, i + 1, offset)?;
            let b2 = continuation(bytes, i + 2, offset)?;
            (((b0 & 0x0F) << 12) | (b1 << 6) | b2, 3)
        } else {
            return Err(Error::malformed(
                offset + i,
                format!("invalid modified UTF-8 lead byte 0x{:02x}", b0),
            ));
        };
        units.push(unit);
        i += len;
    }

    Ok(char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}

fn continuation(bytes: &[u8], i: usize, offset: usize) -> Result<u16> {
    match bytes.get(i) {
        Some(&b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
        _ => Err(Error::malformed(
            offset + i,
            "truncated modified UTF-8 sequence",
        )),
    }
}

/// Encode a string as modified UTF-8.
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}
