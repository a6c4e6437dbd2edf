//! Structural layout of a class file.
//!
//! The layout records where each part of the class lives in the original
//! byte array instead of materializing it, so a rewrite can splice new bytes
//! into one region and copy everything else verbatim.

use super::pool::ConstantPool;
use super::reader::ByteReader;
use crate::error::{Error, Result};
use std::ops::Range;

/// Class file magic number
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Access flags relevant to enum detection (JVMS §4.5)
pub mod access {
    /// `ACC_STATIC`
    pub const STATIC: u16 = 0x0008;
    /// `ACC_FINAL`
    pub const FINAL: u16 = 0x0010;
    /// `ACC_ENUM`
    pub const ENUM: u16 = 0x4000;
    /// Every flag an enum constant field carries
    pub const ENUM_CONSTANT: u16 = STATIC | FINAL | ENUM;
}

/// How far into the class file to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Stop after the field table
    Fields,
    /// Parse methods and class attributes too, and require no trailing bytes
    Full,
}

/// Location of one attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpan {
    /// Utf8 index of the attribute name
    pub name_index: u16,
    /// Whole attribute, including its 6-byte header
    pub range: Range<usize>,
    /// Attribute payload only
    pub body: Range<usize>,
}

/// A field or method entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Access flags
    pub access_flags: u16,
    /// Utf8 index of the name
    pub name_index: u16,
    /// Utf8 index of the descriptor
    pub descriptor_index: u16,
    /// Attributes in declaration order
    pub attributes: Vec<AttributeSpan>,
}

/// Parsed class file structure
#[derive(Debug, Clone)]
pub struct ClassLayout {
    /// Decoded constant pool
    pub pool: ConstantPool,
    /// Offset just past the last constant pool entry
    pub pool_end: usize,
    /// Class access flags
    pub access_flags: u16,
    /// Class index of this class
    pub this_class: u16,
    /// Class index of the superclass, 0 for `java/lang/Object`
    pub super_class: u16,
    /// Field table
    pub fields: Vec<MemberInfo>,
    /// Method table, empty when parsed with [`Depth::Fields`]
    pub methods: Vec<MemberInfo>,
}

impl ClassLayout {
    /// Parse `data` down to `depth`
    pub fn parse(data: &[u8], depth: Depth) -> Result<Self> {
        let mut reader = ByteReader::new(data);

        let magic = reader.u4()?;
        if magic != MAGIC {
            return Err(Error::malformed(
                0,
                format!("bad magic 0x{:08x}", magic),
            ));
        }
        let _minor = reader.u2()?;
        let _major = reader.u2()?;

        let pool = ConstantPool::parse(&mut reader)?;
        let pool_end = reader.position();

        let access_flags = reader.u2()?;
        let this_class = reader.u2()?;
        let super_class = reader.u2()?;

        let interfaces = reader.u2()? as usize;
        reader.skip(interfaces * 2)?;

        let fields = read_members(&mut reader)?;

        let methods = match depth {
            Depth::Fields => Vec::new(),
            Depth::Full => {
                let methods = read_members(&mut reader)?;
                read_attributes(&mut reader)?;
                if reader.remaining() != 0 {
                    return Err(Error::malformed(
                        reader.position(),
                        format!("{} trailing bytes after class attributes", reader.remaining()),
                    ));
                }
                methods
            }
        };

        Ok(Self {
            pool,
            pool_end,
            access_flags,
            this_class,
            super_class,
            fields,
            methods,
        })
    }

    /// Internal name of this class
    pub fn name(&self) -> Result<&str> {
        self.pool.class_name(self.this_class)
    }

    /// Internal name of the superclass, `None` for `java/lang/Object` itself
    pub fn super_name(&self) -> Result<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.pool.class_name(self.super_class).map(Some)
    }

    /// Find a method by name and descriptor
    pub fn method(&self, name: &str, descriptor: &str) -> Result<Option<&MemberInfo>> {
        for method in &self.methods {
            if self.pool.utf8(method.name_index)? == name
                && self.pool.utf8(method.descriptor_index)? == descriptor
            {
                return Ok(Some(method));
            }
        }
        Ok(None)
    }

    /// Find a member's attribute by name
    pub fn attribute<'m>(&self, member: &'m MemberInfo, name: &str) -> Result<Option<&'m AttributeSpan>> {
        for attribute in &member.attributes {
            if self.pool.utf8(attribute.name_index)? == name {
                return Ok(Some(attribute));
            }
        }
        Ok(None)
    }
}

fn read_members(reader: &mut ByteReader<'_>) -> Result<Vec<MemberInfo>> {
    let count = reader.u2()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        members.push(MemberInfo {
            access_flags: reader.u2()?,
            name_index: reader.u2()?,
            descriptor_index: reader.u2()?,
            attributes: read_attributes(reader)?,
        });
    }
    Ok(members)
}

/// Read an `attributes_count` followed by that many attributes
pub fn read_attributes(reader: &mut ByteReader<'_>) -> Result<Vec<AttributeSpan>> {
    let count = reader.u2()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let start = reader.position();
        let name_index = reader.u2()?;
        let len = reader.u4()? as usize;
        let body_start = reader.position();
        reader.skip(len)?;
        attributes.push(AttributeSpan {
            name_index,
            range: start..reader.position(),
            body: body_start..reader.position(),
        });
    }
    Ok(attributes)
}

/// One row of a method's exception table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// First covered offset
    pub start_pc: u16,
    /// Offset just past the covered range
    pub end_pc: u16,
    /// Handler offset
    pub handler_pc: u16,
    /// Class index of the caught type, 0 for any
    pub catch_type: u16,
}

/// Decoded `Code` attribute
#[derive(Debug, Clone)]
pub struct CodeAttribute {
    /// `max_stack`
    pub max_stack: u16,
    /// `max_locals`
    pub max_locals: u16,
    /// Location of the bytecode in the class file
    pub code: Range<usize>,
    /// Exception table rows
    pub exception_table: Vec<ExceptionEntry>,
    /// Nested attributes (line numbers, stack maps, ...)
    pub attributes: Vec<AttributeSpan>,
}

impl CodeAttribute {
    /// Decode the `Code` attribute whose location is `span`
    pub fn parse(data: &[u8], span: &AttributeSpan) -> Result<Self> {
        let body = &data[..span.body.end];
        let mut reader = ByteReader::at(body, span.body.start);

        let max_stack = reader.u2()?;
        let max_locals = reader.u2()?;
        let code_len = reader.u4()? as usize;
        if code_len == 0 || code_len > u16::MAX as usize {
            return Err(Error::malformed(
                reader.position(),
                format!("invalid code_length {}", code_len),
            ));
        }
        let code_start = reader.position();
        reader.skip(code_len)?;
        let code = code_start..reader.position();

        let rows = reader.u2()? as usize;
        let mut exception_table = Vec::with_capacity(rows);
        for _ in 0..rows {
            exception_table.push(ExceptionEntry {
                start_pc: reader.u2()?,
                end_pc: reader.u2()?,
                handler_pc: reader.u2()?,
                catch_type: reader.u2()?,
            });
        }

        let attributes = read_attributes(&mut reader)?;
        if reader.position() != span.body.end {
            return Err(Error::malformed(
                reader.position(),
                "Code attribute length does not match its contents",
            ));
        }

        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }
}
