//! Constant pool decoding and append-only extension.

use super::reader::{decode_modified_utf8, encode_modified_utf8, ByteReader};
use crate::error::{Error, Result};
use std::fmt;

/// Constant pool tags (JVMS §4.4)
pub mod tag {
    #![allow(missing_docs)]
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// A single decoded constant pool entry
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `CONSTANT_Utf8`
    Utf8(String),
    /// `CONSTANT_Integer`
    Integer(i32),
    /// `CONSTANT_Float`, kept as raw bits
    Float(u32),
    /// `CONSTANT_Long`
    Long(i64),
    /// `CONSTANT_Double`, kept as raw bits
    Double(u64),
    /// `CONSTANT_Class`
    Class {
        /// Utf8 index of the internal name
        name_index: u16,
    },
    /// `CONSTANT_String`
    String {
        /// Utf8 index of the value
        string_index: u16,
    },
    /// `CONSTANT_Fieldref`, `CONSTANT_Methodref` or `CONSTANT_InterfaceMethodref`
    MemberRef {
        /// Which of the three reference tags this is
        tag: u8,
        /// Class index of the owner
        class_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// `CONSTANT_NameAndType`
    NameAndType {
        /// Utf8 index of the name
        name_index: u16,
        /// Utf8 index of the descriptor
        descriptor_index: u16,
    },
    /// `CONSTANT_MethodHandle`
    MethodHandle {
        /// Reference kind (1..=9)
        kind: u8,
        /// Referenced member
        reference_index: u16,
    },
    /// `CONSTANT_MethodType`
    MethodType {
        /// Utf8 index of the descriptor
        descriptor_index: u16,
    },
    /// `CONSTANT_Dynamic` or `CONSTANT_InvokeDynamic`
    Dynamic {
        /// Which of the two tags this is
        tag: u8,
        /// Bootstrap method attribute index
        bootstrap_index: u16,
        /// NameAndType index
        name_and_type_index: u16,
    },
    /// `CONSTANT_Module` or `CONSTANT_Package`
    Named {
        /// Which of the two tags this is
        tag: u8,
        /// Utf8 index of the name
        name_index: u16,
    },
    /// Second slot of a Long or Double, and slot 0
    Unusable,
}

impl Constant {
    fn kind(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "utf8",
            Constant::Integer(_) => "int",
            Constant::Float(_) => "float",
            Constant::Long(_) => "long",
            Constant::Double(_) => "double",
            Constant::Class { .. } => "class",
            Constant::String { .. } => "string",
            Constant::MemberRef { .. } => "member reference",
            Constant::NameAndType { .. } => "name and type",
            Constant::MethodHandle { .. } => "method handle",
            Constant::MethodType { .. } => "method type",
            Constant::Dynamic { .. } => "dynamic constant",
            Constant::Named { .. } => "module or package",
            Constant::Unusable => "unusable slot",
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Integer(v) => write!(f, "int {}", v),
            Constant::Float(bits) => write!(f, "float {}", f32::from_bits(*bits)),
            Constant::Long(v) => write!(f, "long {}", v),
            Constant::Double(bits) => write!(f, "double {}", f64::from_bits(*bits)),
            other => f.write_str(other.kind()),
        }
    }
}

/// A resolved field reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    /// Internal name of the owner class
    pub owner: &'a str,
    /// Member name
    pub name: &'a str,
    /// Member descriptor
    pub descriptor: &'a str,
}

/// Decoded constant pool plus the entries appended during a rewrite
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    /// Serialized bytes of appended entries
    appended: Vec<u8>,
}

impl ConstantPool {
    /// Decode the pool; the reader must sit on `constant_pool_count`
    pub fn parse(reader: &mut ByteReader<'_>) -> Result<Self> {
        let count_offset = reader.position();
        let count = reader.u2()?;
        if count == 0 {
            return Err(Error::malformed(count_offset, "constant_pool_count is zero"));
        }

        let mut entries = Vec::with_capacity(count as usize);
        entries.push(Constant::Unusable);

        while entries.len() < count as usize {
            let offset = reader.position();
            let tag = reader.u1()?;
            let constant = match tag {
                tag::UTF8 => {
                    let len = reader.u2()? as usize;
                    let start = reader.position();
                    Constant::Utf8(decode_modified_utf8(reader.bytes(len)?, start)?)
                }
                tag::INTEGER => Constant::Integer(reader.i4()?),
                tag::FLOAT => Constant::Float(reader.u4()?),
                tag::LONG => Constant::Long(reader.u4_pair()? as i64),
                tag::DOUBLE => Constant::Double(reader.u4_pair()?),
                tag::CLASS => Constant::Class {
                    name_index: reader.u2()?,
                },
                tag::STRING => Constant::String {
                    string_index: reader.u2()?,
                },
                tag::FIELD_REF | tag::METHOD_REF | tag::INTERFACE_METHOD_REF => {
                    Constant::MemberRef {
                        tag,
                        class_index: reader.u2()?,
                        name_and_type_index: reader.u2()?,
                    }
                }
                tag::NAME_AND_TYPE => Constant::NameAndType {
                    name_index: reader.u2()?,
                    descriptor_index: reader.u2()?,
                },
                tag::METHOD_HANDLE => Constant::MethodHandle {
                    kind: reader.u1()?,
                    reference_index: reader.u2()?,
                },
                tag::METHOD_TYPE => Constant::MethodType {
                    descriptor_index: reader.u2()?,
                },
                tag::DYNAMIC | tag::INVOKE_DYNAMIC => Constant::Dynamic {
                    tag,
                    bootstrap_index: reader.u2()?,
                    name_and_type_index: reader.u2()?,
                },
                tag::MODULE | tag::PACKAGE => Constant::Named {
                    tag,
                    name_index: reader.u2()?,
                },
                other => {
                    return Err(Error::malformed(
                        offset,
                        format!("unknown constant pool tag {}", other),
                    ))
                }
            };

            let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
            entries.push(constant);
            if wide {
                // Long and Double take two slots
                entries.push(Constant::Unusable);
            }
        }

        if entries.len() != count as usize {
            return Err(Error::malformed(
                reader.position(),
                "long or double constant overruns constant_pool_count",
            ));
        }

        Ok(Self {
            entries,
            appended: Vec::new(),
        })
    }

    /// Current `constant_pool_count`, including appended entries
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Serialized bytes of every appended entry, in index order
    pub fn appended_bytes(&self) -> &[u8] {
        &self.appended
    }

    /// Look up an entry by index
    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(Error::malformed(
                0,
                format!("invalid constant pool index {}", index),
            )),
            Some(constant) => Ok(constant),
        }
    }

    /// Resolve a `CONSTANT_Utf8`
    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Utf8(s) => Ok(s),
            other => Err(Error::malformed(
                0,
                format!("constant {} is a {}, expected utf8", index, other.kind()),
            )),
        }
    }

    /// Resolve a `CONSTANT_Class` to its internal name
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            other => Err(Error::malformed(
                0,
                format!("constant {} is a {}, expected class", index, other.kind()),
            )),
        }
    }

    /// Resolve a `CONSTANT_String` to its value, or `None` for any other kind
    pub fn string_value(&self, index: u16) -> Result<Option<&str>> {
        match self.get(index)? {
            Constant::String { string_index } => self.utf8(*string_index).map(Some),
            _ => Ok(None),
        }
    }

    /// Resolve a field or method reference
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>> {
        let (class_index, nat_index) = match self.get(index)? {
            Constant::MemberRef {
                class_index,
                name_and_type_index,
                ..
            } => (*class_index, *name_and_type_index),
            other => {
                return Err(Error::malformed(
                    0,
                    format!("constant {} is a {}, expected member reference", index, other.kind()),
                ))
            }
        };
        let (name_index, descriptor_index) = match self.get(nat_index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => (*name_index, *descriptor_index),
            other => {
                return Err(Error::malformed(
                    0,
                    format!("constant {} is a {}, expected name and type", nat_index, other.kind()),
                ))
            }
        };
        Ok(MemberRef {
            owner: self.class_name(class_index)?,
            name: self.utf8(name_index)?,
            descriptor: self.utf8(descriptor_index)?,
        })
    }

    /// Find or append a `CONSTANT_String` with the given value.
    ///
    /// Existing entries keep their indices; new entries go at the end.
    pub fn intern_string(&mut self, value: &str) -> Result<u16> {
        if let Some(index) = self.find(|c, pool| match c {
            Constant::String { string_index } => pool.utf8(*string_index).ok() == Some(value),
            _ => false,
        }) {
            return Ok(index);
        }

        let utf8_index = match self.find(|c, _| matches!(c, Constant::Utf8(s) if s == value)) {
            Some(index) => index,
            None => {
                let encoded = encode_modified_utf8(value);
                let len = u16::try_from(encoded.len()).map_err(|_| {
                    Error::malformed(0, format!("string constant of {} bytes is too long", encoded.len()))
                })?;
                let mut bytes = vec![tag::UTF8];
                bytes.extend_from_slice(&len.to_be_bytes());
                bytes.extend_from_slice(&encoded);
                self.append(Constant::Utf8(value.to_owned()), &bytes)?
            }
        };

        let mut bytes = vec![tag::STRING];
        bytes.extend_from_slice(&utf8_index.to_be_bytes());
        self.append(
            Constant::String {
                string_index: utf8_index,
            },
            &bytes,
        )
    }

    fn find(&self, predicate: impl Fn(&Constant, &Self) -> bool) -> Option<u16> {
        self.entries
            .iter()
            .position(|c| predicate(c, self))
            .map(|i| i as u16)
    }

    fn append(&mut self, constant: Constant, bytes: &[u8]) -> Result<u16> {
        let index = u16::try_from(self.entries.len())
            .ok()
            .filter(|&i| i < u16::MAX)
            .ok_or_else(|| Error::malformed(0, "constant pool is full"))?;
        self.entries.push(constant);
        self.appended.extend_from_slice(bytes);
        Ok(index)
    }
}
