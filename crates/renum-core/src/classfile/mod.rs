//! Compiled JVM class file decoding.
//!
//! This module implements just enough of the class file format (JVMS §4) to
//! classify enum classes and splice a rewritten static initializer back in.
//!
//! ## Layout Overview
//!
//! A class file is laid out as:
//! - magic, minor and major version
//! - constant pool (1-based, Long and Double take two slots)
//! - access flags, this class, super class, interfaces
//! - fields, methods, each with their own attributes
//! - class attributes
//!
//! Decoding is offset-based: [`ClassLayout`] remembers where things are
//! instead of copying them, so untouched regions can be emitted verbatim.

mod layout;
pub mod opcode;
mod pool;
mod reader;

pub use layout::{
    access, read_attributes, AttributeSpan, ClassLayout, CodeAttribute, Depth, ExceptionEntry,
    MemberInfo, MAGIC,
};
pub use pool::{tag, Constant, ConstantPool, MemberRef};
pub use reader::{decode_modified_utf8, encode_modified_utf8, ByteReader};

/// Internal name of the common superclass of every enum
pub const ENUM_BASE: &str = "java/lang/Enum";

/// Name of the static initializer method
pub const STATIC_INITIALIZER: &str = "<clinit>";

/// Descriptor of the static initializer method
pub const STATIC_INITIALIZER_DESCRIPTOR: &str = "()V";

/// Field descriptor of an object of the given internal name
pub fn object_descriptor(internal_name: &str) -> String {
    format!("L{};", internal_name)
}
