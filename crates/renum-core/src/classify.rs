//! Enum class detection.
//!
//! A single header-only pass over a class file decides whether it is an enum
//! and, if so, which of its fields are enum constants. Method bodies are never
//! decoded here, so non-enum classes cost no more than a constant pool scan.

use crate::classfile::{access, ClassLayout, Depth, ENUM_BASE};
use crate::error::Result;
use tracing::{trace, warn};

/// An enum class and its constants in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescriptor {
    /// Internal name, e.g. `com/example/Color`
    pub internal_name: String,
    /// Names of the enum constant fields, in field table order
    pub enum_field_names: Vec<String>,
}

/// Classify raw class file bytes.
///
/// Returns `None` for anything that is not an enum with at least one
/// constant; such classes must be passed through untouched.
pub fn classify(data: &[u8]) -> Result<Option<UnitDescriptor>> {
    let layout = ClassLayout::parse(data, Depth::Fields)?;

    if layout.super_name()? != Some(ENUM_BASE) {
        return Ok(None);
    }

    let internal_name = layout.name()?.to_owned();
    let mut enum_field_names = Vec::new();
    for field in &layout.fields {
        if field.access_flags & access::ENUM_CONSTANT == access::ENUM_CONSTANT {
            enum_field_names.push(layout.pool.utf8(field.name_index)?.to_owned());
        }
    }

    if enum_field_names.is_empty() {
        warn!("{} extends {} but declares no constants", internal_name, ENUM_BASE);
        return Ok(None);
    }

    trace!(
        "{} is an enum with constants {:?}",
        internal_name,
        enum_field_names
    );

    Ok(Some(UnitDescriptor {
        internal_name,
        enum_field_names,
    }))
}
