//! # renum-core
//!
//! A library for re-synchronizing enum constant names inside compiled JVM
//! class archives.
//!
//! Each enum constant is created in its class's static initializer by a
//! `new` / `ldc "NAME"` / `invokespecial <init>` / `putstatic NAME` sequence.
//! When an archive has been edited outside the compiler, the string literal
//! can drift away from the field it is stored into. This crate:
//! - Detects enum classes and lists their constant fields
//! - Rewrites the static initializer so every literal matches its field
//! - Does so for a whole zip/jar, in parallel, preserving entry order
//!
//! ## Architecture
//!
//! - [`classfile`]: Class file decoding (constant pool, members, bytecode)
//! - [`classify`]: Enum detection
//! - [`rewrite`]: Static initializer rewriting and code relocation
//! - [`scheduler`]: Worker pool with per-task result handles
//! - [`archive`]: Zip input and ordered output
//! - [`pipeline`]: Configuration and whole-archive orchestration
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use renum_core::{RenumConfig, Renumerator};
//!
//! let config = RenumConfig::new("app.jar")
//!     .output("app-fixed.jar")
//!     .original("app.orig.jar")
//!     .concurrency(4);
//!
//! let report = Renumerator::from_config(&config)?.run()?;
//! println!("{} enum constants renamed", report.substitutions);
//! # Ok::<(), renum_core::Error>(())
//! ```
//!
//! Single classes can be handled without an archive:
//!
//! ```no_run
//! use renum_core::{classify, rewrite_unit};
//!
//! let data = std::fs::read("Color.class")?;
//! if let Some(unit) = classify(&data)? {
//!     let fixed = rewrite_unit(&data, &unit)?;
//!     std::fs::write("Color.class", &fixed.bytes)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod archive;
pub mod classfile;
pub mod classify;
pub mod error;
pub mod pipeline;
pub mod rewrite;
pub mod scheduler;

#[cfg(test)]
mod fixtures;

// Re-export primary types for convenience
pub use archive::{reassemble, ArchiveSource, EntryContent, EntryMeta};
pub use classify::{classify, UnitDescriptor};
pub use error::{Error, Result};
pub use pipeline::{RenumConfig, Renumerator, ResolvedConfig, RunReport, DEFAULT_CONCURRENCY};
pub use rewrite::{rewrite_unit, RewrittenUnit};
pub use scheduler::{PendingFailure, Task, WorkerPool};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
