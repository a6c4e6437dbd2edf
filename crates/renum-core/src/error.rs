//! Error types for the renum-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate,
//! with detailed error variants for different failure modes.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for renum operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all renum operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Worker pool size must be a positive integer
    #[error("cannot process with a concurrency of {value}: must be at least 1")]
    InvalidConcurrency {
        /// The rejected value
        value: i64,
    },

    /// Input archive does not exist or is a directory
    #[error("cannot process non-existent input file '{path}'")]
    InputMissing {
        /// Path that was given as input
        path: PathBuf,
    },

    /// An output destination points at a directory
    #[error("cannot write to directory '{path}'")]
    OutputIsDirectory {
        /// The offending destination
        path: PathBuf,
    },

    /// Failed to create output directory
    #[error("failed to create directory '{path}': {source}")]
    DirectoryCreate {
        /// Path to the directory that failed to create
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to copy the original archive to its backup location
    #[error("failed to back up original archive to '{path}': {source}")]
    Backup {
        /// Backup destination
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The zip container could not be read or written
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Class file bytes do not follow the class file layout
    #[error("malformed class file at offset {offset}: {details}")]
    MalformedClass {
        /// Byte offset where the error occurred
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// A construction sequence loads something other than a string as its first literal
    #[error("unprepared for non-string literal {found} in {unit}")]
    NonStringLiteral {
        /// Internal name of the enum class
        unit: String,
        /// Description of the constant that was loaded
        found: String,
    },

    /// The static initializer ended halfway through a construction sequence
    #[error("static initializer of {unit} ended while {state}")]
    IncompleteConstruction {
        /// Internal name of the enum class
        unit: String,
        /// State the construction machine was left in
        state: String,
    },

    /// Number of construction sequences differs from the declared enum constants
    #[error("{unit} declares {declared} enum constants but its static initializer constructs {constructed}")]
    ConstructionCountMismatch {
        /// Internal name of the enum class
        unit: String,
        /// Number of enum constant fields
        declared: usize,
        /// Number of construction sequences seen (lower bound when too many)
        constructed: usize,
    },

    /// Instruction stream could not be relocated after an instruction grew
    #[error("cannot relocate static initializer of {unit}: {details}")]
    Relocation {
        /// Internal name of the enum class
        unit: String,
        /// Detailed description of the issue
        details: String,
    },

    /// Failure attributed to a single archive entry
    #[error("{name}: {source}")]
    Entry {
        /// Archive entry name
        name: String,
        /// What went wrong while processing it
        #[source]
        source: Box<Error>,
    },

    /// Worker thread could not be started
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// A worker panicked while running a task
    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    /// A task finished without delivering its result
    #[error("task '{origin}' was lost before delivering a result")]
    TaskLost {
        /// Task label given at submission
        origin: String,
    },

    /// A failure nobody waited on, surfaced at the end of the run
    #[error("uncaught failure in {origin}: {source}")]
    Uncaught {
        /// Task label given at submission
        origin: String,
        /// The captured failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new directory creation error
    pub fn directory_create(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreate {
            path: path.into(),
            source,
        }
    }

    /// Creates a new malformed class error
    pub fn malformed(offset: usize, details: impl Into<String>) -> Self {
        Self::MalformedClass {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new relocation error
    pub fn relocation(unit: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Relocation {
            unit: unit.into(),
            details: details.into(),
        }
    }

    /// Attaches an archive entry name to this error
    pub fn in_entry(self, name: impl Into<String>) -> Self {
        Self::Entry {
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// Returns true if this error was raised before any work was scheduled
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConcurrency { .. }
                | Self::InputMissing { .. }
                | Self::OutputIsDirectory { .. }
                | Self::DirectoryCreate { .. }
        )
    }

    /// Returns true if the input's static initializer did not have the expected shape
    pub fn is_rewrite_violation(&self) -> bool {
        match self {
            Self::NonStringLiteral { .. }
            | Self::IncompleteConstruction { .. }
            | Self::ConstructionCountMismatch { .. }
            | Self::Relocation { .. } => true,
            Self::Entry { source, .. } | Self::Uncaught { source, .. } => {
                source.is_rewrite_violation()
            }
            _ => false,
        }
    }
}
