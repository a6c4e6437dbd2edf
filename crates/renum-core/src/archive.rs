//! Zip/jar input and output.
//!
//! [`ArchiveSource`] lists and reads entries of the input archive; reads are
//! serialized behind a mutex so any number of worker tasks can share one
//! handle. [`reassemble`] writes the finished entries back out in the order
//! they were enumerated.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// File name suffix of compiled class entries
pub const UNIT_SUFFIX: &str = ".class";

/// Most bytes reserved up front for an entry, whatever size it declares
const READ_RESERVE_LIMIT: u64 = 1 << 20;

/// Everything about an entry needed to reproduce it, minus its content
#[derive(Debug, Clone)]
pub struct EntryMeta {
    /// Position in the source archive
    pub index: usize,
    /// Full entry name, including any directory prefix
    pub name: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Compression method in the source archive
    pub compression: CompressionMethod,
    /// Modification time as stored in the archive
    pub last_modified: DateTime,
    /// Unix permission bits, if the archive recorded them
    pub unix_mode: Option<u32>,
    /// Uncompressed size
    pub size: u64,
}

impl EntryMeta {
    /// Whether this entry is a compiled class file
    pub fn is_unit(&self) -> bool {
        !self.is_dir && self.name.ends_with(UNIT_SUFFIX)
    }

    fn options(&self, size: u64) -> FileOptions {
        let method = match self.compression {
            CompressionMethod::Stored => CompressionMethod::Stored,
            _ => CompressionMethod::Deflated,
        };
        let mut options = FileOptions::default()
            .compression_method(method)
            .last_modified_time(self.last_modified)
            .large_file(size >= u32::MAX as u64);
        if let Some(mode) = self.unix_mode {
            options = options.unix_permissions(mode);
        }
        options
    }
}

/// Content to write for one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryContent {
    /// Bytes exactly as read from the source
    Original(Vec<u8>),
    /// A rewritten class
    Rewritten {
        /// New class bytes
        bytes: Vec<u8>,
        /// Length of `bytes`
        size: u64,
    },
}

impl EntryContent {
    /// Bytes to write
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Original(bytes) | Self::Rewritten { bytes, .. } => bytes,
        }
    }

    fn size(&self) -> u64 {
        match self {
            Self::Original(bytes) => bytes.len() as u64,
            Self::Rewritten { size, .. } => *size,
        }
    }
}

/// Shared read handle on the input archive
#[derive(Debug)]
pub struct ArchiveSource {
    archive: Mutex<ZipArchive<File>>,
    entries: Vec<EntryMeta>,
}

impl ArchiveSource {
    /// Open `path` and enumerate its entries
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
        let mut archive = ZipArchive::new(file)?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index)?;
            entries.push(EntryMeta {
                index,
                name: entry.name().to_owned(),
                is_dir: entry.is_dir(),
                compression: entry.compression(),
                last_modified: entry.last_modified(),
                unix_mode: entry.unix_mode(),
                size: entry.size(),
            });
        }
        debug!("Opened {} with {} entries", path.display(), entries.len());

        Ok(Self {
            archive: Mutex::new(archive),
            entries,
        })
    }

    /// Entries in enumeration order
    pub fn entries(&self) -> &[EntryMeta] {
        &self.entries
    }

    /// Read the full content of entry `index`
    pub fn read(&self, index: usize) -> Result<Vec<u8>> {
        let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entry = archive.by_index(index)?;
        let mut data = Vec::with_capacity(entry.size().min(READ_RESERVE_LIMIT) as usize);
        entry.read_to_end(&mut data).map_err(ZipError::Io)?;
        trace!("Read {} ({} bytes)", entry.name(), data.len());
        Ok(data)
    }
}

/// Write `entries` to a new archive at `path`, in the given order
pub fn reassemble(path: impl AsRef<Path>, entries: &[(EntryMeta, EntryContent)]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| Error::file_write(path, e))?;
    let mut writer = ZipWriter::new(file);

    for (meta, content) in entries {
        if meta.is_dir {
            writer.add_directory(meta.name.as_str(), meta.options(0))?;
            continue;
        }
        writer.start_file(meta.name.as_str(), meta.options(content.size()))?;
        writer
            .write_all(content.bytes())
            .map_err(|e| Error::file_write(path, e))?;
    }

    writer.finish()?;
    debug!("Wrote {} entries to {}", entries.len(), path.display());
    Ok(())
}
