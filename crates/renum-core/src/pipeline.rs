//! Whole-archive orchestration.
//!
//! [`RenumConfig`] collects the user's choices and validates them into a
//! [`ResolvedConfig`]; [`Renumerator::run`] then drives one archive through
//! the worker pool:
//!
//! 1. queue the backup copy, if one was requested
//! 2. queue one read per entry
//! 3. for each class entry, wait its read and queue classify + rewrite
//! 4. wait the remaining reads, then release the input archive
//! 5. wait the backup and every rewrite, in enumeration order
//! 6. shut the pool down and escalate any unobserved failure
//! 7. write the output archive
//!
//! Nothing is written to the output path unless every step before it
//! succeeded.

use crate::archive::{reassemble, ArchiveSource, EntryContent, EntryMeta};
use crate::classify::classify;
use crate::error::{Error, Result};
use crate::rewrite::rewrite_unit;
use crate::scheduler::{Task, WorkerPool};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Worker count used when none is given
pub const DEFAULT_CONCURRENCY: i64 = 3;

/// Unvalidated run configuration
#[derive(Debug, Clone)]
pub struct RenumConfig {
    /// Archive to read
    pub input: PathBuf,
    /// Where to write the result; the input is overwritten when unset
    pub output: Option<PathBuf>,
    /// Where to keep an untouched copy of the input
    pub original: Option<PathBuf>,
    /// Number of worker threads, must be positive
    pub concurrency: i64,
}

impl RenumConfig {
    /// Creates a config for `input` with default settings
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            original: None,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Sets the output archive path
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Sets the backup copy path
    pub fn original(mut self, path: impl Into<PathBuf>) -> Self {
        self.original = Some(path.into());
        self
    }

    /// Sets the worker count
    pub fn concurrency(mut self, workers: i64) -> Self {
        self.concurrency = workers;
        self
    }

    /// Check the configuration and fill in defaults.
    ///
    /// Missing parent directories of the output and backup paths are
    /// created here.
    pub fn validate(&self) -> Result<ResolvedConfig> {
        let concurrency = usize::try_from(self.concurrency)
            .ok()
            .filter(|&n| n > 0)
            .ok_or(Error::InvalidConcurrency {
                value: self.concurrency,
            })?;

        if !self.input.exists() || self.input.is_dir() {
            return Err(Error::InputMissing {
                path: self.input.clone(),
            });
        }

        if let Some(output) = &self.output {
            verify_out(output)?;
        }
        if let Some(original) = &self.original {
            verify_out(original)?;
        }

        Ok(ResolvedConfig {
            input: self.input.clone(),
            output: self.output.clone().unwrap_or_else(|| self.input.clone()),
            original: self.original.clone(),
            concurrency,
        })
    }
}

fn verify_out(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Err(Error::OutputIsDirectory {
            path: path.to_path_buf(),
        });
    }
    // A bare file name has an empty parent: the working directory
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            debug!("Creating directory {}", parent.display());
            fs::create_dir_all(parent).map_err(|e| Error::directory_create(parent, e))?;
        }
    }
    Ok(())
}

/// Validated configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Archive to read
    pub input: PathBuf,
    /// Archive to write, possibly the input itself
    pub output: PathBuf,
    /// Backup copy destination
    pub original: Option<PathBuf>,
    /// Number of worker threads
    pub concurrency: usize,
}

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Entries in the archive, directories included
    pub entries: usize,
    /// Class file entries
    pub classes: usize,
    /// Enum classes with at least one constant
    pub enums: usize,
    /// Enum classes whose bytes changed
    pub rewritten: usize,
    /// Name literals that were replaced
    pub substitutions: usize,
    /// Path the archive was written to
    pub output: PathBuf,
}

/// Outcome of processing one class entry
#[derive(Debug)]
struct Processed {
    content: EntryContent,
    /// `(constants, changed literals)` for enum classes
    enumeration: Option<(usize, usize)>,
}

/// Fixes enum constant name literals across a whole archive
#[derive(Debug, Clone)]
pub struct Renumerator {
    config: ResolvedConfig,
}

/// An entry between being queued and being written
enum Slot {
    Read(Task<Vec<u8>>),
    Unit(Task<Processed>),
}

/// An entry whose read has completed
enum Resolved {
    Ready(EntryContent),
    Unit(Task<Processed>),
}

impl Renumerator {
    /// Creates a renumerator from a validated configuration
    pub fn new(config: ResolvedConfig) -> Self {
        Self { config }
    }

    /// Validates `config` and creates a renumerator from it
    pub fn from_config(config: &RenumConfig) -> Result<Self> {
        config.validate().map(Self::new)
    }

    /// Process the input archive and write the output archive
    pub fn run(&self) -> Result<RunReport> {
        let config = &self.config;
        info!(
            "Renumerating {} with {} workers",
            config.input.display(),
            config.concurrency
        );
        let pool = WorkerPool::new(config.concurrency)?;

        let backup = config.original.clone().map(|original| {
            let input = config.input.clone();
            pool.submit("backup", move || copy_original(&input, &original))
        });

        let source = Arc::new(ArchiveSource::open(&config.input)?);
        let entries: Vec<EntryMeta> = source.entries().to_vec();

        let reads: Vec<Task<Vec<u8>>> = entries
            .iter()
            .map(|meta| {
                let source = Arc::clone(&source);
                let index = meta.index;
                pool.submit(meta.name.clone(), move || source.read(index))
            })
            .collect();

        let mut slots = Vec::with_capacity(entries.len());
        for (meta, read) in entries.iter().zip(reads) {
            if !meta.is_unit() {
                slots.push(Slot::Read(read));
                continue;
            }
            let data = read.wait().map_err(|e| e.in_entry(&meta.name))?;
            let name = meta.name.clone();
            slots.push(Slot::Unit(pool.submit(meta.name.clone(), move || {
                process_unit(data).map_err(|e| e.in_entry(name))
            })));
        }

        // Every read has finished once the non-class reads are collected
        let slots = entries
            .iter()
            .zip(slots)
            .map(|(meta, slot)| match slot {
                Slot::Read(read) => read
                    .wait()
                    .map(|data| Resolved::Ready(EntryContent::Original(data)))
                    .map_err(|e| e.in_entry(&meta.name)),
                Slot::Unit(task) => Ok(Resolved::Unit(task)),
            })
            .collect::<Result<Vec<_>>>()?;
        drop(source);

        if let Some(backup) = backup {
            backup.wait()?;
        }

        let mut report = RunReport {
            entries: entries.len(),
            classes: 0,
            enums: 0,
            rewritten: 0,
            substitutions: 0,
            output: config.output.clone(),
        };
        let mut finished = Vec::with_capacity(entries.len());
        for (meta, slot) in entries.into_iter().zip(slots) {
            let content = match slot {
                Resolved::Ready(content) => content,
                Resolved::Unit(task) => {
                    let processed = task.wait()?;
                    report.classes += 1;
                    if let Some((constants, changed)) = processed.enumeration {
                        report.enums += 1;
                        report.substitutions += changed;
                        if changed > 0 {
                            report.rewritten += 1;
                        }
                        debug!("{}: {} constants, {} renamed", meta.name, constants, changed);
                    }
                    processed.content
                }
            };
            finished.push((meta, content));
        }

        pool.shutdown()?;

        reassemble(&config.output, &finished)?;
        info!(
            "Wrote {}: {} entries, {} classes, {} enums, {} rewritten, {} literals replaced",
            report.output.display(),
            report.entries,
            report.classes,
            report.enums,
            report.rewritten,
            report.substitutions
        );
        Ok(report)
    }
}

/// Decide whether `data` is an enum and rewrite it if so
fn process_unit(data: Vec<u8>) -> Result<Processed> {
    let Some(unit) = classify(&data)? else {
        return Ok(Processed {
            content: EntryContent::Original(data),
            enumeration: None,
        });
    };

    let rewritten = rewrite_unit(&data, &unit)?;
    let enumeration = Some((rewritten.substitutions, rewritten.changed));
    let content = if rewritten.changed == 0 {
        EntryContent::Original(data)
    } else {
        EntryContent::Rewritten {
            bytes: rewritten.bytes,
            size: rewritten.size,
        }
    };
    Ok(Processed {
        content,
        enumeration,
    })
}

/// Copy the input archive to `original`, replacing whatever is there
fn copy_original(input: &Path, original: &Path) -> Result<()> {
    if same_file(input, original) {
        warn!(
            "Backup destination {} is the input itself, skipping copy",
            original.display()
        );
        return Ok(());
    }
    if original.exists() {
        fs::remove_file(original).map_err(|e| Error::Backup {
            path: original.to_path_buf(),
            source: e,
        })?;
    }
    let copied = fs::copy(input, original).map_err(|e| Error::Backup {
        path: original.to_path_buf(),
        source: e,
    })?;
    debug!("Backed up {} bytes to {}", copied, original.display());
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{construction_literals, enum_class, read_zip, write_zip, ClassBuilder};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const README: &[u8] = b"Colors of the rainbow, abridged.\n";

    fn color_jar(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("colors.jar");
        let color = enum_class(
            "com/example/Color",
            &[("RED", "R"), ("GREEN", "G"), ("BLUE", "B")],
        );
        write_zip(
            &path,
            &[
                ("com/", b""),
                ("com/example/", b""),
                ("com/example/Color.class", &color),
                ("Readme.txt", README),
            ],
        );
        path
    }

    fn run(config: RenumConfig) -> Result<RunReport> {
        Renumerator::from_config(&config)?.run()
    }

    #[test]
    fn test_color_archive_end_to_end() {
        let dir = TempDir::new().unwrap();
        let input = color_jar(&dir);
        let output = dir.path().join("out").join("colors.jar");

        let report = run(RenumConfig::new(&input).output(&output)).unwrap();
        assert_eq!(
            report,
            RunReport {
                entries: 4,
                classes: 1,
                enums: 1,
                rewritten: 1,
                substitutions: 3,
                output: output.clone(),
            }
        );

        let entries = read_zip(&output);
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["com/", "com/example/", "com/example/Color.class", "Readme.txt"]
        );
        assert_eq!(
            construction_literals(&entries[2].1),
            vec!["RED", "GREEN", "BLUE"]
        );
        assert_eq!(entries[3].1, README.to_vec());
    }

    #[test]
    fn test_non_enum_entries_pass_through() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("mixed.jar");
        let plain = ClassBuilder::new("com/example/Plain", "java/lang/Object").to_bytes();
        let mut empty = ClassBuilder::new("com/example/Empty", "java/lang/Enum");
        empty.field(0x101A, "$VALUES", "[Lcom/example/Empty;");
        let empty = empty.to_bytes();
        let correct = enum_class("com/example/Mode", &[("ON", "ON"), ("OFF", "OFF")]);
        write_zip(
            &input,
            &[
                ("com/example/Plain.class", &plain),
                ("com/example/Empty.class", &empty),
                ("com/example/Mode.class", &correct),
                ("data.bin", &[0, 1, 2, 3, 255]),
            ],
        );

        let output = dir.path().join("out.jar");
        let report = run(RenumConfig::new(&input).output(&output)).unwrap();
        assert_eq!(report.classes, 3);
        assert_eq!(report.enums, 1);
        assert_eq!(report.rewritten, 0);
        assert_eq!(report.substitutions, 0);

        assert_eq!(read_zip(&output), read_zip(&input));
    }

    #[test]
    fn test_output_order_matches_input_with_many_workers() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("many.jar");
        let classes: Vec<(String, Vec<u8>)> = (0..40)
            .map(|i| {
                let name = format!("com/example/E{}", i);
                let bytes = if i % 3 == 0 {
                    enum_class(&name, &[("A", "x"), ("B", "y")])
                } else {
                    ClassBuilder::new(&name, "java/lang/Object").to_bytes()
                };
                (format!("{}.class", name), bytes)
            })
            .collect();
        let fillers: Vec<String> = (0..8).map(|i| format!("filler{}.txt", i)).collect();
        let mut entries: Vec<(&str, &[u8])> = Vec::new();
        for (i, (name, bytes)) in classes.iter().enumerate() {
            entries.push((name.as_str(), bytes.as_slice()));
            if i % 5 == 0 {
                entries.push((fillers[i / 5].as_str(), b"filler"));
            }
        }
        write_zip(&input, &entries);

        let output = dir.path().join("out.jar");
        let report = run(RenumConfig::new(&input).output(&output).concurrency(8)).unwrap();
        assert_eq!(report.entries, entries.len());
        assert_eq!(report.enums, 14);
        assert_eq!(report.substitutions, 28);

        let written = read_zip(&output);
        let names: Vec<&str> = written.iter().map(|(n, _)| n.as_str()).collect();
        let expected: Vec<&str> = entries.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, expected);
        for (name, bytes) in &written {
            if name.ends_with("E0.class") {
                assert_eq!(construction_literals(bytes), vec!["A", "B"]);
            }
        }
    }

    #[test]
    fn test_concurrency_checked_before_anything_else() {
        for workers in [0, -1] {
            // The input does not exist; concurrency is still reported first
            let err = RenumConfig::new("/nonexistent/input.jar")
                .concurrency(workers)
                .validate()
                .unwrap_err();
            match err {
                Error::InvalidConcurrency { value } => assert_eq!(value, workers),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_missing_or_directory_input() {
        let dir = TempDir::new().unwrap();
        let missing = RenumConfig::new(dir.path().join("absent.jar"))
            .validate()
            .unwrap_err();
        assert!(matches!(missing, Error::InputMissing { .. }));

        let directory = RenumConfig::new(dir.path()).validate().unwrap_err();
        assert!(matches!(directory, Error::InputMissing { .. }));
        assert!(directory.is_configuration());
    }

    #[test]
    fn test_output_directory_rejected() {
        let dir = TempDir::new().unwrap();
        let input = color_jar(&dir);
        let err = RenumConfig::new(&input)
            .output(dir.path())
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::OutputIsDirectory { .. }));

        let err = RenumConfig::new(&input)
            .original(dir.path())
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::OutputIsDirectory { .. }));
    }

    #[test]
    fn test_validate_defaults_and_creates_parents() {
        let dir = TempDir::new().unwrap();
        let input = color_jar(&dir);
        let resolved = RenumConfig::new(&input).validate().unwrap();
        assert_eq!(
            resolved,
            ResolvedConfig {
                input: input.clone(),
                output: input.clone(),
                original: None,
                concurrency: 3,
            }
        );

        let backup = dir.path().join("a").join("b").join("orig.jar");
        let resolved = RenumConfig::new(&input).original(&backup).validate().unwrap();
        assert_eq!(resolved.original, Some(backup.clone()));
        assert!(backup.parent().unwrap().is_dir());
    }

    #[test]
    fn test_in_place_with_backup() {
        let dir = TempDir::new().unwrap();
        let input = color_jar(&dir);
        let pristine = fs::read(&input).unwrap();
        let backup = dir.path().join("colors.orig.jar");
        fs::write(&backup, b"stale backup").unwrap();

        let report = run(RenumConfig::new(&input).original(&backup)).unwrap();
        assert_eq!(report.output, input);

        assert_eq!(fs::read(&backup).unwrap(), pristine);
        let entries = read_zip(&input);
        assert_eq!(
            construction_literals(&entries[2].1),
            vec!["RED", "GREEN", "BLUE"]
        );
    }

    #[test]
    fn test_backup_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let input = color_jar(&dir);
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"a file, not a directory").unwrap();
        let output = dir.path().join("out.jar");

        // Skips validation, which would create the backup's parent
        let renumerator = Renumerator::new(ResolvedConfig {
            input,
            output: output.clone(),
            original: Some(blocker.join("orig.jar")),
            concurrency: 2,
        });
        match renumerator.run().unwrap_err() {
            Error::Backup { path, .. } => assert_eq!(path, blocker.join("orig.jar")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!output.exists());
    }

    #[test]
    fn test_rerun_is_stable() {
        let dir = TempDir::new().unwrap();
        let input = color_jar(&dir);
        let first = dir.path().join("first.jar");
        let second = dir.path().join("second.jar");

        run(RenumConfig::new(&input).output(&first)).unwrap();
        let report = run(RenumConfig::new(&first).output(&second)).unwrap();
        assert_eq!(report.rewritten, 0);
        assert_eq!(read_zip(&second), read_zip(&first));
    }

    #[test]
    fn test_rewrite_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("broken.jar");
        // Two declared constants, one constructed
        let mut broken = ClassBuilder::new("com/example/Broken", "java/lang/Enum");
        broken.field(0x4019, "ONE", "Lcom/example/Broken;");
        let broken = broken.to_bytes();
        let good = enum_class("com/example/Color", &[("RED", "R")]);
        write_zip(
            &input,
            &[
                ("com/example/Color.class", &good),
                ("com/example/Broken.class", &broken),
            ],
        );

        let output = dir.path().join("out.jar");
        let err = run(RenumConfig::new(&input).output(&output)).unwrap_err();
        assert!(err.is_rewrite_violation());
        assert!(err.to_string().starts_with("com/example/Broken.class"));
        assert!(!output.exists());
    }

    #[test]
    fn test_malformed_class_is_fatal() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("junk.jar");
        write_zip(&input, &[("Junk.class", b"not a class file")]);
        let output = dir.path().join("out.jar");
        let err = run(RenumConfig::new(&input).output(&output)).unwrap_err();
        match err {
            Error::Entry { name, source } => {
                assert_eq!(name, "Junk.class");
                assert!(matches!(*source, Error::MalformedClass { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!output.exists());
    }
}
