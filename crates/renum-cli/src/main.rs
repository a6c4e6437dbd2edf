//! renum - Re-synchronize enum constant name literals inside jar archives
//!
//! This tool rewrites the static initializers of enum classes in a zip/jar so
//! that the name each constant is constructed with matches its field name.

use anyhow::{Context, Result};
use clap::Parser;
use renum_core::{RenumConfig, Renumerator, RunReport, DEFAULT_CONCURRENCY};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

/// Re-synchronize enum constant name literals inside jar archives
#[derive(Parser, Debug)]
#[command(name = "renum")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Archive to process
    #[arg(env = "RENUM_INPUT")]
    input: PathBuf,

    /// Where to write the processed archive (defaults to overwriting the input)
    #[arg(short, long, env = "RENUM_OUTPUT")]
    output: Option<PathBuf>,

    /// Keep an untouched copy of the input at this path
    #[arg(long, env = "RENUM_ORIGINAL")]
    original: Option<PathBuf>,

    /// Number of worker threads
    #[arg(
        short = 'j',
        long,
        env = "RENUM_CONCURRENCY",
        default_value_t = DEFAULT_CONCURRENCY,
        allow_negative_numbers = true
    )]
    concurrency: i64,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> RenumConfig {
        let mut config = RenumConfig::new(&self.input).concurrency(self.concurrency);
        if let Some(output) = &self.output {
            config = config.output(output);
        }
        if let Some(original) = &self.original {
            config = config.original(original);
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let report = run(&cli)?;
    println!("{}", summary(&report));
    Ok(())
}

/// Validate the command line and process the archive
fn run(cli: &Cli) -> Result<RunReport> {
    let config = cli.config();
    debug!("Configuration: {:?}", config);

    let renumerator = Renumerator::from_config(&config).context("Invalid configuration")?;
    renumerator
        .run()
        .with_context(|| format!("Failed to process {}", cli.input.display()))
}

fn summary(report: &RunReport) -> String {
    format!(
        "{}: {} entries, {} classes, {} enums, {} rewritten ({} constants renamed)",
        report.output.display(),
        report.entries,
        report.classes,
        report.enums,
        report.rewritten,
        report.substitutions
    )
}
