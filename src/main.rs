mod compare;
mod config;
mod env;
mod invocation;
mod loader;
mod normalize;
mod process;
mod report;
mod schema;
mod suite;

use clap::{Args, Parser, Subcommand};
use config::{ConfigError, HarnessConfig, Overrides};
use loader::LoadError;
use report::OutputFormat;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "uro-blackbox")]
#[command(about = "A black-box conformance runner for the uro interpreter")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,

    /// Show passing cases and debug logs
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Case file (.yaml, .yml or .toml); the built-in suite when omitted
    cases: Option<PathBuf>,
    /// Interpreter executable
    #[arg(short, long)]
    interpreter: Option<PathBuf>,
    /// Fixture directory passed to the interpreter with -d
    #[arg(short = 'd', long)]
    fixture_dir: Option<PathBuf>,
    /// Per-case timeout in seconds
    #[arg(short, long)]
    timeout: Option<f64>,
    /// Number of cases to run concurrently
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Deadline for the whole run in seconds
    #[arg(long)]
    deadline: Option<f64>,
    /// Only run cases whose name or snippet matches this regex
    #[arg(short, long)]
    filter: Option<String>,
    /// Output format
    #[arg(short, long, default_value = "human")]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Command {
    /// Check a case file without running it
    Validate {
        /// Path to the case file
        path: PathBuf,
    },
    /// Print the cases that would run
    List {
        /// Path to the case file; the built-in suite when omitted
        path: Option<PathBuf>,
    },
    /// Scaffold a case file containing the built-in suite
    Init {
        /// Output path for the new case file
        #[arg(default_value = "blackbox.yaml")]
        path: PathBuf,
    },
    /// Output the case-file JSON schema
    Schema,
}

#[derive(Debug, Error)]
enum HarnessError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid filter: {0}")]
    Filter(#[from] regex::Error),
    #[error("file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        None => run(cli.run, cli.verbose),
        Some(Command::Validate { path }) => validate(path),
        Some(Command::List { path }) => list(path),
        Some(Command::Init { path }) => init(path),
        Some(Command::Schema) => schema(),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(report::EXIT_HARNESS_FAULT);
        }
    }
}

/// Logs go to stderr so stdout only carries the report.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .try_init();
}

fn run(args: RunArgs, verbose: bool) -> Result<i32, HarnessError> {
    let loaded = loader::load_suite(args.cases.as_deref())?;
    let overrides = Overrides {
        interpreter: args.interpreter,
        fixture_dir: args.fixture_dir,
        timeout: args.timeout,
        jobs: args.jobs,
        deadline: args.deadline,
    };
    let config =
        HarnessConfig::resolve(&loaded.file.defaults, loaded.base_dir.as_deref(), &overrides)?;
    let resolved = config.validate()?;
    debug!(
        interpreter = %resolved.display(),
        fixture_dir = %config.fixture_dir.display(),
        "configuration ready"
    );

    let filter = args.filter.as_deref().map(regex::Regex::new).transpose()?;

    install_interrupt_handler();
    let outcome = suite::run(&loaded.file.cases, &config, filter.as_ref());
    report::render(&outcome, args.output, verbose, &mut io::stdout().lock())?;
    Ok(report::exit_code(&outcome))
}

/// Interpreters run in their own process groups and never see a terminal
/// Ctrl-C, so SIGINT, SIGTERM and SIGHUP kill them here before exiting.
fn install_interrupt_handler() {
    let handler = || {
        process::terminate_all();
        eprintln!("error: interrupted");
        std::process::exit(report::EXIT_HARNESS_FAULT);
    };
    if let Err(e) = ctrlc::set_handler(handler) {
        warn!("failed to install interrupt handler: {e}");
    }
}

fn validate(path: PathBuf) -> Result<i32, HarnessError> {
    let file = loader::load_case_file(&path)?;
    println!("✓ {} ({} cases)", path.display(), file.cases.len());
    Ok(report::EXIT_PASSED)
}

fn list(path: Option<PathBuf>) -> Result<i32, HarnessError> {
    let loaded = loader::load_suite(path.as_deref())?;
    for (index, case) in loaded.file.cases.iter().enumerate() {
        match &case.name {
            Some(name) => println!("#{index} {name}: {:?}", case.source_code),
            None => println!("#{index} {:?}", case.source_code),
        }
    }
    Ok(report::EXIT_PASSED)
}

fn init(path: PathBuf) -> Result<i32, HarnessError> {
    if path.exists() {
        return Err(HarnessError::AlreadyExists(path));
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, loader::to_yaml(&loader::builtin_suite())?)?;
    println!("Created: {}", path.display());
    Ok(report::EXIT_PASSED)
}

fn schema() -> Result<i32, HarnessError> {
    let root = schema::generate_schema();
    serde_json::to_writer_pretty(io::stdout().lock(), &root).map_err(io::Error::from)?;
    println!();
    Ok(report::EXIT_PASSED)
}
