//! Harness configuration.
//!
//! Values are layered: command-line flags over case-file defaults over the
//! built-in defaults below.

use crate::env::{InterpolationError, interpolate_env};
use crate::schema::Defaults;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_INTERPRETER: &str = "uro";
pub const DEFAULT_FIXTURE_DIR: &str = "res";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_JOBS: usize = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("interpreter not found: {}", .0.display())]
    InterpreterNotFound(PathBuf),
    #[error("fixture directory does not exist: {}", .0.display())]
    FixtureDirMissing(PathBuf),
    #[error("invalid {field}: {value} (expected a positive number of seconds)")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("jobs must be at least 1")]
    ZeroJobs,
    #[error(transparent)]
    Interpolation(#[from] InterpolationError),
}

/// Settings given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub interpreter: Option<PathBuf>,
    pub fixture_dir: Option<PathBuf>,
    pub timeout: Option<f64>,
    pub jobs: Option<usize>,
    pub deadline: Option<f64>,
}

/// Everything a run needs to know about the interpreter under test.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Executable, as a path or a bare name looked up on `PATH`.
    pub interpreter: PathBuf,
    /// Read-only fixture directory passed with `-d`.
    pub fixture_dir: PathBuf,
    /// Default per-case timeout.
    pub timeout: Duration,
    /// Upper bound on concurrently running cases.
    pub jobs: usize,
    /// Deadline for the whole run.
    pub deadline: Option<Duration>,
    /// Extra interpreter arguments, inserted before `-c`.
    pub extra_args: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            fixture_dir: PathBuf::from(DEFAULT_FIXTURE_DIR),
            timeout: DEFAULT_TIMEOUT,
            jobs: DEFAULT_JOBS,
            deadline: None,
            extra_args: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Layer `overrides` over the case-file `defaults`.
    ///
    /// Relative paths from the case file are resolved against `base_dir`
    /// (the file's directory). Command-line paths are taken as given.
    pub fn resolve(
        defaults: &Defaults,
        base_dir: Option<&Path>,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let builtin = Self::default();
        let from_file = |value: &str| -> Result<PathBuf, ConfigError> {
            let path = PathBuf::from(interpolate_env(value)?);
            Ok(match base_dir {
                Some(base) if path.is_relative() && has_separator(&path) => base.join(path),
                _ => path,
            })
        };

        let interpreter = match (&overrides.interpreter, &defaults.interpreter) {
            (Some(cli), _) => cli.clone(),
            (None, Some(file)) => from_file(file)?,
            (None, None) => builtin.interpreter,
        };

        let fixture_dir = match (&overrides.fixture_dir, &defaults.fixture_dir) {
            (Some(cli), _) => cli.clone(),
            (None, Some(file)) => {
                let dir = PathBuf::from(interpolate_env(file)?);
                match base_dir {
                    Some(base) if dir.is_relative() => base.join(dir),
                    _ => dir,
                }
            }
            (None, None) => builtin.fixture_dir,
        };

        let timeout = match overrides.timeout.or(defaults.timeout) {
            Some(secs) => seconds("timeout", secs)?,
            None => builtin.timeout,
        };

        let deadline = overrides
            .deadline
            .or(defaults.deadline)
            .map(|secs| seconds("deadline", secs))
            .transpose()?;

        let jobs = overrides.jobs.or(defaults.jobs).unwrap_or(builtin.jobs);

        let extra_args = defaults
            .args
            .iter()
            .map(|a| interpolate_env(a))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            interpreter,
            fixture_dir,
            timeout,
            jobs,
            deadline,
            extra_args,
        })
    }

    /// Check the configuration against the filesystem before any case runs.
    ///
    /// Returns the resolved interpreter location.
    pub fn validate(&self) -> Result<PathBuf, ConfigError> {
        if self.jobs == 0 {
            return Err(ConfigError::ZeroJobs);
        }
        if !self.fixture_dir.is_dir() {
            return Err(ConfigError::FixtureDirMissing(self.fixture_dir.clone()));
        }
        find_executable(&self.interpreter)
            .ok_or_else(|| ConfigError::InterpreterNotFound(self.interpreter.clone()))
    }
}

/// Convert a seconds value from a flag or case file into a `Duration`.
pub fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if value > 0.0
        && let Ok(d) = Duration::try_from_secs_f64(value)
    {
        return Ok(d);
    }
    Err(ConfigError::InvalidDuration { field, value })
}

fn has_separator(path: &Path) -> bool {
    path.components().count() > 1
}

/// Locate `program` the way the OS would when spawning it.
///
/// Paths with more than one component are checked directly; bare names are
/// searched on `PATH`.
pub fn find_executable(program: &Path) -> Option<PathBuf> {
    if program.is_absolute() || has_separator(program) {
        return is_executable(program).then(|| program.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}
