//! Interpreter invocation builder.
//!
//! Turns a snippet into the argument vector `<interpreter> -d <fixture_dir> -c
//! <snippet>`. The snippet always travels as one argument and no shell is
//! involved, so quotes and metacharacters reach the interpreter untouched.

use crate::config::HarnessConfig;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::process::Command;
use thiserror::Error;

/// Flag selecting the interpreter's working/resource directory.
pub const FIXTURE_DIR_FLAG: &str = "-d";
/// Flag selecting inline-code mode.
pub const INLINE_CODE_FLAG: &str = "-c";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvocationError {
    #[error("snippet is empty")]
    EmptySnippet,
}

/// A fully built interpreter command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
}

impl Invocation {
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the invocation that runs `source_code` under `config`.
    pub fn build(config: &HarnessConfig, source_code: &str) -> Result<Self, InvocationError> {
        if source_code.trim().is_empty() {
            return Err(InvocationError::EmptySnippet);
        }

        let mut args: Vec<OsString> = Vec::with_capacity(4 + config.extra_args.len());
        args.push(FIXTURE_DIR_FLAG.into());
        args.push(config.fixture_dir.clone().into_os_string());
        args.extend(config.extra_args.iter().map(OsString::from));
        args.push(INLINE_CODE_FLAG.into());
        args.push(source_code.into());

        Ok(Self::new(config.interpreter.clone(), args))
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// A `Command` for this invocation, without any stdio configuration.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Shell-quoted rendering, for diagnostics only. Never executed.
impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(self.program()))?;
        for arg in self.args() {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(arg: &OsStr) -> String {
    let s = arg.to_string_lossy();
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        s.into_owned()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
