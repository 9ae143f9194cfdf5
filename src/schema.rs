//! Schema definitions for case files.
//!
//! A case file lists interpreter snippets together with the output they must
//! produce. Files are written in YAML or TOML and validated against these types.

use schemars::JsonSchema;
use serde::de::{self, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Root document for a case-definition file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CaseFile {
    /// Schema version (currently always 1).
    #[serde(default = "default_version")]
    pub version: u32,

    /// Harness defaults for this file. Command-line flags take precedence.
    #[serde(default)]
    pub defaults: Defaults,

    /// The cases, run and reported in this order.
    pub cases: Vec<TestCase>,
}

fn default_version() -> u32 {
    1
}

/// File-level harness defaults.
///
/// `interpreter`, `fixture_dir` and `args` support `${VAR}` interpolation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Defaults {
    /// Interpreter executable (a bare name is looked up on `PATH`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    /// Fixture directory passed to the interpreter with `-d`.
    /// Relative paths are resolved against the case file's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture_dir: Option<String>,

    /// Per-case timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    /// Number of cases to run concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,

    /// Deadline for the whole run in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<f64>,

    /// Extra interpreter arguments, inserted before `-c`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// A single conformance case: one snippet and the output it must print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestCase {
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Snippet passed to the interpreter with `-c`.
    #[serde(rename = "code")]
    pub source_code: String,

    /// Expected standard output: a string, or a list of lines joined with `\n`.
    /// Bare decimal integers are accepted as lines; quote any other scalar.
    #[serde(rename = "expect", deserialize_with = "expected_output")]
    #[schemars(with = "ExpectedOutput")]
    pub expected_output: String,

    /// Expected interpreter exit code (1 runtime error, 2 syntax error, 3 CLI error).
    #[serde(rename = "exit", default, skip_serializing_if = "is_zero")]
    pub expect_exit: i32,

    /// Timeout in seconds (overrides the harness default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

fn is_zero(code: &i32) -> bool {
    *code == 0
}

impl TestCase {
    /// A case expecting `expected_output` from `source_code` and a zero exit.
    pub fn new(source_code: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            name: None,
            source_code: source_code.into(),
            expected_output: expected_output.into(),
            expect_exit: 0,
            timeout: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Join lines the way the interpreter prints multiple values.
pub fn lines<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .map(|l| l.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Accepted spellings of an expectation.
#[derive(Debug, Clone, JsonSchema)]
#[serde(untagged)]
enum ExpectedOutput {
    /// A single (possibly multi-line) string.
    One(ExpectedLine),
    /// One entry per printed line.
    Lines(Vec<ExpectedLine>),
}

/// A single expected line. Bare integers are accepted so `expect: 6` works.
///
/// YAML reads `0x10` as the integer 16, so hex, octal and float spellings
/// must be quoted. Floats and booleans are rejected rather than reformatted.
#[derive(Debug, Clone, JsonSchema)]
#[serde(untagged)]
enum ExpectedLine {
    Text(String),
    Integer(i64),
}

impl<'de> Deserialize<'de> for ExpectedLine {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match deserializer.deserialize_any(ExpectedVisitor { allow_list: false })? {
            ExpectedOutput::One(line) => Ok(line),
            ExpectedOutput::Lines(_) => Err(de::Error::invalid_type(
                Unexpected::Seq,
                &"a string or a decimal integer",
            )),
        }
    }
}

/// Scalars become one line; a sequence (at the top level only) becomes lines.
/// Anything else gets an error naming what is accepted instead of serde's
/// untagged-enum message.
struct ExpectedVisitor {
    allow_list: bool,
}

impl<'de> Visitor<'de> for ExpectedVisitor {
    type Value = ExpectedOutput;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.allow_list {
            f.write_str("a string, a decimal integer or a list of them")?;
        } else {
            f.write_str("a string or a decimal integer")?;
        }
        f.write_str(" (quote other scalars, e.g. \"1.5\" or \"true\")")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(ExpectedOutput::One(ExpectedLine::Text(v.to_string())))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(ExpectedOutput::One(ExpectedLine::Text(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(ExpectedOutput::One(ExpectedLine::Integer(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(|n| ExpectedOutput::One(ExpectedLine::Integer(n)))
            .map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: de::SeqAccess<'de>,
    {
        if !self.allow_list {
            return Err(de::Error::invalid_type(Unexpected::Seq, &self));
        }
        let mut all = Vec::new();
        while let Some(line) = seq.next_element::<ExpectedLine>()? {
            all.push(line);
        }
        Ok(ExpectedOutput::Lines(all))
    }
}

impl From<ExpectedLine> for String {
    fn from(line: ExpectedLine) -> String {
        match line {
            ExpectedLine::Text(s) => s,
            ExpectedLine::Integer(n) => n.to_string(),
        }
    }
}

fn expected_output<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match deserializer.deserialize_any(ExpectedVisitor { allow_list: true })? {
        ExpectedOutput::One(line) => line.into(),
        ExpectedOutput::Lines(all) => lines(all.into_iter().map(String::from)),
    })
}

/// Generate the JSON Schema for case files.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(CaseFile)
}
