//! Case comparator.
//!
//! Turns an execution result into a [`Verdict`]. Output is compared by exact
//! string equality after normalization.

use crate::invocation::InvocationError;
use crate::normalize::normalize;
use crate::process::{ExecutionResult, Termination};
use crate::schema::TestCase;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Actual output recorded for a case that timed out.
pub const TIMEOUT_MARKER: &str = "TIMEOUT";
/// Actual output recorded for a case never started because the run deadline passed.
pub const DEADLINE_MARKER: &str = "DEADLINE";

/// Why a case failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// No command line could be built.
    Invocation { detail: String },
    /// The interpreter could not be started.
    Launch { detail: String },
    /// The interpreter was killed at its timeout.
    Timeout {
        #[serde(serialize_with = "serialize_duration")]
        limit: Duration,
    },
    /// The run-level deadline passed before the case started.
    Deadline,
    /// The interpreter was killed by a signal.
    Signal { signal: i32 },
    /// The interpreter exited with an unexpected code.
    ExitCode { expected: i32, actual: i32 },
    /// The interpreter wrote to stderr.
    Stderr,
    /// Standard output differs from the expectation.
    Mismatch,
}

impl Failure {
    /// Synthesized actual output for failures that produced no usable stdout.
    fn marker(&self) -> Option<String> {
        match self {
            Failure::Invocation { detail } => Some(format!("INVOCATION_ERROR: {detail}")),
            Failure::Launch { detail } => Some(format!("LAUNCH_ERROR: {detail}")),
            Failure::Timeout { .. } => Some(TIMEOUT_MARKER.to_string()),
            Failure::Deadline => Some(DEADLINE_MARKER.to_string()),
            Failure::Signal { signal } => Some(format!("SIGNAL: {signal}")),
            Failure::ExitCode { .. } | Failure::Stderr | Failure::Mismatch => None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Invocation { detail } => write!(f, "invalid invocation: {detail}"),
            Failure::Launch { detail } => write!(f, "launch failed: {detail}"),
            Failure::Timeout { limit } => write!(f, "timed out after {limit:.2?}"),
            Failure::Deadline => write!(f, "run deadline passed before the case started"),
            Failure::Signal { signal } => write!(f, "terminated by signal {signal}"),
            Failure::ExitCode { expected, actual } => {
                write!(f, "exit code: expected {expected}, got {actual}")?;
                match actual {
                    1 => write!(f, " (runtime error)"),
                    2 => write!(f, " (syntax error)"),
                    3 => write!(f, " (command-line error)"),
                    _ => Ok(()),
                }
            }
            Failure::Stderr => write!(f, "interpreter wrote to stderr"),
            Failure::Mismatch => write!(f, "output mismatch"),
        }
    }
}

/// Pass/fail outcome for one case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    /// Position of the case in its suite.
    pub case_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source_code: String,
    pub passed: bool,
    pub expected_output: String,
    pub actual_output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

impl Verdict {
    /// A failing verdict whose actual output is the failure's marker.
    pub fn rejected(case_index: usize, case: &TestCase, failure: Failure) -> Self {
        let actual_output = failure.marker().unwrap_or_default();
        Self {
            case_index,
            name: case.name.clone(),
            source_code: case.source_code.clone(),
            passed: false,
            expected_output: case.expected_output.clone(),
            actual_output,
            stderr: String::new(),
            failure: Some(failure),
            duration: Duration::ZERO,
        }
    }

    pub fn invocation_failed(case_index: usize, case: &TestCase, err: &InvocationError) -> Self {
        Self::rejected(
            case_index,
            case,
            Failure::Invocation {
                detail: err.to_string(),
            },
        )
    }

    /// The label shown in reports.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.source_code)
    }
}

/// Judge one execution against its case.
pub fn compare(case_index: usize, case: &TestCase, result: ExecutionResult) -> Verdict {
    let actual = normalize(&result.stdout);

    let failure = match result.termination {
        Termination::LaunchFailed(detail) => Some(Failure::Launch { detail }),
        Termination::TimedOut(limit) => Some(Failure::Timeout { limit }),
        Termination::Signaled(signal) => Some(Failure::Signal { signal }),
        Termination::Exited(code) if code != case.expect_exit => Some(Failure::ExitCode {
            expected: case.expect_exit,
            actual: code,
        }),
        Termination::Exited(_) if case.expect_exit == 0 && !result.stderr.is_empty() => {
            Some(Failure::Stderr)
        }
        Termination::Exited(_) if actual != case.expected_output => Some(Failure::Mismatch),
        Termination::Exited(_) => None,
    };

    let actual_output = failure
        .as_ref()
        .and_then(Failure::marker)
        .unwrap_or(actual);

    Verdict {
        case_index,
        name: case.name.clone(),
        source_code: case.source_code.clone(),
        passed: failure.is_none(),
        expected_output: case.expected_output.clone(),
        actual_output,
        stderr: result.stderr,
        failure,
        duration: result.duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: i32, stdout: &str, stderr: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            termination: Termination::Exited(code),
            duration: Duration::from_millis(3),
        }
    }

    fn ended(termination: Termination) -> ExecutionResult {
        ExecutionResult {
            stdout: String::new(),
            stderr: String::new(),
            termination,
            duration: Duration::from_millis(3),
        }
    }

    #[test]
    fn exact_match_passes() {
        let case = TestCase::new("print 2, 5", "2\n5");
        let verdict = compare(2, &case, exited(0, "2\r\n5\r\n", ""));
        assert!(verdict.passed);
        assert_eq!(verdict.case_index, 2);
        assert_eq!(verdict.actual_output, "2\n5");
        assert_eq!(verdict.failure, None);
    }

    #[test]
    fn whitespace_differences_fail() {
        let case = TestCase::new("print 2 +2*2", "6");
        let verdict = compare(0, &case, exited(0, "6 \n", ""));
        assert!(!verdict.passed);
        assert_eq!(verdict.failure, Some(Failure::Mismatch));
        assert_eq!(verdict.actual_output, "6 ");

        let verdict = compare(0, &case, exited(0, "6\n\n", ""));
        assert_eq!(verdict.failure, Some(Failure::Mismatch));
    }

    #[test]
    fn empty_output_can_pass() {
        let case = TestCase::new("x = 1", "");
        assert!(compare(0, &case, exited(0, "", "")).passed);
    }

    #[test]
    fn timeout_is_marked() {
        let case = TestCase::new("while true {}", "");
        let verdict = compare(
            0,
            &case,
            ended(Termination::TimedOut(Duration::from_secs(5))),
        );
        assert!(!verdict.passed);
        assert_eq!(verdict.actual_output, TIMEOUT_MARKER);
        assert_eq!(
            verdict.failure,
            Some(Failure::Timeout {
                limit: Duration::from_secs(5)
            })
        );
    }

    #[test]
    fn launch_error_is_marked() {
        let case = TestCase::new("print 1", "1");
        let verdict = compare(
            0,
            &case,
            ended(Termination::LaunchFailed("executable not found: uro".into())),
        );
        assert!(!verdict.passed);
        assert_eq!(verdict.actual_output, "LAUNCH_ERROR: executable not found: uro");
    }

    #[test]
    fn signal_is_marked() {
        let case = TestCase::new("print 1", "1");
        let verdict = compare(0, &case, ended(Termination::Signaled(11)));
        assert_eq!(verdict.actual_output, "SIGNAL: 11");
        assert_eq!(verdict.failure, Some(Failure::Signal { signal: 11 }));
    }

    #[test]
    fn unexpected_exit_code_fails_even_with_matching_output() {
        let case = TestCase::new("print 1", "1");
        let verdict = compare(0, &case, exited(1, "1\n", ""));
        assert!(!verdict.passed);
        assert_eq!(verdict.actual_output, "1");
        assert_eq!(
            verdict.failure,
            Some(Failure::ExitCode {
                expected: 0,
                actual: 1
            })
        );
        assert_eq!(
            verdict.failure.unwrap().to_string(),
            "exit code: expected 0, got 1 (runtime error)"
        );
    }

    #[test]
    fn expected_error_exit_passes() {
        let mut case = TestCase::new("print 2 +", "");
        case.expect_exit = 2;
        let verdict = compare(0, &case, exited(2, "", "syntax error at 1:9\n"));
        assert!(verdict.passed, "{:?}", verdict.failure);
        assert_eq!(verdict.stderr, "syntax error at 1:9\n");
    }

    #[test]
    fn stderr_fails_a_successful_run() {
        let case = TestCase::new("print 1", "1");
        let verdict = compare(0, &case, exited(0, "1\n", "warning\n"));
        assert!(!verdict.passed);
        assert_eq!(verdict.failure, Some(Failure::Stderr));
        assert_eq!(verdict.stderr, "warning\n");
    }

    #[test]
    fn rejected_verdict_uses_marker() {
        let case = TestCase::new("", "1").named("blank");
        let verdict = Verdict::invocation_failed(4, &case, &InvocationError::EmptySnippet);
        assert!(!verdict.passed);
        assert_eq!(verdict.case_index, 4);
        assert_eq!(verdict.label(), "blank");
        assert_eq!(verdict.actual_output, "INVOCATION_ERROR: snippet is empty");

        let verdict = Verdict::rejected(5, &case, Failure::Deadline);
        assert_eq!(verdict.actual_output, DEADLINE_MARKER);
    }

    #[test]
    fn verdict_serializes_failure_kind() {
        let case = TestCase::new("print 1", "1");
        let verdict = compare(0, &case, exited(0, "2\n", ""));
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["failure"]["kind"], "mismatch");
        assert_eq!(json["actual_output"], "2");
        assert_eq!(json["passed"], false);
        assert!(json.get("stderr").is_none());
    }
}
