//! Test suite runner.
//!
//! Runs every selected case through invocation, execution and comparison and
//! returns the verdicts in definition order. Cases never short-circuit the run.

use crate::compare::{Failure, Verdict, compare};
use crate::config::HarnessConfig;
use crate::invocation::Invocation;
use crate::process::execute;
use crate::schema::TestCase;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// All verdicts of one run, in case-definition order.
#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub verdicts: Vec<Verdict>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Counts derived from a report.
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteSummary<'a> {
    pub passed: usize,
    pub failed: usize,
    pub failures: Vec<&'a Verdict>,
}

impl SuiteSummary<'_> {
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl SuiteReport {
    pub fn summary(&self) -> SuiteSummary<'_> {
        let failures: Vec<&Verdict> = self.verdicts.iter().filter(|v| !v.passed).collect();
        SuiteSummary {
            passed: self.verdicts.len() - failures.len(),
            failed: failures.len(),
            failures,
        }
    }
}

/// Run `cases` under `config`, keeping only those matching `filter`.
///
/// A case matches when the filter matches its name or its snippet. Filtered
/// cases keep their original index.
pub fn run(cases: &[TestCase], config: &HarnessConfig, filter: Option<&Regex>) -> SuiteReport {
    let started_at = Utc::now();
    let start = Instant::now();
    let deadline = config.deadline.map(|d| start + d);

    let selected: Vec<(usize, &TestCase)> = cases
        .iter()
        .enumerate()
        .filter(|(_, case)| filter.is_none_or(|re| matches_filter(re, case)))
        .collect();

    info!(
        cases = selected.len(),
        jobs = config.jobs,
        interpreter = %config.interpreter.display(),
        "starting run"
    );

    let verdicts = if config.jobs <= 1 || selected.len() <= 1 {
        selected
            .iter()
            .map(|&(idx, case)| run_case(idx, case, config, deadline))
            .collect()
    } else {
        run_pool(&selected, config, deadline)
    };

    let report = SuiteReport {
        verdicts,
        started_at,
        elapsed: start.elapsed(),
    };
    let summary = report.summary();
    info!(
        passed = summary.passed,
        failed = summary.failed,
        "run finished in {:.2?}",
        report.elapsed
    );
    report
}

fn matches_filter(re: &Regex, case: &TestCase) -> bool {
    case.name.as_deref().is_some_and(|n| re.is_match(n)) || re.is_match(&case.source_code)
}

/// Bounded worker pool: each worker claims the next unclaimed case until none
/// are left. Results are re-sorted so order never depends on scheduling.
fn run_pool(
    selected: &[(usize, &TestCase)],
    config: &HarnessConfig,
    deadline: Option<Instant>,
) -> Vec<Verdict> {
    let next = &AtomicUsize::new(0);
    let workers = config.jobs.min(selected.len());

    let mut indexed: Vec<(usize, Verdict)> = thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                s.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let slot = next.fetch_add(1, Ordering::Relaxed);
                        let Some(&(idx, case)) = selected.get(slot) else {
                            break;
                        };
                        done.push((slot, run_case(idx, case, config, deadline)));
                    }
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    indexed.sort_by_key(|(slot, _)| *slot);
    indexed.into_iter().map(|(_, v)| v).collect()
}

/// Run one case through the whole pipeline.
pub fn run_case(
    case_index: usize,
    case: &TestCase,
    config: &HarnessConfig,
    deadline: Option<Instant>,
) -> Verdict {
    let invocation = match Invocation::build(config, &case.source_code) {
        Ok(inv) => inv,
        Err(e) => return Verdict::invocation_failed(case_index, case, &e),
    };

    let mut timeout = case
        .timeout
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .filter(|d| !d.is_zero())
        .unwrap_or(config.timeout);

    if let Some(deadline) = deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!(case = case_index, "skipped: run deadline passed");
            return Verdict::rejected(case_index, case, Failure::Deadline);
        }
        timeout = timeout.min(remaining);
    }

    let result = execute(&invocation, timeout);
    let verdict = compare(case_index, case, result);
    debug!(
        case = case_index,
        passed = verdict.passed,
        "finished in {:.2?}",
        verdict.duration
    );
    verdict
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// `sh -d <dir> -c <code>` fails (`-d` is not a shell option), so cases run
    /// through a tiny stand-in interpreter instead.
    fn fake_interpreter() -> (tempfile::TempDir, HarnessConfig) {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("uro");
        std::fs::write(&script, "#!/bin/sh\ncd \"$2\" || exit 3\neval \"$4\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let config = HarnessConfig {
            interpreter: script,
            fixture_dir: PathBuf::from(dir.path()),
            timeout: Duration::from_secs(5),
            ..HarnessConfig::default()
        };
        (dir, config)
    }

    fn cases() -> Vec<TestCase> {
        vec![
            TestCase::new("echo 'hello world'", "hello world"),
            TestCase::new("echo 6", "7"),
            TestCase::new("echo 2; echo 5", "2\n5").named("two lines"),
        ]
    }

    #[test]
    fn one_verdict_per_case_in_order() {
        let (_dir, config) = fake_interpreter();
        let report = run(&cases(), &config, None);
        let indices: Vec<_> = report.verdicts.iter().map(|v| v.case_index).collect();
        assert_eq!(indices, [0, 1, 2]);
        let passed: Vec<_> = report.verdicts.iter().map(|v| v.passed).collect();
        assert_eq!(passed, [true, false, true]);

        let summary = report.summary();
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 3);
        assert!(!summary.all_passed());
        assert_eq!(summary.failures[0].case_index, 1);
    }

    #[test]
    fn failures_do_not_stop_the_run() {
        let (_dir, config) = fake_interpreter();
        let cases = vec![
            TestCase::new("exit 1", ""),
            TestCase::new("  ", ""),
            TestCase::new("echo ok", "ok"),
        ];
        let report = run(&cases, &config, None);
        assert_eq!(report.verdicts.len(), 3);
        assert!(!report.verdicts[0].passed);
        assert!(report.verdicts[1].actual_output.starts_with("INVOCATION_ERROR"));
        assert!(report.verdicts[2].passed);
    }

    #[test]
    fn missing_interpreter_yields_failed_verdicts() {
        let config = HarnessConfig {
            interpreter: PathBuf::from("uro-blackbox-no-such-interpreter"),
            ..HarnessConfig::default()
        };
        let report = run(&cases(), &config, None);
        assert_eq!(report.verdicts.len(), 3);
        assert!(report
            .verdicts
            .iter()
            .all(|v| v.actual_output.starts_with("LAUNCH_ERROR")));
    }

    #[test]
    fn timeout_does_not_block_later_cases() {
        let (_dir, config) = fake_interpreter();
        let mut slow = TestCase::new("sleep 10", "");
        slow.timeout = Some(0.2);
        let cases = vec![slow, TestCase::new("echo after", "after")];

        let start = Instant::now();
        let report = run(&cases, &config, None);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.verdicts[0].actual_output, "TIMEOUT");
        assert!(report.verdicts[1].passed);
    }

    #[test]
    fn fixture_directory_is_the_interpreter_workdir() {
        let (dir, config) = fake_interpreter();
        std::fs::write(dir.path().join("a.txt"), "x".repeat(47)).unwrap();
        let cases = vec![TestCase::new(
            "test -f a.txt && echo 1; wc -c < a.txt | tr -d ' '",
            "1\n47",
        )];
        let report = run(&cases, &config, None);
        assert!(report.verdicts[0].passed, "{:?}", report.verdicts[0]);
    }

    #[test]
    fn parallel_run_preserves_order() {
        let (_dir, base) = fake_interpreter();
        let config = HarnessConfig { jobs: 4, ..base };
        let cases: Vec<_> = (0..8)
            .map(|i| {
                // Later cases finish first.
                let delay = f64::from(8 - i) * 0.02;
                TestCase::new(format!("sleep {delay}; echo {i}"), i.to_string())
            })
            .collect();
        let report = run(&cases, &config, None);
        let indices: Vec<_> = report.verdicts.iter().map(|v| v.case_index).collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
        assert!(report.verdicts.iter().all(|v| v.passed));
    }

    #[test]
    fn deadline_cuts_off_remaining_cases() {
        let (_dir, base) = fake_interpreter();
        let config = HarnessConfig {
            deadline: Some(Duration::from_millis(300)),
            ..base
        };
        let cases = vec![
            TestCase::new("sleep 10", ""),
            TestCase::new("sleep 10", ""),
            TestCase::new("echo late", "late"),
        ];
        let start = Instant::now();
        let report = run(&cases, &config, None);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(report.verdicts.len(), 3);
        assert_eq!(report.verdicts[0].actual_output, "TIMEOUT");
        assert_eq!(report.verdicts[1].actual_output, "DEADLINE");
        assert_eq!(report.verdicts[2].actual_output, "DEADLINE");
    }

    #[test]
    fn filter_selects_by_name_or_snippet() {
        let (_dir, config) = fake_interpreter();
        let re = Regex::new("two|hello").unwrap();
        let report = run(&cases(), &config, Some(&re));
        let indices: Vec<_> = report.verdicts.iter().map(|v| v.case_index).collect();
        assert_eq!(indices, [0, 2]);
    }

    #[test]
    fn repeated_runs_agree() {
        let (_dir, config) = fake_interpreter();
        let strip = |r: SuiteReport| -> Vec<(usize, bool, String)> {
            r.verdicts
                .into_iter()
                .map(|v| (v.case_index, v.passed, v.actual_output))
                .collect()
        };
        let first = strip(run(&cases(), &config, None));
        let second = strip(run(&cases(), &config, None));
        assert_eq!(first, second);
    }
}
