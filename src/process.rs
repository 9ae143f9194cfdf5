//! Process runner.
//!
//! Spawns one interpreter process per call with stdin closed, drains stdout and
//! stderr on their own threads and waits with a deadline. Launch failures and
//! timeouts come back as data; nothing here aborts the suite.
//!
//! On Unix every interpreter leads its own process group. The whole group is
//! killed when the interpreter times out or exits, so background descendants
//! neither hold the output pipes open nor outlive the case.

use crate::invocation::Invocation;
use std::collections::BTreeSet;
use std::io::{self, Read};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Minimum time allowed for the output readers to finish once the
/// interpreter has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How the interpreter process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Exited normally with this code.
    Exited(i32),
    /// Killed by a signal (Unix only).
    Signaled(i32),
    /// Still running at the deadline; it was killed and reaped.
    TimedOut(Duration),
    /// The process could not be started.
    LaunchFailed(String),
}

/// Raw result of one interpreter run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub termination: Termination,
    pub duration: Duration,
}

/// Process groups of interpreters that are still running.
struct LiveGroups {
    groups: BTreeSet<u32>,
    closed: bool,
}

static LIVE_GROUPS: Mutex<LiveGroups> = Mutex::new(LiveGroups {
    groups: BTreeSet::new(),
    closed: false,
});

fn register(pgid: u32) {
    let mut live = LIVE_GROUPS.lock().unwrap_or_else(PoisonError::into_inner);
    if live.closed {
        // Spawned after shutdown began.
        kill_group(pgid);
    } else {
        live.groups.insert(pgid);
    }
}

fn unregister(pgid: u32) {
    let mut live = LIVE_GROUPS.lock().unwrap_or_else(PoisonError::into_inner);
    live.groups.remove(&pgid);
}

/// Kill every interpreter group still running and refuse new ones.
///
/// Called from the interrupt handler right before the harness exits.
pub fn terminate_all() {
    let mut live = LIVE_GROUPS.lock().unwrap_or_else(PoisonError::into_inner);
    live.closed = true;
    for &pgid in &live.groups {
        kill_group(pgid);
    }
    live.groups.clear();
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, "failed to kill process group: {e}"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Owns a running child and its process group. Dropping the guard kills the
/// group and reaps the child if nobody else did.
struct ChildGuard {
    child: Child,
    pgid: u32,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        let pgid = child.id();
        register(pgid);
        Self {
            child,
            pgid,
            reaped: false,
        }
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let status = self.child.wait_timeout(timeout)?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    /// Kill whatever is left of the interpreter's group.
    fn sweep(&self) {
        kill_group(self.pgid);
    }

    fn kill_and_reap(&mut self) {
        if self.reaped {
            return;
        }
        // The group is killed while the leader is still unreaped, so its id
        // cannot have been reused yet.
        self.sweep();
        if let Err(e) = self.child.kill() {
            warn!(pid = self.child.id(), "failed to kill interpreter: {e}");
        }
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.kill_and_reap();
        unregister(self.pgid);
    }
}

/// Run `invocation` to completion or until `timeout` elapses.
pub fn execute(invocation: &Invocation, timeout: Duration) -> ExecutionResult {
    let start = Instant::now();

    let mut cmd = invocation.command();
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let detail = describe_spawn_error(invocation, &e);
            warn!(command = %invocation, "{detail}");
            return ExecutionResult {
                stdout: String::new(),
                stderr: String::new(),
                termination: Termination::LaunchFailed(detail),
                duration: start.elapsed(),
            };
        }
    };

    let mut guard = ChildGuard::new(child);
    debug!(pid = guard.child.id(), command = %invocation, "spawned interpreter");

    let (tx, rx) = mpsc::channel();
    drain(guard.child.stdout.take(), Stream::Stdout, tx.clone());
    drain(guard.child.stderr.take(), Stream::Stderr, tx);

    let timed_out = || {
        warn!(command = %invocation, "interpreter timed out after {timeout:.2?}");
        ExecutionResult {
            stdout: String::new(),
            stderr: String::new(),
            termination: Termination::TimedOut(timeout),
            duration: start.elapsed(),
        }
    };

    let termination = match guard.wait_timeout(timeout) {
        Ok(Some(status)) => {
            // Leftover descendants would keep the pipes open.
            guard.sweep();
            termination_of(status)
        }
        Ok(None) => {
            guard.kill_and_reap();
            // Descendants that left the group may still hold the pipes, so
            // the readers are left to finish on their own.
            return timed_out();
        }
        Err(e) => {
            guard.kill_and_reap();
            Termination::LaunchFailed(format!("failed to wait for interpreter: {e}"))
        }
    };

    let limit = timeout.saturating_sub(start.elapsed()).max(DRAIN_GRACE);
    match collect(&rx, limit) {
        Some((stdout, stderr)) => ExecutionResult {
            stdout,
            stderr,
            termination,
            duration: start.elapsed(),
        },
        None => timed_out(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn drain<R>(pipe: Option<R>, stream: Stream, tx: Sender<(Stream, Vec<u8>)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send((stream, buf));
    });
}

/// Wait up to `limit` for both readers. `None` if either is still blocked.
fn collect(rx: &Receiver<(Stream, Vec<u8>)>, limit: Duration) -> Option<(String, String)> {
    let deadline = Instant::now() + limit;
    let (mut stdout, mut stderr) = (None, None);
    while stdout.is_none() || stderr.is_none() {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left).ok()? {
            (Stream::Stdout, bytes) => stdout = Some(bytes),
            (Stream::Stderr, bytes) => stderr = Some(bytes),
        }
    }
    let text = |bytes: Option<Vec<u8>>| {
        String::from_utf8_lossy(&bytes.unwrap_or_default()).into_owned()
    };
    Some((text(stdout), text(stderr)))
}

fn termination_of(status: ExitStatus) -> Termination {
    if let Some(code) = status.code() {
        return Termination::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Termination::Signaled(signal);
        }
    }
    Termination::LaunchFailed(format!("unrecognized exit status: {status}"))
}

fn describe_spawn_error(invocation: &Invocation, e: &io::Error) -> String {
    let program = invocation.program().to_string_lossy();
    match e.kind() {
        io::ErrorKind::NotFound => format!("executable not found: {program}"),
        io::ErrorKind::PermissionDenied => format!("permission denied: {program}"),
        _ => format!("failed to start {program}: {e}"),
    }
}
