//! Background process registry.
//!
//! Tracks detached OS processes independently of any execution's lifetime.
//! Two admission paths:
//!
//! - **Spawn-and-own** ([`ProcessRegistry::spawn_owned`]): the registry
//!   starts a detached process as a process-group leader, owns its stdio,
//!   pumps every output line into the process's log ring, and relies on the
//!   native exit notification for the real exit code and signal.
//! - **Adopt-by-pid** ([`ProcessRegistry::adopt_from_tool_output`] /
//!   [`ProcessRegistry::track_external`]): a tool invocation reports a new
//!   PID via the `BGPID:<pid>` sentinel line; the registry validates the
//!   PID with a non-destructive liveness probe and polls it on a fixed
//!   interval, synthesizing a terminal exit the first time the probe fails.
//!
//! Each tracked process gets its own poll task rather than one global
//! scanning timer, so a growing tracked set adds no head-of-line delay.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ProcessConfig;
use crate::models::process::{BackgroundProcess, LogChannel, LogEntry, LogSource};
use crate::procs::log_ring::LogRing;
use crate::procs::ProcessEvent;
use crate::{AppError, Result};

/// Sentinel pattern a background-launching command must print to report its
/// PID: a fixed token followed by the numeric PID.
const BGPID_PATTERN: &str = r"BGPID:(\d+)";

/// Exit code synthesized for adopted processes found dead by the liveness
/// probe; no real status is observable for a non-child PID.
const SYNTHESIZED_EXIT_CODE: i32 = 0;

fn bgpid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)] // Pattern is a compile-time constant.
    RE.get_or_init(|| Regex::new(BGPID_PATTERN).expect("valid BGPID pattern"))
}

/// One tracked process with its ring and task cancellation token.
struct Tracked {
    record: BackgroundProcess,
    ring: Arc<Mutex<LogRing>>,
    cancel: CancellationToken,
}

type TrackedMap = Arc<Mutex<HashMap<String, Tracked>>>;

/// Registry owning all tracked background processes.
pub struct ProcessRegistry {
    config: ProcessConfig,
    inner: TrackedMap,
    events: mpsc::Sender<ProcessEvent>,
}

impl ProcessRegistry {
    /// Create a registry that reports lifecycle changes on `events`.
    #[must_use]
    pub fn new(config: ProcessConfig, events: mpsc::Sender<ProcessEvent>) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    // ── Spawn-and-own ────────────────────────────────────────────────────

    /// Spawn a detached process and own its stdio.
    ///
    /// The child is started through `sh -c` as a process-group leader so a
    /// later stop can signal the whole group. Stdout and stderr lines are
    /// appended to the process's log ring; the native exit notification
    /// supplies the real exit code or signal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the OS spawn fails.
    pub async fn spawn_owned(
        &self,
        project_id: &str,
        execution_id: Option<&str>,
        command: &str,
        working_dir: &Path,
    ) -> Result<BackgroundProcess> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Process(format!("failed to spawn process: {err}")))?;

        let pid = child
            .id()
            .ok_or_else(|| AppError::Process("spawned process has no pid".into()))?;

        let record = BackgroundProcess::new(
            project_id.to_owned(),
            execution_id.map(str::to_owned),
            pid,
            command.to_owned(),
            LogSource::OwnedPipe,
        );

        let ring = Arc::new(Mutex::new(LogRing::new(self.config.log_ring_capacity)));
        let cancel = CancellationToken::new();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_output(
                stdout,
                LogChannel::Stdout,
                Arc::clone(&ring),
                cancel.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_output(
                stderr,
                LogChannel::Stderr,
                Arc::clone(&ring),
                cancel.clone(),
            ));
        }

        // The map entry must exist before the wait task can observe an
        // exit, or an instantly-exiting child would lose its exit record.
        self.insert_tracked(record.clone(), ring, cancel.clone()).await;

        // Native exit notification: one wait task per owned child.
        tokio::spawn(wait_for_exit(
            record.id.clone(),
            child,
            Arc::clone(&self.inner),
            self.events.clone(),
            cancel,
        ));

        info!(
            process_id = record.id,
            pid, project_id, command, "background process spawned"
        );
        Ok(record)
    }

    // ── Adopt-by-pid ─────────────────────────────────────────────────────

    /// Parse a tool's result text for the PID sentinel and adopt the
    /// reported process.
    ///
    /// Returns `None` when the text carries no sentinel or the PID fails
    /// the liveness probe; nothing is registered in either case.
    pub async fn adopt_from_tool_output(
        &self,
        project_id: &str,
        execution_id: &str,
        text: &str,
    ) -> Option<BackgroundProcess> {
        let captures = bgpid_regex().captures(text)?;
        let pid: u32 = captures.get(1)?.as_str().parse().ok()?;

        let command = text
            .lines()
            .find(|line| line.contains("BGPID:"))
            .map_or_else(|| format!("pid {pid}"), |line| line.trim().to_owned());

        self.track_external(project_id, Some(execution_id), pid, &command, None)
            .await
    }

    /// Track an externally spawned process by PID without owning its stdio.
    ///
    /// The PID is validated with a non-destructive liveness probe; a dead
    /// PID is refused and nothing is registered. Recorded output, if any,
    /// must come from the given log-file path. A per-process poll task
    /// synthesizes a terminal exit the first time the probe fails.
    pub async fn track_external(
        &self,
        project_id: &str,
        execution_id: Option<&str>,
        pid: u32,
        command: &str,
        log_path: Option<&str>,
    ) -> Option<BackgroundProcess> {
        if !probe_alive(pid) {
            warn!(pid, "refusing to adopt dead pid");
            return None;
        }

        let log_source = log_path.map_or(LogSource::None, |p| LogSource::LogFile(p.to_owned()));
        let record = BackgroundProcess::new(
            project_id.to_owned(),
            execution_id.map(str::to_owned),
            pid,
            command.to_owned(),
            log_source,
        );

        let ring = Arc::new(Mutex::new(LogRing::new(self.config.log_ring_capacity)));
        let cancel = CancellationToken::new();

        self.insert_tracked(record.clone(), ring, cancel.clone()).await;

        tokio::spawn(
            poll_liveness(
                record.id.clone(),
                pid,
                Duration::from_secs(self.config.poll_interval_seconds),
                Arc::clone(&self.inner),
                self.events.clone(),
                cancel,
            )
            .instrument(info_span!("poll_liveness", pid)),
        );

        info!(process_id = record.id, pid, "external process adopted");
        Some(record)
    }

    /// Re-track a previously known process after a host restart.
    ///
    /// Only succeeds when the PID is still alive. Log history is not
    /// recoverable: the ring starts fresh and the process is tracked
    /// identically to a freshly adopted one.
    pub async fn restore(&self, record: BackgroundProcess) -> bool {
        if record.is_terminated() {
            return false;
        }
        if !probe_alive(record.pid) {
            debug!(pid = record.pid, "restore skipped, pid no longer alive");
            return false;
        }

        let ring = Arc::new(Mutex::new(LogRing::new(self.config.log_ring_capacity)));
        let cancel = CancellationToken::new();

        info!(process_id = record.id, pid = record.pid, "process restored");
        let process_id = record.id.clone();
        let pid = record.pid;
        self.insert_tracked(record, ring, cancel.clone()).await;

        tokio::spawn(
            poll_liveness(
                process_id,
                pid,
                Duration::from_secs(self.config.poll_interval_seconds),
                Arc::clone(&self.inner),
                self.events.clone(),
                cancel,
            )
            .instrument(info_span!("poll_liveness", pid)),
        );

        true
    }

    // ── Control & queries ────────────────────────────────────────────────

    /// Stop a tracked process.
    ///
    /// Owned processes are signalled as a whole group (they are group
    /// leaders); adopted processes are signalled by PID directly. Both
    /// paths escalate to a forced kill after the configured grace period
    /// if the process is still alive.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown process id.
    pub async fn stop(&self, process_id: &str) -> Result<()> {
        let (pid, owned) = {
            let inner = self.inner.lock().await;
            let tracked = inner
                .get(process_id)
                .ok_or_else(|| AppError::NotFound(format!("process {process_id} not tracked")))?;
            if tracked.record.is_terminated() {
                return Ok(());
            }
            (
                tracked.record.pid,
                tracked.record.log_source == LogSource::OwnedPipe,
            )
        };

        info!(process_id, pid, owned, "stopping background process");
        signal_terminate(pid, owned);

        let grace = Duration::from_secs(self.config.stop_grace_seconds);
        tokio::time::sleep(grace).await;

        if probe_alive(pid) {
            warn!(process_id, pid, "grace period elapsed, forcing kill");
            signal_kill(pid, owned);
        }

        Ok(())
    }

    /// Retained log entries for a process, oldest first.
    pub async fn logs(&self, process_id: &str) -> Option<Vec<LogEntry>> {
        // Release the map guard before locking the ring.
        let ring = {
            let inner = self.inner.lock().await;
            Arc::clone(&inner.get(process_id)?.ring)
        };
        let entries = ring.lock().await.to_vec();
        Some(entries)
    }

    /// Current record for a process.
    pub async fn get(&self, process_id: &str) -> Option<BackgroundProcess> {
        self.inner
            .lock()
            .await
            .get(process_id)
            .map(|t| t.record.clone())
    }

    /// Records for all tracked processes.
    pub async fn list(&self) -> Vec<BackgroundProcess> {
        self.inner
            .lock()
            .await
            .values()
            .map(|t| t.record.clone())
            .collect()
    }

    /// Stop all monitoring tasks. Tracked processes keep running; they are
    /// detached by design and may outlive the host.
    pub async fn shutdown(&self) {
        let inner = self.inner.lock().await;
        for tracked in inner.values() {
            tracked.cancel.cancel();
        }
        info!(count = inner.len(), "process registry shut down");
    }

    async fn insert_tracked(
        &self,
        record: BackgroundProcess,
        ring: Arc<Mutex<LogRing>>,
        cancel: CancellationToken,
    ) {
        let event = ProcessEvent::Started {
            process_id: record.id.clone(),
            pid: record.pid,
            command: record.command.clone(),
        };
        self.inner.lock().await.insert(
            record.id.clone(),
            Tracked {
                record,
                ring,
                cancel,
            },
        );
        if self.events.send(event).await.is_err() {
            debug!("process event channel closed");
        }
    }
}

// ── Monitor tasks ─────────────────────────────────────────────────────────────

/// Pump one stdio stream line-by-line into the log ring.
async fn pump_output<R>(
    stream: R,
    channel: LogChannel,
    ring: Arc<Mutex<LogRing>>,
    cancel: CancellationToken,
) where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => {
                match line {
                    Ok(Some(content)) => {
                        ring.lock().await.push(LogEntry::new(channel, content));
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        }
    }
}

/// Await the native exit of an owned child and record its real status.
async fn wait_for_exit(
    process_id: String,
    mut child: tokio::process::Child,
    inner: TrackedMap,
    events: mpsc::Sender<ProcessEvent>,
    cancel: CancellationToken,
) {
    let (code, signal) = match child.wait().await {
        Ok(status) => (status.code(), signal_name(&status)),
        Err(err) => {
            warn!(process_id, %err, "error waiting for owned process");
            (Some(1), None)
        }
    };

    cancel.cancel();
    mark_exited(&inner, &events, &process_id, code, signal).await;
}

/// Periodic liveness probe for one adopted process.
///
/// Cancelled once the process is found dead; synthesizes a terminal exit
/// with a fixed code and no signal on the first probe failure.
async fn poll_liveness(
    process_id: String,
    pid: u32,
    interval: Duration,
    inner: TrackedMap,
    events: mpsc::Sender<ProcessEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(process_id, "liveness poll cancelled");
                return;
            }
            () = tokio::time::sleep(interval) => {}
        }

        if !probe_alive(pid) {
            info!(process_id, pid, "adopted process no longer alive");
            cancel.cancel();
            mark_exited(&inner, &events, &process_id, Some(SYNTHESIZED_EXIT_CODE), None).await;
            return;
        }
    }
}

/// Record a terminal state exactly once; transitions are monotonic.
async fn mark_exited(
    inner: &TrackedMap,
    events: &mpsc::Sender<ProcessEvent>,
    process_id: &str,
    code: Option<i32>,
    signal: Option<String>,
) {
    {
        let mut map = inner.lock().await;
        let Some(tracked) = map.get_mut(process_id) else {
            return;
        };
        if tracked.record.is_terminated() {
            return;
        }
        tracked.record.exit_code = code;
        tracked.record.exit_signal = signal.clone();
    }

    info!(process_id, ?code, ?signal, "background process exited");
    let event = ProcessEvent::Exited {
        process_id: process_id.to_owned(),
        code,
        signal,
    };
    if events.send(event).await.is_err() {
        debug!(process_id, "process event channel closed");
    }
}

// ── Signalling helpers ────────────────────────────────────────────────────────

/// Non-destructive liveness probe: signal 0 delivery check.
#[cfg(unix)]
#[must_use]
pub fn probe_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Alive but owned by another user.
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Liveness probing is unsupported off unix; report dead.
#[cfg(not(unix))]
#[must_use]
pub fn probe_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn signal_terminate(pid: u32, group: bool) {
    send_signal(pid, group, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(unix)]
fn signal_kill(pid: u32, group: bool) {
    send_signal(pid, group, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(unix)]
fn send_signal(pid: u32, group: bool, signal: nix::sys::signal::Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let target = nix::unistd::Pid::from_raw(raw);
    let result = if group {
        nix::sys::signal::killpg(target, signal)
    } else {
        nix::sys::signal::kill(target, Some(signal))
    };
    if let Err(err) = result {
        warn!(pid, %err, ?signal, "failed to signal process");
    }
}

#[cfg(not(unix))]
fn signal_terminate(_pid: u32, _group: bool) {}

#[cfg(not(unix))]
fn signal_kill(_pid: u32, _group: bool) {}

/// Name of the terminating signal, when the status reports one.
#[cfg(unix)]
fn signal_name(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    let raw = status.signal()?;
    nix::sys::signal::Signal::try_from(raw).map_or_else(
        |_| Some(format!("SIG{raw}")),
        |sig| Some(sig.as_ref().to_owned()),
    )
}

#[cfg(not(unix))]
fn signal_name(_status: &std::process::ExitStatus) -> Option<String> {
    None
}
