//! The Sandbox Runner: the only way hackeval executes untrusted code.
//!
//! Every command (test runs, builds, validators, linters) goes through a
//! [`SandboxRunner`]. [`ProcessSandbox`] is the host implementation:
//!
//! - the child leads its own process group; every descendant, including
//!   ones that leave the group with `setsid`, is tracked by ancestry, and the
//!   host is a child subreaper so orphans are reparented to it
//! - rlimits (CPU backstop, address space, file size, processes, no core
//!   dumps) are applied in `pre_exec`
//! - Landlock confines writes to the writable directory and denies TCP
//! - wall time, tree RSS, and output size are watched from the parent
//! - after the leader is reaped the tree is killed again and the call only
//!   returns once no live member remains (or the reap timeout expires)

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{IsolationMode, SandboxSection};
use crate::metrics::METRICS;
use crate::obs;

use super::cancel::CancelSignal;
use super::error::{SandboxError, SandboxResult};
use super::landlock::{self, LandlockSupport};
use super::limits::{LimitKind, ResourceLimits};
use super::output::{feed_stdin, read_capped, Captured, KillReason, KillSwitch};
use super::proc;
use super::tree::{self, ProcessTree, RUN_MARKER_VAR};

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// One command to run in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRequest {
    /// Program and arguments.
    pub command: Vec<String>,
    /// Current directory of the child.
    pub working_dir: PathBuf,
    /// The only directory the child may write beneath; defaults to `working_dir`.
    pub writable_dir: Option<PathBuf>,
    /// Bytes fed to the child's stdin.
    pub stdin: Vec<u8>,
    /// Extra environment on top of the scrubbed base.
    pub env: Vec<(String, String)>,
}

impl SandboxRequest {
    pub fn new(command: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            working_dir: working_dir.into(),
            writable_dir: None,
            stdin: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = stdin.into();
        self
    }

    pub fn with_writable_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.writable_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn writable(&self) -> &std::path::Path {
        self.writable_dir.as_deref().unwrap_or(&self.working_dir)
    }

    fn validate(&self) -> SandboxResult<()> {
        if self.command.first().map_or(true, |p| p.is_empty()) {
            return Err(SandboxError::InvalidRequest("empty command".to_string()));
        }
        if !self.working_dir.is_dir() {
            return Err(SandboxError::InvalidRequest(format!(
                "working directory {} does not exist",
                self.working_dir.display()
            )));
        }
        if !self.writable().is_dir() {
            return Err(SandboxError::InvalidRequest(format!(
                "writable directory {} does not exist",
                self.writable().display()
            )));
        }
        Ok(())
    }
}

/// How a sandboxed run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    Exited { code: i32 },
    Signaled { signal: i32 },
    /// A limit was breached; the group may or may not have been killed by us.
    Killed { reason: KillReason },
}

/// Everything observed about one sandboxed run.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOutcome {
    pub termination: Termination,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub wall_time_ms: u64,
    pub peak_memory_bytes: u64,
    /// Process group the run used (the leader's pid).
    pub pgid: i32,
}

impl SandboxOutcome {
    pub fn limit_exceeded(&self) -> Option<LimitKind> {
        match self.termination {
            Termination::Killed {
                reason: KillReason::Time,
            } => Some(LimitKind::Time),
            Termination::Killed {
                reason: KillReason::Memory,
            } => Some(LimitKind::Memory),
            Termination::Killed {
                reason: KillReason::Output,
            } => Some(LimitKind::Output),
            _ => None,
        }
    }

    pub fn crashed_signal(&self) -> Option<i32> {
        match self.termination {
            Termination::Signaled { signal } => Some(signal),
            _ => None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.termination == Termination::Exited { code: 0 }
    }
}

/// What this sandbox can enforce on the current host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxCapabilities {
    pub mode: IsolationMode,
    pub landlock: LandlockSupport,
    pub process_groups: bool,
    /// Orphaned descendants are reparented to this host.
    pub subreaper: bool,
    /// Tree RSS accounting through `/proc`.
    pub memory_accounting: bool,
}

/// Narrow capability for running untrusted commands under limits.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    /// Run `request` under `limits`. Returns once the process and all its
    /// descendants are gone. Limit breaches are reported in the outcome;
    /// errors mean the run could not be carried out (or was cancelled).
    async fn run(
        &self,
        request: SandboxRequest,
        limits: &ResourceLimits,
        cancel: &CancelSignal,
    ) -> SandboxResult<SandboxOutcome>;

    fn capabilities(&self) -> SandboxCapabilities;
}

// ---------------------------------------------------------------------------
// Child-side limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChildLimits {
    cpu_secs: u64,
    address_space: Option<u64>,
    file_size: u64,
    processes: Option<u64>,
}

impl ChildLimits {
    fn for_run(limits: &ResourceLimits, settings: &SandboxSection) -> Self {
        let address_space = (settings.address_space_factor > 0.0)
            .then(|| (limits.memory_bytes() as f64 * settings.address_space_factor) as u64);
        Self {
            // backstop only: the wall timer normally fires first
            cpu_secs: limits.time_ms.div_ceil(1000) + 1,
            address_space,
            file_size: settings.max_file_bytes,
            processes: settings.max_processes,
        }
    }

    /// Apply in the child. Only `setrlimit` syscalls.
    fn apply(&self) -> std::io::Result<()> {
        fn rl(cur: u64, max: u64) -> libc::rlimit {
            libc::rlimit {
                rlim_cur: cur as libc::rlim_t,
                rlim_max: max as libc::rlim_t,
            }
        }
        // SAFETY: setrlimit only reads the passed struct.
        unsafe {
            if libc::setrlimit(libc::RLIMIT_CPU, &rl(self.cpu_secs, self.cpu_secs + 1)) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if let Some(bytes) = self.address_space {
                if libc::setrlimit(libc::RLIMIT_AS, &rl(bytes, bytes)) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            if libc::setrlimit(libc::RLIMIT_FSIZE, &rl(self.file_size, self.file_size)) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if let Some(n) = self.processes {
                if libc::setrlimit(libc::RLIMIT_NPROC, &rl(n, n)) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            if libc::setrlimit(libc::RLIMIT_CORE, &rl(0, 0)) != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct WaitStatus {
    status: libc::c_int,
    max_rss_kb: u64,
}

/// Blocking `wait4` on the group leader, retrying on EINTR.
fn wait_leader(pid: i32) -> std::io::Result<WaitStatus> {
    let mut status: libc::c_int = 0;
    // SAFETY: an all-zero rusage is a valid out-parameter.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: pointers are to live locals.
        let rc = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if rc == pid {
            return Ok(WaitStatus {
                status,
                max_rss_kb: usage.ru_maxrss.max(0) as u64,
            });
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn decode_status(status: libc::c_int) -> (Option<i32>, Option<i32>) {
    if libc::WIFEXITED(status) {
        (Some(libc::WEXITSTATUS(status)), None)
    } else if libc::WIFSIGNALED(status) {
        (None, Some(libc::WTERMSIG(status)))
    } else {
        (None, None)
    }
}

/// Kills the tree if the run future is dropped before completing.
struct TreeGuard {
    switch: Arc<KillSwitch>,
    armed: bool,
}

impl Drop for TreeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.switch.kill_tree();
        }
    }
}

fn classify_spawn_error(program: &str, err: std::io::Error) -> SandboxError {
    match err.raw_os_error() {
        Some(code) if code == libc::ENOTSUP || code == libc::EPERM => {
            return SandboxError::Unavailable(format!("sandbox setup failed in child: {err}"));
        }
        Some(code) if code == libc::EAGAIN || code == libc::ENOMEM => {
            return SandboxError::Unavailable(format!("cannot fork: {err}"));
        }
        _ => {}
    }
    match err.kind() {
        std::io::ErrorKind::NotFound => SandboxError::CommandNotFound(program.to_string()),
        std::io::ErrorKind::PermissionDenied => {
            SandboxError::CommandNotFound(format!("{program} (not executable)"))
        }
        _ => SandboxError::Unavailable(format!("spawn {program}: {err}")),
    }
}

fn spawn_capture<R>(
    reader: Option<R>,
    cap: u64,
    switch: &Arc<KillSwitch>,
) -> Option<JoinHandle<std::io::Result<Captured>>>
where
    R: std::io::Read + Send + 'static,
{
    reader.map(|r| {
        let switch = switch.clone();
        tokio::task::spawn_blocking(move || {
            read_capped(r, cap, move || {
                switch.trip(KillReason::Output);
            })
        })
    })
}

async fn join_capture(
    handle: Option<JoinHandle<std::io::Result<Captured>>>,
    timeout: Duration,
    stream: &'static str,
) -> Captured {
    let Some(handle) = handle else {
        return Captured::default();
    };
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(captured))) => captured,
        Ok(Ok(Err(e))) => {
            tracing::warn!(stream, error = %e, "failed to read sandbox output");
            Captured::default()
        }
        Ok(Err(e)) => {
            tracing::warn!(stream, error = %e, "sandbox output reader panicked");
            Captured::default()
        }
        Err(_) => {
            // an escaped process still holds the pipe open
            tracing::warn!(stream, "sandbox output pipe still open after reap timeout");
            Captured {
                bytes: Vec::new(),
                truncated: true,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessSandbox
// ---------------------------------------------------------------------------

/// The confinement strict mode needs but the host lacks. Every network
/// policy restricts TCP, so network support is always required.
fn strict_gap(support: LandlockSupport) -> Option<&'static str> {
    if !support.filesystem {
        Some("filesystem")
    } else if !support.network {
        Some("network")
    } else {
        None
    }
}

/// Host process sandbox (Linux).
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    settings: SandboxSection,
    support: LandlockSupport,
    subreaper: bool,
    page_size: u64,
}

impl ProcessSandbox {
    /// Probe the host and build a sandbox. In `strict` mode a host that
    /// cannot confine both writes and TCP is `Unavailable`.
    pub fn new(settings: SandboxSection) -> SandboxResult<Self> {
        let support = landlock::probe();
        if settings.mode == IsolationMode::Strict {
            if let Some(missing) = strict_gap(support) {
                return Err(SandboxError::Unavailable(format!(
                    "landlock {missing} confinement is not supported by this kernel"
                )));
            }
        }
        if !support.network {
            tracing::info!("landlock network confinement unavailable; TCP is not restricted");
        }
        let subreaper = tree::become_subreaper();
        if !subreaper {
            tracing::warn!("cannot become a child subreaper; orphaned descendants are tracked until reparented");
        }
        Ok(Self {
            settings,
            support,
            subreaper,
            page_size: proc::page_size(),
        })
    }

    async fn await_tree_exit(&self, switch: &KillSwitch, pgid: i32) {
        let deadline = Instant::now() + Duration::from_millis(self.settings.reap_timeout_ms);
        loop {
            let live = switch.kill_tree();
            if live.is_empty() {
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(pgid, survivors = ?live, "sandboxed processes survived reap timeout");
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl SandboxRunner for ProcessSandbox {
    async fn run(
        &self,
        request: SandboxRequest,
        limits: &ResourceLimits,
        cancel: &CancelSignal,
    ) -> SandboxResult<SandboxOutcome> {
        request.validate()?;
        if let Some(field) = limits.first_invalid() {
            return Err(SandboxError::InvalidRequest(format!("limit {field} must be positive")));
        }
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        let strict = self.settings.mode == IsolationMode::Strict;
        let mut enforcer = landlock::prepare(request.writable(), &limits.network, strict)?;
        let child_limits = ChildLimits::for_run(limits, &self.settings);
        let writable = request.writable().to_path_buf();
        let program = request.command[0].clone();
        let run_marker = uuid::Uuid::new_v4().simple().to_string();

        let mut cmd = std::process::Command::new(&program);
        cmd.args(&request.command[1..])
            .current_dir(&request.working_dir)
            .env_clear()
            .env(
                "PATH",
                std::env::var_os("PATH").unwrap_or_else(|| DEFAULT_PATH.into()),
            )
            .env("LANG", "C.UTF-8")
            .env("HOME", &writable)
            .env("TMPDIR", &writable)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(RUN_MARKER_VAR, &run_marker)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        // SAFETY: the closure runs between fork and exec. It only performs
        // setrlimit, prctl, and landlock syscalls on data prepared above.
        unsafe {
            cmd.pre_exec(move || {
                child_limits.apply()?;
                enforcer.enforce()
            });
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| classify_spawn_error(&program, e))?;
        drop(cmd);
        let pid = child.id() as i32;
        let pgid = pid;
        METRICS.inc_sandbox_runs();
        tracing::debug!(pid, program = %program, time_ms = limits.time_ms, memory_mb = limits.memory_mb, "sandbox run started");

        let switch = Arc::new(KillSwitch::new(ProcessTree::new(pid, &run_marker)));
        let mut guard = TreeGuard {
            switch: switch.clone(),
            armed: true,
        };

        let stdin_task = child.stdin.take().map(|writer| {
            let input = request.stdin.clone();
            tokio::task::spawn_blocking(move || feed_stdin(writer, &input))
        });
        let stdout_task = spawn_capture(child.stdout.take(), limits.output_bytes, &switch);
        let stderr_task = spawn_capture(child.stderr.take(), limits.output_bytes, &switch);

        let mut waiter = tokio::task::spawn_blocking(move || wait_leader(pid));
        let deadline = tokio::time::Instant::from_std(started + Duration::from_millis(limits.time_ms));
        let mut poll = tokio::time::interval(Duration::from_millis(self.settings.memory_poll_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let memory_limit = limits.memory_bytes();
        let mut peak_polled = 0u64;
        let mut time_tripped = false;
        let mut cancel_tripped = false;

        let waited = loop {
            tokio::select! {
                res = &mut waiter => break res,
                _ = tokio::time::sleep_until(deadline), if !time_tripped => {
                    time_tripped = true;
                    switch.trip(KillReason::Time);
                }
                _ = poll.tick() => {
                    let rss = switch.rss_bytes(self.page_size);
                    peak_polled = peak_polled.max(rss);
                    if rss > memory_limit {
                        switch.trip(KillReason::Memory);
                    }
                }
                _ = cancel.cancelled(), if !cancel_tripped => {
                    cancel_tripped = true;
                    switch.trip(KillReason::Cancelled);
                }
            }
        };
        let wall_time_ms = started.elapsed().as_millis() as u64;

        // the leader is reaped; take down whatever it left behind
        self.await_tree_exit(&switch, pgid).await;
        guard.armed = false;
        drop(guard);

        let reap_timeout = Duration::from_millis(self.settings.reap_timeout_ms);
        if let Some(task) = stdin_task {
            if let Ok(Ok(Err(e))) = tokio::time::timeout(reap_timeout, task).await {
                tracing::debug!(error = %e, "stdin feed failed");
            }
        }
        let stdout = join_capture(stdout_task, reap_timeout, "stdout").await;
        let stderr = join_capture(stderr_task, reap_timeout, "stderr").await;

        let wait = waited
            .map_err(|e| SandboxError::Unavailable(format!("wait task failed: {e}")))?
            .map_err(|e| SandboxError::Unavailable(format!("wait4 failed: {e}")))?;
        let (exit_code, signal) = decode_status(wait.status);
        let peak_memory_bytes = peak_polled.max(wait.max_rss_kb.saturating_mul(1024));

        let termination = match switch.reason() {
            Some(KillReason::Cancelled) => {
                tracing::debug!(pid, "sandbox run cancelled");
                return Err(SandboxError::Cancelled);
            }
            Some(reason) => Termination::Killed { reason },
            None if signal == Some(libc::SIGXCPU) || wall_time_ms > limits.time_ms => {
                Termination::Killed {
                    reason: KillReason::Time,
                }
            }
            None if peak_memory_bytes > memory_limit => Termination::Killed {
                reason: KillReason::Memory,
            },
            None => match (exit_code, signal) {
                (Some(code), _) => Termination::Exited { code },
                (None, Some(sig)) => Termination::Signaled { signal: sig },
                (None, None) => Termination::Signaled { signal: 0 },
            },
        };

        if let Termination::Killed { reason } = termination {
            METRICS.inc_sandbox_kills();
            obs::emit_sandbox_killed(pid, &reason.to_string(), wall_time_ms, peak_memory_bytes);
        }

        Ok(SandboxOutcome {
            termination,
            exit_code,
            signal,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            stdout: stdout.into_lossy_string(),
            stderr: stderr.into_lossy_string(),
            wall_time_ms,
            peak_memory_bytes,
            pgid,
        })
    }

    fn capabilities(&self) -> SandboxCapabilities {
        SandboxCapabilities {
            mode: self.settings.mode,
            landlock: self.support,
            process_groups: true,
            subreaper: self.subreaper,
            memory_accounting: std::path::Path::new("/proc/self/stat").exists(),
        }
    }
}
