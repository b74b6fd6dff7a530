//! Launches a guest under resource limits and guarantees it is reaped
//! within a bounded wall-clock time.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::{setpgid, Pid};
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::{self, JoinHandle};
use tokio::time::{self, Duration};
use tracing::{debug, error, warn};

use crate::{error::Error, limits::ProcessLimits};

/// How long pipe readers may keep draining after the guest was reaped.
/// Bounds the call even when a descendant keeps the pipes open.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Everything needed to launch the interpreter on a guest program.
#[derive(Debug, Clone)]
pub struct GuestCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    pub work_dir: PathBuf,
}

/// Supervisor lifecycle for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Spawning,
    Running,
    Reaping,
    Finished,
}

/// Which side of the race ended the running phase.
#[derive(Debug)]
enum Exit {
    /// The guest exited. Carries the status only when the exit was observed
    /// by reaping it.
    Natural(Option<ExitStatus>),
    Watchdog,
}

/// Bytes read from one guest pipe.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Output beyond the capture limit was discarded
    pub truncated: bool,
}

impl Captured {
    pub fn to_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str("\n[output truncated]");
        }
        text
    }
}

/// A reaped guest.
#[derive(Debug)]
pub struct GuestOutcome {
    pub status: ExitStatus,
    /// The watchdog killed the guest
    pub timed_out: bool,
    pub stdout: Captured,
    pub stderr: Captured,
    pub wall_time: Duration,
}

pub struct Supervisor {
    limits: Arc<dyn ProcessLimits>,
    wall_clock_timeout: Duration,
    max_output: usize,
    phase: Phase,
}

impl Supervisor {
    pub fn new(
        limits: Arc<dyn ProcessLimits>,
        wall_clock_timeout: Duration,
        max_output: usize,
    ) -> Self {
        Self {
            limits,
            wall_clock_timeout,
            max_output,
            phase: Phase::Idle,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            !(self.phase == Phase::Reaping && next == Phase::Running),
            "supervisor re-entered running after reaping"
        );
        debug!("Supervisor phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Spawn the guest, race it against the watchdog and reap it.
    ///
    /// Returns `Err` only for infrastructure faults. Every path that got as
    /// far as spawning reaps the child before returning, except when the
    /// wait itself fails, where `kill_on_drop` hands the child to tokio's
    /// orphan reaper. Whatever is left in the guest's process group is
    /// killed before the leader is reaped, whether it exited or timed out.
    pub async fn run(mut self, command: &GuestCommand) -> Result<GuestOutcome, Error> {
        self.advance(Phase::Spawning);
        let started = Instant::now();

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .env_clear()
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&command.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limits = Arc::clone(&self.limits);
        unsafe {
            process.pre_exec(move || {
                // Own process group, so the supervisor can take down anything
                // the guest forks.
                setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
                limits.apply()
            });
        }

        let mut child = process.spawn().map_err(|e| {
            error!("Failed to spawn {}: {}", command.program.display(), e);
            Error::Spawn(format!("{}: {}", command.program.display(), e))
        })?;
        let pid = child.id();
        debug!("Spawned guest pid {:?}", pid);

        let stdout = spawn_capture(child.stdout.take(), self.max_output);
        let stderr = spawn_capture(child.stderr.take(), self.max_output);

        self.advance(Phase::Running);
        let exit = tokio::select! {
            // Prefer a natural exit when both are ready.
            biased;
            exited = wait_for_exit(&mut child) => Exit::Natural(exited.map_err(|e| {
                error!("Failed to wait for guest: {}", e);
                Error::Sandbox(format!("Failed to wait for guest process: {}", e))
            })?),
            _ = time::sleep(self.wall_clock_timeout) => Exit::Watchdog,
        };

        self.advance(Phase::Reaping);
        let (reaped, timed_out) = match exit {
            Exit::Natural(reaped) => (reaped, false),
            Exit::Watchdog => {
                warn!(
                    "Guest exceeded wall-clock timeout of {} ms, killing",
                    self.wall_clock_timeout.as_millis()
                );
                (None, true)
            }
        };

        let status = match reaped {
            Some(status) => status,
            None => {
                // The leader is unreaped, so its pid and group still belong
                // to us. This also takes down anything the guest left running.
                let group_killed = pid
                    .map(|pid| killpg(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok())
                    .unwrap_or(false);
                if !group_killed && timed_out {
                    if let Err(e) = child.start_kill() {
                        debug!("Guest was already gone when killed: {}", e);
                    }
                }
                child.wait().await.map_err(|e| {
                    error!("Failed to reap guest: {}", e);
                    Error::Sandbox(format!("Failed to reap guest process: {}", e))
                })?
            }
        };
        let wall_time = started.elapsed();

        let deadline = time::Instant::now() + OUTPUT_GRACE;
        let (stdout, stderr) = tokio::join!(stdout.finish(deadline), stderr.finish(deadline));
        self.advance(Phase::Finished);

        debug!(
            "Guest finished with {} after {} ms (timed out: {})",
            status,
            wall_time.as_millis(),
            timed_out
        );

        Ok(GuestOutcome {
            status,
            timed_out,
            stdout,
            stderr,
            wall_time,
        })
    }
}

/// Exit of the guest observed without reaping it. The zombie keeps the pid
/// and process group reserved until the caller reaps.
#[cfg(target_os = "linux")]
async fn wait_for_exit(child: &mut Child) -> io::Result<Option<ExitStatus>> {
    use nix::errno::Errno;
    use nix::sys::wait::{waitid, Id, WaitPidFlag};

    let Some(pid) = child.id() else {
        return child.wait().await.map(Some);
    };
    let pid = Pid::from_raw(pid as i32);
    task::spawn_blocking(move || loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Err(Errno::EINTR) => continue,
            other => return other.map(|_| ()),
        }
    })
    .await
    .map_err(io::Error::other)??;
    Ok(None)
}

/// Reaps the guest. Without a non-reaping wait the group cannot be
/// signalled safely once the leader is gone.
#[cfg(not(target_os = "linux"))]
async fn wait_for_exit(child: &mut Child) -> io::Result<Option<ExitStatus>> {
    child.wait().await.map(Some)
}

/// Reader for one guest pipe. Bytes land in a shared buffer so they
/// survive the reader being abandoned.
struct CaptureTask {
    buffer: Arc<Mutex<Captured>>,
    handle: JoinHandle<()>,
}

impl CaptureTask {
    /// Waits for the pipe to close until `deadline`, then returns whatever
    /// was read. A reader still running at the deadline is aborted and the
    /// result marked truncated.
    async fn finish(mut self, deadline: time::Instant) -> Captured {
        let abandoned = match time::timeout_at(deadline, &mut self.handle).await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                warn!("Output reader failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Guest output still open after exit, abandoning reader");
                self.handle.abort();
                true
            }
        };
        let mut captured = std::mem::take(&mut *self.buffer.lock().await);
        captured.truncated |= abandoned;
        captured
    }
}

fn spawn_capture<R>(reader: Option<R>, limit: usize) -> CaptureTask
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(Captured::default()));
    let sink = Arc::clone(&buffer);
    let handle = tokio::spawn(async move {
        if let Some(reader) = reader {
            capture(reader, limit, &sink).await;
        }
    });
    CaptureTask { buffer, handle }
}

/// Reads a pipe to EOF, keeping at most `limit` bytes. The rest is drained
/// so the guest never blocks on a full pipe.
async fn capture<R: AsyncRead + Unpin>(mut reader: R, limit: usize, sink: &Mutex<Captured>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let mut captured = sink.lock().await;
                let room = limit.saturating_sub(captured.bytes.len());
                let kept = n.min(room);
                captured.bytes.extend_from_slice(&buf[..kept]);
                if kept < n {
                    captured.truncated = true;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Failed to read guest output: {}", e);
                break;
            }
        }
    }
}
