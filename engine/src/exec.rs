//! Shell command execution
//!
//! Runs one command through the host shell with a working directory, a
//! timeout, and capped output capture. A non-zero exit is a normal outcome,
//! never an error; callers inspect [`CommandOutcome`].

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

/// Maximum bytes captured per stream before truncation.
pub const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;

/// Marker appended to a stream that exceeded [`MAX_CAPTURE_BYTES`].
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Grace period between SIGTERM and SIGKILL on timeout.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Outcome of one command execution.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// stdout and stderr concatenated, for parsers that accept either.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    fn spawn_failure(message: String) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("spawn failed: {message}"),
            exit_code: -1,
            timed_out: false,
        }
    }
}

/// Run `command` via `sh -c` in `cwd`, waiting at most `timeout`.
///
/// On timeout the process group receives SIGTERM, then SIGKILL after a grace
/// period, and `timed_out` is set. A missing binary surfaces as `exit_code =
/// -1` with a synthetic stderr line. The command string is passed to the
/// shell as-is; callers are responsible for quoting.
pub async fn run_command(command: &str, cwd: &Path, timeout: Duration) -> CommandOutcome {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // New process group so a timeout kills the whole tree, not just the
    // shell (which would orphan its children).
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return CommandOutcome::spawn_failure(e.to_string()),
    };

    let stdout_pipe = child.stdout.take().expect("stdout piped");
    let stderr_pipe = child.stderr.take().expect("stderr piped");
    let stdout_task = tokio::spawn(read_capped(stdout_pipe));
    let stderr_task = tokio::spawn(read_capped(stderr_pipe));

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
        Ok(Err(e)) => {
            tracing::warn!(command, error = %e, "failed to wait on child");
            (-1, false)
        }
        Err(_) => {
            tracing::warn!(command, timeout_ms = timeout.as_millis() as u64, "command timed out");
            terminate_then_kill(&mut child).await;
            (-1, true)
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    CommandOutcome {
        stdout,
        stderr,
        exit_code,
        timed_out,
    }
}

/// SIGTERM the process group, wait out the grace period, then SIGKILL.
async fn terminate_then_kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: kill() is async-signal-safe. Negative PID targets the
        // process group created by process_group(0).
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
    }

    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

/// Read a stream to EOF, keeping at most [`MAX_CAPTURE_BYTES`].
///
/// The stream is drained past the cap so the child never blocks on a full
/// pipe; the excess is discarded and the truncation marker appended.
async fn read_capped<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < MAX_CAPTURE_BYTES {
                    let take = n.min(MAX_CAPTURE_BYTES - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }

    let mut out = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        out.push_str(TRUNCATION_MARKER);
    }
    out
}
