//! Cancellable execution of external programs.
//!
//! The child runs in its own process group. Its output is drained on
//! detached reader threads while the calling thread polls for exit and for
//! cancellation. On cancel the whole group is killed, so helpers the child
//! forked cannot keep the run alive by holding its pipes open.

use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use layerpkg_common::cancel::CancelToken;
use layerpkg_common::error::{LayerpkgError, Result};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

/// How often a running child is checked for exit and cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: Vec<u8>,
    /// Standard error.
    pub stderr: Vec<u8>,
}

type Drained = Receiver<io::Result<Vec<u8>>>;

/// Runs `program` with `args` and extra `env`, capturing its output.
///
/// Standard input is closed. The child inherits the current environment
/// and leads a new process group.
///
/// # Errors
///
/// - `LayerpkgError::Io` if the program cannot be spawned.
/// - `LayerpkgError::Command` if it exits unsuccessfully.
/// - `LayerpkgError::Cancelled` if `cancel` fires before its output is
///   complete.
pub fn run_command(
    program: &str,
    args: &[String],
    env: &[(String, String)],
    cwd: Option<&Path>,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    cancel.check()?;
    tracing::debug!(program, args = ?args, "running command");

    let mut command = Command::new(program);
    let _ = command
        .args(args)
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    if let Some(dir) = cwd {
        let _ = command.current_dir(dir);
    }
    let mut child = command.spawn().map_err(|e| LayerpkgError::Io {
        path: program.into(),
        source: e,
    })?;
    let group = child.id();

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = wait_or_cancel(&mut child, program, cancel)?;
    let output = CommandOutput {
        stdout: collect(stdout, group, program, cancel)?,
        stderr: collect(stderr, group, program, cancel)?,
    };

    if !status.success() {
        tracing::warn!(
            program,
            %status,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "command failed"
        );
        return Err(LayerpkgError::Command {
            program: program.to_string(),
            status: status.to_string(),
        });
    }
    Ok(output)
}

fn wait_or_cancel(child: &mut Child, program: &str, cancel: &CancelToken) -> Result<ExitStatus> {
    let io_err = |e| LayerpkgError::Io {
        path: program.into(),
        source: e,
    };
    loop {
        if cancel.is_cancelled() {
            kill_group(child.id(), program);
            if let Err(e) = child.kill() {
                tracing::debug!(program, error = %e, "child already gone");
            }
            let _ = child.wait().map_err(io_err)?;
            return Err(LayerpkgError::Cancelled);
        }
        if let Some(status) = child.try_wait().map_err(io_err)? {
            return Ok(status);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Sends `SIGKILL` to the process group led by `group`.
fn kill_group(group: u32, program: &str) {
    tracing::info!(program, group, "cancelling command");
    let Ok(raw) = i32::try_from(group) else {
        tracing::warn!(program, group, "process group id out of range");
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // ESRCH: every member already exited
        tracing::debug!(program, group, error = %e, "failed to signal process group");
    }
}

/// Reads `pipe` to its end on a detached thread.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> Drained {
    let (tx, rx) = mpsc::channel();
    let _ = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let result = pipe.read_to_end(&mut buf).map(|_| buf);
        let _ = tx.send(result);
    });
    rx
}

/// Waits for a reader to finish. A descendant of the child may still hold
/// the pipe after the child exited, so cancellation is honoured here too.
fn collect(reader: Option<Drained>, group: u32, program: &str, cancel: &CancelToken) -> Result<Vec<u8>> {
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };
    loop {
        match reader.recv_timeout(POLL_INTERVAL) {
            Ok(result) => {
                return result.map_err(|e| LayerpkgError::Io {
                    path: program.into(),
                    source: e,
                });
            }
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    kill_group(group, program);
                    return Err(LayerpkgError::Cancelled);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(LayerpkgError::Command {
                    program: program.to_string(),
                    status: "output reader panicked".into(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".into(), script.into()]
    }

    #[test]
    fn run_command_captures_stdout_and_stderr() {
        let out = run_command(
            "sh",
            &sh("printf out; printf err >&2"),
            &[],
            None,
            &CancelToken::new(),
        )
        .expect("run");
        assert_eq!(out.stdout, b"out");
        assert_eq!(out.stderr, b"err");
    }

    #[test]
    fn run_command_passes_env_and_cwd() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = run_command(
            "sh",
            &sh("printf '%s:' \"$LAYERPKG_TEST\"; pwd"),
            &[("LAYERPKG_TEST".into(), "value".into())],
            Some(dir.path()),
            &CancelToken::new(),
        )
        .expect("run");
        let text = String::from_utf8(out.stdout).expect("utf8");
        let (value, cwd) = text.trim().split_once(':').expect("separator");
        assert_eq!(value, "value");
        assert_eq!(
            std::fs::canonicalize(cwd).expect("canonical cwd"),
            std::fs::canonicalize(dir.path()).expect("canonical dir")
        );
    }

    #[test]
    fn run_command_nonzero_exit_is_command_error() {
        let err = run_command("sh", &sh("exit 3"), &[], None, &CancelToken::new())
            .expect_err("should fail");
        match err {
            LayerpkgError::Command { program, status } => {
                assert_eq!(program, "sh");
                assert!(status.contains('3'), "status: {status}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn run_command_missing_program_is_io_error() {
        let result = run_command(
            "layerpkg-no-such-program",
            &[],
            &[],
            None,
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(LayerpkgError::Io { .. })));
    }

    #[test]
    fn run_command_kills_child_on_cancel() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        let started = Instant::now();
        let result = run_command("sleep", &["30".into()], &[], None, &cancel);
        canceller.join().expect("join");

        assert!(matches!(result, Err(LayerpkgError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    fn cancel_after(cancel: &CancelToken, delay: Duration) -> std::thread::JoinHandle<()> {
        let trigger = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            trigger.cancel();
        })
    }

    #[test]
    fn run_command_cancel_kills_forked_descendants() {
        let cancel = CancelToken::new();
        let canceller = cancel_after(&cancel, Duration::from_millis(200));

        let started = Instant::now();
        let result = run_command("sh", &sh("sleep 8; echo done"), &[], None, &cancel);
        canceller.join().expect("join");

        assert!(matches!(result, Err(LayerpkgError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }

    #[test]
    fn run_command_cancel_unblocks_pipe_held_by_background_job() {
        let cancel = CancelToken::new();
        let canceller = cancel_after(&cancel, Duration::from_millis(300));

        let started = Instant::now();
        let result = run_command("sh", &sh("sleep 8 & echo started"), &[], None, &cancel);
        canceller.join().expect("join");

        assert!(matches!(result, Err(LayerpkgError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    }

    #[test]
    fn run_command_already_cancelled_does_not_spawn() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = run_command("layerpkg-no-such-program", &[], &[], None, &cancel);
        assert!(matches!(result, Err(LayerpkgError::Cancelled)));
    }
}
