//! Child process invocation with a timeout and bounded output capture.

use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run `cmd`, feed `stdin`, and collect stdout/stderr until exit or `timeout`.
///
/// The prompt is written and both pipes are drained on helper threads, so the
/// timeout holds even when the child never reads its input. At most
/// `output_limit_bytes` per stream are kept; the rest is counted in
/// `*_truncated`. A child that outlives `timeout` is killed and reported with
/// `timed_out = true`.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let program = cmd.get_program().to_os_string();
    debug!(?program, "spawning backend command");
    let mut child = cmd.spawn().map_err(|err| {
        error!(%err, ?program, "failed to spawn command");
        anyhow!(err).context(format!("spawn {program:?}"))
    })?;

    let stdout = child.stdout.take().context("stdout was not piped")?;
    let stderr = child.stderr.take().context("stderr was not piped")?;
    let stdout_reader = thread::spawn(move || drain_limited(stdout, output_limit_bytes));
    let stderr_reader = thread::spawn(move || drain_limited(stderr, output_limit_bytes));

    let writer = match stdin {
        Some(input) => {
            let mut pipe = child.stdin.take().context("stdin was not piped")?;
            let input = input.to_vec();
            Some(thread::spawn(move || {
                // The exit status decides the outcome when the child stops reading early.
                if let Err(err) = pipe.write_all(&input) {
                    warn!(%err, "child closed stdin before reading the full prompt");
                }
            }))
        }
        None => None,
    };

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    if let Some(writer) = writer
        && writer.join().is_err()
    {
        return Err(anyhow!("stdin writer thread panicked"));
    }
    let (stdout, stdout_truncated) = join_reader(stdout_reader, "stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_reader, "stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

type Drained = io::Result<(Vec<u8>, usize)>;

fn join_reader(handle: thread::JoinHandle<Drained>, stream: &str) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("{stream} reader thread panicked"))?
        .with_context(|| format!("read {stream}"))
}

/// Keep the first `limit` bytes of `reader` and count the rest.
fn drain_limited<R: Read>(reader: R, limit: usize) -> Drained {
    let mut kept = Vec::new();
    let mut head = reader.take(limit as u64);
    head.read_to_end(&mut kept)?;
    let dropped = io::copy(&mut head.into_inner(), &mut io::sink())?;
    Ok((kept, dropped as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdin_round_trip_through_child() {
        let output = run_command_with_timeout(
            sh("tr a-z A-Z"),
            Some(b"prompt".as_slice()),
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert!(output.status.success());
        assert_eq!(output.stdout_lossy(), "PROMPT");
        assert!(!output.timed_out);
    }

    #[test]
    fn truncates_output_beyond_limit() {
        let output =
            run_command_with_timeout(sh("printf 'abcdef'"), None, Duration::from_secs(5), 4)
                .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 2);
    }

    #[test]
    fn unread_stdin_does_not_block_timeout() {
        let prompt = vec![b'x'; 1 << 20];
        let output = run_command_with_timeout(
            sh("exec sleep 5"),
            Some(prompt.as_slice()),
            Duration::from_millis(100),
            64,
        )
        .expect("run");
        assert!(output.timed_out);
    }

    #[test]
    fn kills_child_after_timeout() {
        let output = run_command_with_timeout(sh("exec sleep 5"), None, Duration::from_millis(100), 64)
            .expect("run");
        assert!(output.timed_out);
        assert!(!output.status.success());
    }
}
