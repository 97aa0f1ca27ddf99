use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use batchgen_core::{EntryId, ExecutorReport};
use tracing::{debug, warn};

use crate::{ExecError, RecipeExecutor};

const DEFAULT_POLL: Duration = Duration::from_millis(50);

/// Runs an external program once per package and reads its structured report
/// from stdout.
///
/// The report is the last stdout line that parses as an [`ExecutorReport`]
/// JSON object. Any other output is ignored, as is the exit code.
///
/// Argument placeholders: `{source}` (full id), `{ecosystem}`, `{name}`.
#[derive(Clone, Debug)]
pub struct SubprocessExecutor {
    pub program: String,
    pub args: Vec<String>,
    pub poll_interval: Duration,
}

impl SubprocessExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args, poll_interval: DEFAULT_POLL }
    }

    fn render_args(&self, package: &EntryId) -> Vec<String> {
        self.args
            .iter()
            .map(|a| {
                a.replace("{source}", package.as_str())
                    .replace("{ecosystem}", package.ecosystem())
                    .replace("{name}", package.name())
            })
            .collect()
    }

    fn io_error(&self, source: std::io::Error) -> ExecError {
        ExecError::Io { program: self.program.clone(), source }
    }
}

impl RecipeExecutor for SubprocessExecutor {
    fn execute(&self, package: &EntryId, timeout: Duration) -> Result<ExecutorReport, ExecError> {
        let mut child = Command::new(&self.program)
            .args(self.render_args(package))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecError::Spawn { program: self.program.clone(), source })?;

        // drain both pipes so a chatty child cannot block on a full buffer
        let (tx, rx) = mpsc::channel();
        let mut readers = 0;
        if let Some(s) = child.stdout.take() {
            spawn_drain(Pipe::Stdout, s, tx.clone());
            readers += 1;
        }
        if let Some(s) = child.stderr.take() {
            spawn_drain(Pipe::Stderr, s, tx.clone());
            readers += 1;
        }
        drop(tx);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait().map_err(|e| self.io_error(e))? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!(package = %package, timeout_secs = timeout.as_secs(), "executor exceeded deadline; killed");
                    // reader threads finish on their own once the pipes close
                    return Ok(ExecutorReport::deadline_exceeded(timeout.as_secs()));
                }
                None => thread::sleep(self.poll_interval),
            }
        };

        // a background process left behind by the child can hold the pipes
        // open; the deadline bounds the drain as well
        let (mut out, mut err) = (Vec::new(), Vec::new());
        while readers > 0 {
            match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok((Pipe::Stdout, buf)) => out = buf,
                Ok((Pipe::Stderr, buf)) => err = buf,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(package = %package, timeout_secs = timeout.as_secs(), "executor output still open at deadline");
                    return Ok(ExecutorReport::deadline_exceeded(timeout.as_secs()));
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
            readers -= 1;
        }
        if !err.is_empty() {
            debug!(package = %package, stderr = %String::from_utf8_lossy(&err).trim_end(), "executor stderr");
        }

        parse_report(&out).ok_or(ExecError::MalformedReport { program: self.program.clone(), exit_code: status.code() })
    }
}

#[derive(Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

fn spawn_drain(pipe: Pipe, r: impl Read + Send + 'static, tx: mpsc::Sender<(Pipe, Vec<u8>)>) {
    thread::spawn(move || {
        let _ = tx.send((pipe, drain(r)));
    });
}

fn drain(mut r: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = r.read_to_end(&mut buf);
    buf
}

fn parse_report(stdout: &[u8]) -> Option<ExecutorReport> {
    String::from_utf8_lossy(stdout)
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str(l).ok())
}
