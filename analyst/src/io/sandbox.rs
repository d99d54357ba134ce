//! Stateful code sandbox backed by a child interpreter process.
//!
//! The [`Sandbox`] trait decouples step execution from the interpreter
//! backend. Tests use scripted sandboxes that return predetermined outputs
//! without spawning processes.
//!
//! The production implementation runs an embedded driver script inside
//! `python3`: requests are newline-framed JSON on stdin, and each cell
//! answers with a single marker line on stdout carrying the captured
//! stdout/stderr. Variables persist across cells, which is what makes plans
//! whose later steps build on earlier ones possible.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::{TableSummaries, TableSummary};
use crate::io::config::SandboxConfig;

const DRIVER_SCRIPT: &str = include_str!("py/driver.py");
const INTROSPECT_SCRIPT: &str = include_str!("py/introspect.py");

/// Marker printed by the driver when the interpreter is ready for cells.
const READY_MARKER: &str = "__KERNEL_READY__";
/// Marker prefixing each cell-completion line.
const CELL_DONE_MARKER: &str = "__CELL_DONE__:";
/// Marker prefixing the introspection payload inside captured stdout.
pub const STATE_UPDATE_MARKER: &str = "__STATE_UPDATE__:";

/// Captured output of one code execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Abstraction over stateful code-execution backends.
pub trait Sandbox {
    /// Run one code cell to completion and capture its output. A timeout is
    /// reported through the error channel, not as `Err`; `Err` means the
    /// sandbox itself is unusable.
    fn run_code(&mut self, code: &str) -> Result<ExecOutput>;

    /// Re-derive summaries for every tabular variable currently held by
    /// the execution environment.
    fn table_summaries(&mut self) -> Result<TableSummaries>;

    /// Release the sandbox's resources. Idempotent.
    fn shutdown(&mut self) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct CellDone {
    id: u64,
    stdout: String,
    stderr: String,
}

/// Sandbox hosted by a long-lived `python3` child process.
pub struct PythonSandbox {
    child: Child,
    stdin: Option<ChildStdin>,
    events: Receiver<String>,
    exec_timeout: Duration,
    shutdown_timeout: Duration,
    next_id: u64,
    shut_down: bool,
}

impl PythonSandbox {
    /// Spawn the interpreter and wait for it to report readiness.
    #[instrument(skip_all, fields(python = %cfg.python_bin))]
    pub fn spawn(cfg: &SandboxConfig) -> Result<Self> {
        let mut child = Command::new(&cfg.python_bin)
            .arg("-u")
            .arg("-c")
            .arg(DRIVER_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn sandbox interpreter '{}'", cfg.python_bin))?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;

        let (tx, events) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        // Drain interpreter-level stderr so the pipe never fills; cell
        // errors travel inside the completion payload instead.
        thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                warn!(line = %line, "sandbox interpreter stderr");
            }
        });

        let mut sandbox = Self {
            child,
            stdin: Some(stdin),
            events,
            exec_timeout: Duration::from_secs(cfg.exec_timeout_secs),
            shutdown_timeout: Duration::from_secs(cfg.shutdown_timeout_secs),
            next_id: 0,
            shut_down: false,
        };

        if let Err(err) = sandbox.await_ready(Duration::from_secs(cfg.startup_timeout_secs)) {
            let _ = sandbox.shutdown();
            return Err(err);
        }
        info!("sandbox interpreter ready");
        Ok(sandbox)
    }

    fn await_ready(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(line) if line.trim() == READY_MARKER => return Ok(()),
                Ok(line) => debug!(line = %line, "ignoring pre-ready output"),
                Err(RecvTimeoutError::Timeout) => {
                    bail!("sandbox interpreter did not become ready within {:?}", timeout)
                }
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("sandbox interpreter exited before becoming ready")
                }
            }
        }
    }
}

impl Sandbox for PythonSandbox {
    #[instrument(skip_all, fields(code_bytes = code.len()))]
    fn run_code(&mut self, code: &str) -> Result<ExecOutput> {
        if self.shut_down {
            bail!("sandbox is shut down");
        }
        self.next_id += 1;
        let id = self.next_id;
        let request = json!({"id": id, "code": code}).to_string();
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("sandbox stdin already closed"))?;
        writeln!(stdin, "{}", request).context("write cell to sandbox")?;
        stdin.flush().context("flush cell to sandbox")?;

        let deadline = Instant::now() + self.exec_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(line) => {
                    let Some(payload) = line.strip_prefix(CELL_DONE_MARKER) else {
                        debug!(line = %line, "ignoring stray sandbox output");
                        continue;
                    };
                    let done: CellDone = serde_json::from_str(payload)
                        .context("parse sandbox completion payload")?;
                    if done.id != id {
                        // Late answer from a cell we already gave up on.
                        debug!(stale = done.id, current = id, "dropping stale completion");
                        continue;
                    }
                    debug!(
                        stdout_bytes = done.stdout.len(),
                        stderr_bytes = done.stderr.len(),
                        "cell finished"
                    );
                    return Ok(ExecOutput {
                        stdout: done.stdout,
                        stderr: done.stderr,
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(timeout_secs = self.exec_timeout.as_secs(), "cell timed out");
                    return Ok(ExecOutput {
                        stdout: String::new(),
                        stderr: format!(
                            "execution timed out after {}s",
                            self.exec_timeout.as_secs()
                        ),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("sandbox interpreter closed its output stream")
                }
            }
        }
    }

    fn table_summaries(&mut self) -> Result<TableSummaries> {
        let output = self.run_code(INTROSPECT_SCRIPT)?;
        if !output.stderr.is_empty() {
            warn!(stderr = %output.stderr, "table introspection reported errors");
            return Ok(TableSummaries::new());
        }
        match parse_state_update(&output.stdout) {
            Some(summaries) => Ok(summaries),
            None => {
                warn!("table introspection produced no parseable payload");
                Ok(TableSummaries::new())
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        // Closing stdin ends the driver's read loop; give it a moment to
        // exit cleanly before killing.
        drop(self.stdin.take());
        match self
            .child
            .wait_timeout(self.shutdown_timeout)
            .context("wait for sandbox exit")?
        {
            Some(status) => debug!(exit_code = ?status.code(), "sandbox exited"),
            None => {
                warn!("sandbox did not exit in time, killing");
                self.child.kill().context("kill sandbox")?;
                self.child.wait().context("wait sandbox after kill")?;
            }
        }
        info!("sandbox shutdown complete");
        Ok(())
    }
}

impl Drop for PythonSandbox {
    fn drop(&mut self) {
        if !self.shut_down {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Locate and parse the introspection payload behind its marker.
pub fn parse_state_update(stdout: &str) -> Option<TableSummaries> {
    let payload = stdout
        .lines()
        .find_map(|line| line.strip_prefix(STATE_UPDATE_MARKER))?;
    match serde_json::from_str::<BTreeMap<String, TableSummary>>(payload) {
        Ok(summaries) => Some(summaries),
        Err(err) => {
            warn!(err = %err, "failed to decode table summaries payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_state_update_finds_the_marker_line() {
        let stdout = "noise\n__STATE_UPDATE__:{\"sales\": {\"shape\": [2, 1], \
                      \"columns_and_dtypes\": {\"a\": \"int64\"}, \"head_sample\": \"a\\n1\\n\"}}\n";
        let summaries = parse_state_update(stdout).expect("payload");
        assert_eq!(summaries.len(), 1);
        assert!(matches!(
            summaries.get("sales"),
            Some(TableSummary::Profile { shape: (2, 1), .. })
        ));
    }

    #[test]
    fn parse_state_update_decodes_per_variable_errors() {
        let stdout = "__STATE_UPDATE__:{\"broken\": {\"error\": \"cannot profile\"}}";
        let summaries = parse_state_update(stdout).expect("payload");
        assert_eq!(
            summaries.get("broken"),
            Some(&TableSummary::Failed {
                error: "cannot profile".to_string()
            })
        );
    }

    #[test]
    fn parse_state_update_rejects_missing_or_bad_payloads() {
        assert!(parse_state_update("plain output, no marker").is_none());
        assert!(parse_state_update("__STATE_UPDATE__:not json").is_none());
    }

    #[test]
    fn cell_done_payload_round_trips() {
        let done: CellDone =
            serde_json::from_str(r#"{"id": 3, "stdout": "ok\n", "stderr": ""}"#).expect("parse");
        assert_eq!(done.id, 3);
        assert_eq!(done.stdout, "ok\n");
        assert!(done.stderr.is_empty());
    }
}
