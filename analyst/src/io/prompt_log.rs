//! Append-only audit log of every rendered prompt.
//!
//! # Separation of Concerns
//!
//! - **Tracing (`logging`)**: dev diagnostics via `RUST_LOG`, stderr only.
//! - **Prompt log (this module)**: a product artifact on disk recording the
//!   exact text sent to the model, unaffected by `RUST_LOG`.
//!
//! Recording is best-effort: an I/O failure here must never break an
//! analysis, so errors are logged and swallowed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PromptLog {
    path: PathBuf,
}

impl PromptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one prompt under a named header with a UTC timestamp.
    pub fn record(&self, name: &str, content: &str) {
        if let Err(err) = self.append(name, content) {
            warn!(err = %err, path = %self.path.display(), "failed to record prompt");
        }
    }

    fn append(&self, name: &str, content: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(
            file,
            "{}\nTimestamp: {}\nPrompt: {}\n{}\n{}\n{}\n",
            "=".repeat(80),
            timestamp,
            name,
            "=".repeat(80),
            content,
            "=============================== End of Prompt ================================"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_named_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = PromptLog::new(temp.path().join("logs/prompts.log"));
        log.record("planner", "first prompt");
        log.record("worker", "second prompt");

        let contents =
            fs::read_to_string(temp.path().join("logs/prompts.log")).expect("read log");
        assert!(contents.contains("Prompt: planner"));
        assert!(contents.contains("first prompt"));
        let planner = contents.find("Prompt: planner").expect("planner entry");
        let worker = contents.find("Prompt: worker").expect("worker entry");
        assert!(planner < worker);
    }

    #[test]
    fn record_swallows_io_failures() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A directory at the log path makes the open fail.
        let path = temp.path().join("prompts.log");
        fs::create_dir_all(&path).expect("blocking dir");
        let log = PromptLog::new(&path);
        log.record("planner", "ignored");
    }
}
