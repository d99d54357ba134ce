//! Workspace directory for input files and sandbox-relative I/O.
//!
//! Input tables are copied here at startup, and every code cell sent to the
//! sandbox is prefixed with a directory change to this path so relative
//! file references inside generated code resolve correctly.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Create (if needed) and open the workspace directory.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create workspace directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy user-supplied CSV files into the workspace.
    ///
    /// Missing or non-CSV paths are skipped with a warning, not an error.
    /// Returns the file names that landed in the workspace.
    pub fn import_tables(&self, paths: &[PathBuf]) -> Result<Vec<String>> {
        let mut imported = Vec::new();
        for path in paths {
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("csv") {
                warn!(path = %path.display(), "skipping input: not an existing CSV file");
                continue;
            }
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("input path has no usable file name: {}", path.display()))?
                .to_string();
            fs::copy(path, self.dir.join(&file_name))
                .with_context(|| format!("copy {} into workspace", path.display()))?;
            imported.push(file_name);
        }
        Ok(imported)
    }

    /// File names currently in the workspace, sorted for deterministic
    /// prompt rendering. A missing directory yields an empty list.
    pub fn list_files(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut files: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        files.sort();
        files
    }

    /// Code prefix that moves the sandbox into the workspace before user
    /// code runs, so relative paths resolve against copied inputs.
    pub fn chdir_prelude(&self) -> String {
        let path = std::path::absolute(&self.dir)
            .unwrap_or_else(|_| self.dir.clone())
            .display()
            .to_string()
            .replace('\\', "/");
        format!("import os\nos.chdir('{}')\n", path)
    }
}

/// Derive a valid identifier for the table loaded from `file_name`:
/// the file stem with non-alphanumeric characters replaced by `_`, and a
/// leading `_` when the stem does not start with a letter.
pub fn table_identifier(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let needs_prefix = name
        .chars()
        .next()
        .is_none_or(|c| !c.is_alphabetic() && c != '_');
    if needs_prefix {
        name.insert(0, '_');
    }
    name
}
