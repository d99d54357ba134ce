//! Agent configuration stored in a TOML file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Top-level configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalystConfig {
    /// Upper bound on plan-execute-validate cycles per request.
    pub max_analysis_cycles: u32,

    /// Upper bound on worker attempts per plan step.
    pub worker_max_retries: u32,

    /// Directory input files are copied into and code runs against.
    pub workspace_dir: PathBuf,

    /// Append-only audit log of every rendered prompt.
    pub prompt_log_path: PathBuf,

    pub model: ModelConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Chat-completions endpoint (OpenAI-compatible).
    pub base_url: String,

    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Per-request wall-clock budget in seconds.
    pub request_timeout_secs: u64,

    /// Additional attempts after the first on transport or retryable
    /// HTTP failures.
    pub max_retries: u32,

    /// Constant delay between attempts in milliseconds.
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter binary used to host the stateful sandbox.
    pub python_bin: String,

    /// Seconds to wait for the interpreter to report readiness.
    pub startup_timeout_secs: u64,

    /// Seconds to wait for one code cell to finish before the call is
    /// treated as aborted.
    pub exec_timeout_secs: u64,

    /// Seconds to wait for a clean interpreter exit before killing it.
    pub shutdown_timeout_secs: u64,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            max_analysis_cycles: 3,
            worker_max_retries: 3,
            workspace_dir: PathBuf::from("./workspace"),
            prompt_log_path: PathBuf::from("logs/prompts.log"),
            model: ModelConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            model: "qwen3-max".to_string(),
            api_key_env: "ANALYST_API_KEY".to_string(),
            request_timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 1500,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            startup_timeout_secs: 60,
            exec_timeout_secs: 60,
            shutdown_timeout_secs: 5,
        }
    }
}

impl AnalystConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_analysis_cycles == 0 {
            return Err(anyhow!("max_analysis_cycles must be > 0"));
        }
        if self.worker_max_retries == 0 {
            return Err(anyhow!("worker_max_retries must be > 0"));
        }
        if self.model.model.trim().is_empty() {
            return Err(anyhow!("model.model must be non-empty"));
        }
        if self.model.base_url.trim().is_empty() {
            return Err(anyhow!("model.base_url must be non-empty"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        if self.sandbox.python_bin.trim().is_empty() {
            return Err(anyhow!("sandbox.python_bin must be non-empty"));
        }
        if self.sandbox.exec_timeout_secs == 0 || self.sandbox.startup_timeout_secs == 0 {
            return Err(anyhow!("sandbox timeouts must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AnalystConfig::default()`.
pub fn load_config(path: &Path) -> Result<AnalystConfig> {
    if !path.exists() {
        let cfg = AnalystConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AnalystConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AnalystConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AnalystConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("analyst.toml");
        let cfg = AnalystConfig {
            max_analysis_cycles: 5,
            model: ModelConfig {
                model: "qwen3-plus".to_string(),
                ..ModelConfig::default()
            },
            ..AnalystConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let cfg = AnalystConfig {
            max_analysis_cycles: 0,
            ..AnalystConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = AnalystConfig {
            sandbox: SandboxConfig {
                exec_timeout_secs: 0,
                ..SandboxConfig::default()
            },
            ..AnalystConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
