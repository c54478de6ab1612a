//! wfgen configuration stored under `.wfgen/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::LoopMode;

/// Placeholder in the judgment command replaced with the verdict schema path.
pub const SCHEMA_PLACEHOLDER: &str = "{schema}";

/// wfgen configuration (TOML).
///
/// Edited by humans; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WfgenConfig {
    /// Regenerate automatically (`auto`) or ask an operator first (`gated`).
    pub mode: LoopMode,

    /// YAML rule set embedded in both the generation and judgment prompts.
    pub rules_path: PathBuf,

    /// Role line placed at the top of every generation prompt.
    pub role: String,

    /// Output-token ceiling passed to the generation backend on every call.
    pub max_output_tokens: u32,

    /// Abort after this many generations. Unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,

    pub generation: BackendConfig,
    pub judgment: BackendConfig,
    pub continuation: ContinuationConfig,
    pub operator: OperatorConfig,
}

/// How to invoke one backend command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Program and arguments; the prompt is written to stdin.
    pub command: Vec<String>,
    /// Per-call wall-clock limit in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    #[serde(default = "default_output_limit_bytes")]
    pub output_limit_bytes: usize,
}

impl BackendConfig {
    fn with_command(command: &[&str]) -> Self {
        Self {
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout_secs: default_timeout_secs(),
            output_limit_bytes: default_output_limit_bytes(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, table: &str) -> Result<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(anyhow!("{table}.command must be a non-empty array"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("{table}.timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("{table}.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    10 * 60
}

fn default_output_limit_bytes() -> usize {
    1_000_000
}

/// Retry policy for context-length interruptions during generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContinuationConfig {
    /// Continuation calls allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first continuation; doubles on each further one.
    pub base_backoff_ms: u64,
    /// Upper bound for the doubling delay.
    pub max_backoff_ms: u64,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            base_backoff_ms: 250,
            max_backoff_ms: 4_000,
        }
    }
}

impl ContinuationConfig {
    /// Delay before continuation number `attempt` (1-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OperatorConfig {
    /// How long a channel-driven gate waits for a decision. Waits forever when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl OperatorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for WfgenConfig {
    fn default() -> Self {
        Self {
            mode: LoopMode::Auto,
            rules_path: PathBuf::from(".wfgen/rules.yml"),
            role: "You are an expert in generating Dify workflows.".to_string(),
            max_output_tokens: 8192,
            max_iterations: None,
            generation: BackendConfig::with_command(&[
                "codex",
                "exec",
                "--skip-git-repo-check",
                "-",
            ]),
            judgment: BackendConfig::with_command(&[
                "codex",
                "exec",
                "--skip-git-repo-check",
                "--output-schema",
                SCHEMA_PLACEHOLDER,
                "-",
            ]),
            continuation: ContinuationConfig::default(),
            operator: OperatorConfig::default(),
        }
    }
}

impl WfgenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_output_tokens == 0 {
            return Err(anyhow!("max_output_tokens must be > 0"));
        }
        if self.max_iterations == Some(0) {
            return Err(anyhow!("max_iterations must be > 0 when set"));
        }
        if self.continuation.base_backoff_ms > self.continuation.max_backoff_ms {
            return Err(anyhow!(
                "continuation.base_backoff_ms must be <= continuation.max_backoff_ms"
            ));
        }
        if self.operator.timeout_secs == Some(0) {
            return Err(anyhow!("operator.timeout_secs must be > 0 when set"));
        }
        self.generation.validate("generation")?;
        self.judgment.validate("judgment")?;
        Ok(())
    }

    /// Resolve `rules_path` against the project root when it is relative.
    pub fn rules_path_in(&self, root: &Path) -> PathBuf {
        if self.rules_path.is_absolute() {
            self.rules_path.clone()
        } else {
            root.join(&self.rules_path)
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WfgenConfig::default()`.
pub fn load_config(path: &Path) -> Result<WfgenConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = WfgenConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WfgenConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WfgenConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_timeout_maps_to_duration() {
        assert_eq!(OperatorConfig::default().timeout(), None);
        let cfg: WfgenConfig = toml::from_str("[operator]\ntimeout_secs = 30\n").expect("parse");
        assert_eq!(cfg.operator.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, WfgenConfig::default());
    }

    #[test]
    fn write_then_load_preserves_overrides() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = WfgenConfig {
            mode: LoopMode::Gated,
            max_iterations: Some(4),
            ..WfgenConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "mode = \"gated\"\n\n[generation]\ncommand = [\"claude\", \"-p\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.mode, LoopMode::Gated);
        assert_eq!(cfg.generation.command, vec!["claude", "-p"]);
        assert_eq!(cfg.generation.timeout_secs, 600);
        assert_eq!(cfg.judgment, WfgenConfig::default().judgment);
        assert_eq!(cfg.max_output_tokens, 8192);
    }

    #[test]
    fn rejects_empty_command() {
        let cfg = WfgenConfig {
            judgment: BackendConfig {
                command: Vec::new(),
                timeout_secs: 1,
                output_limit_bytes: 1,
            },
            ..WfgenConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("judgment.command"));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ContinuationConfig {
            max_retries: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 350,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(30), Duration::from_millis(350));
    }

    #[test]
    fn relative_rules_path_resolves_against_root() {
        let cfg = WfgenConfig::default();
        let resolved = cfg.rules_path_in(Path::new("/project"));
        assert_eq!(resolved, PathBuf::from("/project/.wfgen/rules.yml"));
    }
}
