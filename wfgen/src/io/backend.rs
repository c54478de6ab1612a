//! Backend abstraction for generation and judgment calls.
//!
//! [`GenerationBackend`] and [`JudgmentBackend`] decouple the loop from the
//! actual model clients. The command adapters spawn a configured CLI (by
//! default `codex exec`) with the prompt on stdin. Tests use scripted
//! backends that return predetermined outputs without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, anyhow};
use jsonschema::{Draft, Validator};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::Verdict;
use crate::io::config::{BackendConfig, SCHEMA_PLACEHOLDER};
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// JSON Schema every verdict must satisfy.
pub const VERDICT_SCHEMA: &str = include_str!("../../schemas/verdict.schema.json");

/// Substring a backend's failure output carries when the context window ran out.
pub const CONTEXT_LENGTH_MARKER: &str = "maximum context length";

/// Environment variable carrying the output-token ceiling to generation commands.
pub const MAX_OUTPUT_TOKENS_ENV: &str = "WFGEN_MAX_OUTPUT_TOKENS";

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The call ran out of context before finishing. `partial` holds whatever
    /// text was produced up to that point (possibly empty).
    #[error("maximum context length exceeded after {} bytes of output", .partial.len())]
    ContextLengthExceeded { partial: String },
    #[error("backend call timed out after {0:?}")]
    TimedOut(Duration),
    /// Stdout outgrew `output_limit_bytes`; the captured text is incomplete.
    #[error("backend output exceeded output_limit_bytes={limit} ({dropped} bytes dropped)")]
    OutputTruncated { limit: usize, dropped: usize },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Parameters for one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Fully rendered prompt text.
    pub prompt: String,
    /// Output-token ceiling for this deployment.
    pub max_output_tokens: u32,
}

/// Parameters for one judgment call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgmentRequest {
    /// Fully rendered prompt text.
    pub prompt: String,
}

/// Text generation: prompt in, text out.
pub trait GenerationBackend {
    fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError>;
}

/// Structured judgment: prompt in, typed verdict out.
pub trait JudgmentBackend {
    fn judge(&self, request: &JudgmentRequest) -> Result<Verdict, BackendError>;
}

/// Generation backend that spawns a configured command.
#[derive(Debug, Clone)]
pub struct CommandGenerationBackend {
    config: BackendConfig,
    workdir: PathBuf,
}

impl CommandGenerationBackend {
    pub fn new(config: BackendConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workdir: workdir.into(),
        }
    }
}

impl GenerationBackend for CommandGenerationBackend {
    #[instrument(skip_all, fields(program = ?self.config.command.first(), prompt_bytes = request.prompt.len()))]
    fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let mut cmd = build_command(&self.config.command, &self.workdir)?;
        cmd.env(MAX_OUTPUT_TOKENS_ENV, request.max_output_tokens.to_string());

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.config.timeout(),
            self.config.output_limit_bytes,
        )
        .context("run generation command")?;

        let text = classify_generation_output(
            &output,
            self.config.timeout(),
            self.config.output_limit_bytes,
        )?;
        debug!(bytes = text.len(), "generation completed");
        Ok(text)
    }
}

/// Map a finished generation process onto the typed error taxonomy.
///
/// This is the only place backend failure text is inspected.
fn classify_generation_output(
    output: &CommandOutput,
    timeout: Duration,
    limit: usize,
) -> Result<String, BackendError> {
    if output.timed_out {
        warn!(timeout_secs = timeout.as_secs(), "generation command timed out");
        return Err(BackendError::TimedOut(timeout));
    }
    // A cut answer or partial cannot be continued without losing text.
    ensure_complete_stdout(output, limit)?;
    let stdout = output.stdout_lossy();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = output.stderr_lossy();
    if stderr.contains(CONTEXT_LENGTH_MARKER) {
        info!(partial_bytes = stdout.len(), "generation hit the context length limit");
        return Err(BackendError::ContextLengthExceeded { partial: stdout });
    }
    warn!(exit_code = ?output.status.code(), "generation command failed");
    Err(BackendError::Other(anyhow!(
        "generation command failed with status {:?}: {}",
        output.status.code(),
        stderr.trim()
    )))
}

/// Judgment backend that spawns a configured command and parses a verdict
/// from its stdout.
#[derive(Debug, Clone)]
pub struct CommandJudgmentBackend {
    config: BackendConfig,
    workdir: PathBuf,
    schema_path: PathBuf,
}

impl CommandJudgmentBackend {
    /// `schema_path` is where the verdict schema is written for commands that
    /// reference `{schema}`.
    pub fn new(
        config: BackendConfig,
        workdir: impl Into<PathBuf>,
        schema_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            workdir: workdir.into(),
            schema_path: schema_path.into(),
        }
    }

    fn argv(&self) -> Vec<String> {
        let schema = self.schema_path.display().to_string();
        self.config
            .command
            .iter()
            .map(|arg| arg.replace(SCHEMA_PLACEHOLDER, &schema))
            .collect()
    }
}

impl JudgmentBackend for CommandJudgmentBackend {
    #[instrument(skip_all, fields(program = ?self.config.command.first(), prompt_bytes = request.prompt.len()))]
    fn judge(&self, request: &JudgmentRequest) -> Result<Verdict, BackendError> {
        if self
            .config
            .command
            .iter()
            .any(|arg| arg.contains(SCHEMA_PLACEHOLDER))
        {
            write_schema(&self.schema_path)?;
        }
        let cmd = build_command(&self.argv(), &self.workdir)?;
        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.config.timeout(),
            self.config.output_limit_bytes,
        )
        .context("run judgment command")?;

        if output.timed_out {
            warn!(
                timeout_secs = self.config.timeout_secs,
                "judgment command timed out"
            );
            return Err(BackendError::TimedOut(self.config.timeout()));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "judgment command failed");
            return Err(BackendError::Other(anyhow!(
                "judgment command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy().trim()
            )));
        }

        ensure_complete_stdout(&output, self.config.output_limit_bytes)?;
        let verdict = parse_verdict(&output.stdout_lossy())?;
        debug!(judge = verdict.judge, "verdict parsed");
        Ok(verdict)
    }
}

static VERDICT_VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(VERDICT_SCHEMA).map_err(|e| e.to_string())?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|e| e.to_string())
});

/// Parse structured judgment output into a [`Verdict`].
///
/// Accepts the JSON object alone or wrapped in a ```json fence. Anything that
/// does not satisfy the verdict schema is a hard failure.
pub fn parse_verdict(raw: &str) -> Result<Verdict, BackendError> {
    let body = strip_json_fence(raw.trim());
    let value: Value = serde_json::from_str(body)
        .with_context(|| format!("judgment output is not JSON: {}", preview(body)))?;

    let validator = VERDICT_VALIDATOR
        .as_ref()
        .map_err(|e| anyhow!("compile verdict schema: {e}"))?;
    let messages: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(BackendError::Other(anyhow!(
            "judgment output does not match verdict schema:\n- {}",
            messages.join("\n- ")
        )));
    }

    let verdict: Verdict = serde_json::from_value(value).context("parse verdict")?;
    verdict
        .validate()
        .map_err(|msg| BackendError::Other(anyhow!("malformed verdict: {msg}")))?;
    Ok(verdict)
}

fn strip_json_fence(body: &str) -> &str {
    let Some(rest) = body.strip_prefix("```") else {
        return body;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn preview(body: &str) -> String {
    let mut snippet: String = body.chars().take(120).collect();
    if snippet.len() < body.len() {
        snippet.push_str("...");
    }
    snippet
}

fn build_command(argv: &[String], workdir: &Path) -> Result<Command, BackendError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(BackendError::Other(anyhow!("backend command is empty")));
    };
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(workdir);
    Ok(cmd)
}

fn ensure_complete_stdout(output: &CommandOutput, limit: usize) -> Result<(), BackendError> {
    if output.stdout_truncated == 0 {
        return Ok(());
    }
    warn!(
        limit,
        dropped = output.stdout_truncated,
        "backend stdout truncated"
    );
    Err(BackendError::OutputTruncated {
        limit,
        dropped: output.stdout_truncated,
    })
}

fn write_schema(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create schema dir {}", parent.display()))?;
    }
    fs::write(path, VERDICT_SCHEMA).with_context(|| format!("write schema {}", path.display()))
}
