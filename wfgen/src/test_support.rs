//! Test-only helpers: scripted backends, a scripted gate, and a temp workspace.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::agents::generator::GeneratorConfig;
use crate::core::types::{Decision, Verdict};
use crate::io::backend::{
    BackendError, GenerationBackend, GenerationRequest, JudgmentBackend, JudgmentRequest,
};
use crate::io::config::ContinuationConfig;
use crate::io::init::{InitOptions, WfgenPaths, init_workspace};
use crate::io::operator::{OperatorGate, Review};
use crate::io::rules::RuleSet;

pub const SAMPLE_RULES: &str = "\
rules:
  - The workflow must start with a start node and end with an end node.
  - Every node needs a unique id.
output: yaml
";

pub fn sample_rules() -> RuleSet {
    RuleSet::from_text("rules.yml", SAMPLE_RULES).expect("sample rules are valid")
}

/// Continuation policy with the given ceiling and no sleeping.
pub fn no_backoff(max_retries: u32) -> ContinuationConfig {
    ContinuationConfig {
        max_retries,
        base_backoff_ms: 0,
        max_backoff_ms: 0,
    }
}

pub fn generator_config() -> GeneratorConfig {
    GeneratorConfig {
        role: "You are an expert in generating Dify workflows.".to_string(),
        max_output_tokens: 8192,
        continuation: no_backoff(8),
    }
}

/// A scripted context-length interruption carrying `partial` text.
pub fn context_length(partial: &str) -> Result<String, BackendError> {
    Err(BackendError::ContextLengthExceeded {
        partial: partial.to_string(),
    })
}

/// Generation backend that replays a fixed script and records each request.
pub struct ScriptedGeneration {
    script: RefCell<VecDeque<Result<String, BackendError>>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGeneration {
    pub fn new(script: Vec<Result<String, BackendError>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }
}

impl GenerationBackend for ScriptedGeneration {
    fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        self.requests.borrow_mut().push(request.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Other(anyhow!("generation script exhausted"))))
    }
}

/// Judgment backend that replays a fixed script and records each request.
pub struct ScriptedJudgment {
    script: RefCell<VecDeque<Result<Verdict, BackendError>>>,
    requests: RefCell<Vec<JudgmentRequest>>,
}

impl ScriptedJudgment {
    pub fn new(script: Vec<Result<Verdict, BackendError>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Script that fails `failures` times with `reason`, then passes.
    pub fn failing_then_passing(failures: usize, reason: &str) -> Self {
        let mut script: Vec<_> = (0..failures).map(|_| Ok(Verdict::fail(reason))).collect();
        script.push(Ok(Verdict::pass("")));
        Self::new(script)
    }

    pub fn requests(&self) -> Vec<JudgmentRequest> {
        self.requests.borrow().clone()
    }
}

impl JudgmentBackend for ScriptedJudgment {
    fn judge(&self, request: &JudgmentRequest) -> Result<Verdict, BackendError> {
        self.requests.borrow_mut().push(request.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Other(anyhow!("judgment script exhausted"))))
    }
}

/// A review as seen by [`ScriptedGate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenReview {
    pub attempt: usize,
    pub reason: String,
    pub answer: String,
}

/// Operator gate that replays fixed decisions.
pub struct ScriptedGate {
    decisions: VecDeque<Decision>,
    pub seen: Vec<SeenReview>,
}

impl ScriptedGate {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: decisions.into(),
            seen: Vec::new(),
        }
    }
}

impl OperatorGate for ScriptedGate {
    fn review(&mut self, review: &Review<'_>) -> Result<Decision> {
        self.seen.push(SeenReview {
            attempt: review.attempt,
            reason: review.reason.to_string(),
            answer: review.answer.to_string(),
        });
        self.decisions
            .pop_front()
            .ok_or_else(|| anyhow!("gate script exhausted"))
    }
}

/// Temporary project root initialized with `.wfgen/` and the sample rules.
pub struct TestWorkspace {
    temp: TempDir,
    pub paths: WfgenPaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let paths = init_workspace(temp.path(), &InitOptions { force: false })?;
        fs::write(&paths.rules_path, SAMPLE_RULES).context("write sample rules")?;
        Ok(Self { temp, paths })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }
}
