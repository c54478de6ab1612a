//! Run logging for `.wfgen/runs/`.
//!
//! Each run gets its own directory with one subdirectory per generation
//! attempt and a `result.json` written when the run ends:
//!
//! ```text
//! .wfgen/runs/run-20260101_120000/
//!   1/answer.md
//!   1/verdict.json
//!   1/decision.json
//!   2/answer.md
//!   2/verdict.json
//!   result.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::core::run_state::RunState;
use crate::core::types::{Decision, LoopMode};
use crate::looping::{LoopEvent, LoopStop};

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub answer_path: PathBuf,
    pub verdict_path: PathBuf,
    pub decision_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(run_dir: &Path, attempt: usize) -> Self {
        let dir = run_dir.join(attempt.to_string());
        Self {
            dir: dir.clone(),
            answer_path: dir.join("answer.md"),
            verdict_path: dir.join("verdict.json"),
            decision_path: dir.join("decision.json"),
        }
    }
}

/// How a run ended, as recorded in `result.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    AcceptedByOperator,
    Failed,
}

impl From<LoopStop> for RunStatus {
    fn from(stop: LoopStop) -> Self {
        match stop {
            LoopStop::Passed => RunStatus::Passed,
            LoopStop::AcceptedByOperator => RunStatus::AcceptedByOperator,
        }
    }
}

#[derive(Debug, Serialize)]
struct RunResult<'a> {
    run_id: &'a str,
    mode: LoopMode,
    status: RunStatus,
    started_at: String,
    finished_at: String,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a RunState>,
}

#[derive(Debug, Serialize)]
struct DecisionRecord {
    decision: Decision,
}

/// Writer for one run's directory.
#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: String,
    dir: PathBuf,
    mode: LoopMode,
    started_at: DateTime<Utc>,
}

impl RunLog {
    /// Create a fresh run directory under `runs_dir`.
    pub fn create(runs_dir: &Path, mode: LoopMode) -> Result<Self> {
        let started_at = Utc::now();
        let base = format!("run-{}", started_at.format("%Y%m%d_%H%M%S"));
        let run_id = unique_run_id(runs_dir, &base)?;
        let dir = runs_dir.join(&run_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("create run dir {}", dir.display()))?;
        debug!(run_id = %run_id, dir = %dir.display(), "run log created");
        Ok(Self {
            run_id,
            dir,
            mode,
            started_at,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.join("result.json")
    }

    /// Persist the artifact for one loop event.
    pub fn record(&self, event: &LoopEvent<'_>) -> Result<()> {
        match *event {
            LoopEvent::Generated { attempt, answer } => {
                let paths = AttemptPaths::new(&self.dir, attempt);
                fs::create_dir_all(&paths.dir)
                    .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;
                write_text(&paths.answer_path, answer)
            }
            LoopEvent::Judged { attempt, verdict } => {
                write_json(&AttemptPaths::new(&self.dir, attempt).verdict_path, verdict)
            }
            LoopEvent::Reviewed { attempt, decision } => write_json(
                &AttemptPaths::new(&self.dir, attempt).decision_path,
                &DecisionRecord { decision },
            ),
        }
    }

    /// Write `result.json` for a run that reached `Done`.
    pub fn finish(&self, state: &RunState, stop: LoopStop) -> Result<PathBuf> {
        self.write_result(stop.into(), None, Some(state))
    }

    /// Write `result.json` for a run that aborted with `error`.
    pub fn fail(&self, error: &anyhow::Error) -> Result<PathBuf> {
        let message = format!("{error:#}");
        self.write_result(RunStatus::Failed, Some(&message), None)
    }

    fn write_result(
        &self,
        status: RunStatus,
        error: Option<&str>,
        state: Option<&RunState>,
    ) -> Result<PathBuf> {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        let path = self.result_path();
        write_json(
            &path,
            &RunResult {
                run_id: &self.run_id,
                mode: self.mode,
                status,
                started_at: self.started_at.to_rfc3339(),
                finished_at: finished_at.to_rfc3339(),
                duration_ms,
                error,
                state,
            },
        )?;
        Ok(path)
    }
}

fn unique_run_id(runs_dir: &Path, base: &str) -> Result<String> {
    for suffix in 1..=999u32 {
        let id = if suffix == 1 {
            base.to_string()
        } else {
            format!("{base}-{suffix}")
        };
        if !runs_dir.join(&id).exists() {
            return Ok(id);
        }
    }
    Err(anyhow!(
        "unable to generate unique run id from base '{base}' (too many existing runs)"
    ))
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Verdict;
    use serde_json::Value;

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("parse json")
    }

    #[test]
    fn attempt_paths_are_stable() {
        let paths = AttemptPaths::new(Path::new("/tmp/runs/run-1"), 3);
        assert!(paths.dir.ends_with("run-1/3"));
        assert!(paths.answer_path.ends_with("3/answer.md"));
        assert!(paths.verdict_path.ends_with("3/verdict.json"));
        assert!(paths.decision_path.ends_with("3/decision.json"));
    }

    #[test]
    fn run_ids_do_not_collide() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = RunLog::create(temp.path(), LoopMode::Auto).expect("first");
        let second = RunLog::create(temp.path(), LoopMode::Auto).expect("second");
        assert_ne!(first.run_id(), second.run_id());
        assert!(first.dir().is_dir());
        assert!(second.dir().is_dir());
    }

    #[test]
    fn records_attempt_artifacts_and_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::create(temp.path(), LoopMode::Gated).expect("create");
        let verdict = Verdict::fail("missing end node");

        log.record(&LoopEvent::Generated {
            attempt: 1,
            answer: "```yaml\napp: {}\n```",
        })
        .expect("generated");
        log.record(&LoopEvent::Judged {
            attempt: 1,
            verdict: &verdict,
        })
        .expect("judged");
        log.record(&LoopEvent::Reviewed {
            attempt: 1,
            decision: Decision::Accept,
        })
        .expect("reviewed");

        let paths = AttemptPaths::new(log.dir(), 1);
        assert_eq!(
            fs::read_to_string(&paths.answer_path).expect("answer"),
            "```yaml\napp: {}\n```"
        );
        assert_eq!(read_json(&paths.verdict_path)["reason"], "missing end node");
        assert_eq!(read_json(&paths.decision_path)["decision"], "accept");

        let mut state = RunState::new("req");
        state.push_answer("```yaml\napp: {}\n```".to_string());
        state.apply_verdict(&verdict);
        state.apply_decision(Decision::Accept);
        let result_path = log
            .finish(&state, LoopStop::AcceptedByOperator)
            .expect("finish");

        let result = read_json(&result_path);
        assert_eq!(result["status"], "accepted_by_operator");
        assert_eq!(result["mode"], "gated");
        assert_eq!(result["state"]["operator_accepted"], true);
        assert!(result.get("error").is_none());
    }

    #[test]
    fn failed_run_records_error_without_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = RunLog::create(temp.path(), LoopMode::Auto).expect("create");

        let err = anyhow!("backend down").context("generate");
        let result = read_json(&log.fail(&err).expect("fail"));

        assert_eq!(result["status"], "failed");
        assert_eq!(result["error"], "generate: backend down");
        assert!(result.get("state").is_none());
    }
}
