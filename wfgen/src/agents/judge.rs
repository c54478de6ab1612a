//! Judge node: classify the latest answer against the rule set.

use anyhow::{Result, anyhow};
use tracing::{info, instrument};

use crate::core::run_state::RunState;
use crate::core::types::Verdict;
use crate::io::backend::{JudgmentBackend, JudgmentRequest};
use crate::io::prompt::build_judgment_prompt;
use crate::io::rules::RuleSet;

/// Judge the last answer in `state.history()` and record the verdict.
///
/// `rules` must be the same rule set the Generator was given. A verdict the
/// backend cannot produce in well-formed shape fails the run.
#[instrument(skip_all, fields(attempt = state.history().len()))]
pub fn judge_latest<J: JudgmentBackend>(
    backend: &J,
    rules: &RuleSet,
    state: &mut RunState,
) -> Result<Verdict> {
    let answer = state
        .latest_answer()
        .ok_or_else(|| anyhow!("judge requires at least one generated answer"))?;
    info!("check: start");

    let verdict = judge_answer(backend, rules, state.request(), answer)?;

    state.apply_verdict(&verdict);
    if verdict.judge {
        info!("check: end");
    } else {
        info!(reason = %verdict.reason, "check: end with error");
    }
    Ok(verdict)
}

/// Judge an arbitrary answer without touching any run state.
pub fn judge_answer<J: JudgmentBackend>(
    backend: &J,
    rules: &RuleSet,
    request: &str,
    answer: &str,
) -> Result<Verdict> {
    let request = JudgmentRequest {
        prompt: build_judgment_prompt(rules, request, answer)?,
    };
    let verdict = backend.judge(&request)?;
    verdict
        .validate()
        .map_err(|msg| anyhow!("malformed verdict: {msg}"))?;
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::backend::BackendError;
    use crate::test_support::{ScriptedJudgment, sample_rules};

    #[test]
    fn empty_history_is_an_error() {
        let backend = ScriptedJudgment::new(vec![Ok(Verdict::pass(""))]);
        let mut state = RunState::new("req");
        let err = judge_latest(&backend, &sample_rules(), &mut state).unwrap_err();
        assert!(err.to_string().contains("at least one generated answer"));
        assert!(backend.requests().is_empty());
    }

    #[test]
    fn judges_only_the_latest_answer() {
        let backend = ScriptedJudgment::new(vec![Ok(Verdict::fail("bad format"))]);
        let mut state = RunState::new("req");
        state.push_answer("old answer".to_string());
        state.push_answer("new answer".to_string());

        let verdict = judge_latest(&backend, &sample_rules(), &mut state).expect("judge");

        assert_eq!(verdict, Verdict::fail("bad format"));
        assert!(!state.passed());
        assert_eq!(state.reason(), "bad format");
        let prompt = &backend.requests()[0].prompt;
        assert!(prompt.contains("new answer"));
        assert!(!prompt.contains("old answer"));
        assert!(prompt.contains(sample_rules().payload().trim_end()));
    }

    #[test]
    fn malformed_verdict_is_fatal_and_leaves_state() {
        let backend = ScriptedJudgment::new(vec![Ok(Verdict::fail(""))]);
        let mut state = RunState::new("req");
        state.push_answer("answer".to_string());

        let err = judge_latest(&backend, &sample_rules(), &mut state).unwrap_err();
        assert!(err.to_string().contains("malformed verdict"));
        assert_eq!(state.reason(), "");
    }

    #[test]
    fn backend_failure_propagates() {
        let backend = ScriptedJudgment::new(vec![Err(BackendError::Other(anyhow!(
            "unparseable structured output"
        )))]);
        let mut state = RunState::new("req");
        state.push_answer("answer".to_string());

        let err = judge_latest(&backend, &sample_rules(), &mut state).unwrap_err();
        assert!(err.to_string().contains("unparseable"));
    }
}
