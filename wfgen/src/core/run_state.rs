//! The record threaded through every node of a run.

use serde::Serialize;

use crate::core::types::{Decision, Verdict};

/// Mutable state of a single run.
///
/// Created once per run and owned by the loop controller. `request` never
/// changes after construction and `history` only grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunState {
    request: String,
    history: Vec<String>,
    passed: bool,
    reason: String,
    operator_accepted: bool,
}

impl RunState {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            history: Vec::new(),
            passed: false,
            reason: String::new(),
            operator_accepted: false,
        }
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    /// Every generated answer in generation order.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn latest_answer(&self) -> Option<&str> {
        self.history.last().map(String::as_str)
    }

    /// Result of the most recent judgment (`false` before the first one).
    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Reason from the most recent judgment; empty until one has occurred.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn operator_accepted(&self) -> bool {
        self.operator_accepted
    }

    pub(crate) fn push_answer(&mut self, answer: String) {
        self.history.push(answer);
    }

    pub(crate) fn apply_verdict(&mut self, verdict: &Verdict) {
        self.passed = verdict.judge;
        self.reason.clone_from(&verdict.reason);
    }

    pub(crate) fn apply_decision(&mut self, decision: Decision) {
        self.operator_accepted = decision == Decision::Accept;
    }
}
