//! Shared deterministic types for the generate/check loop.
//!
//! These types define stable contracts between the loop nodes. They carry no
//! I/O and serialize to stable JSON for run artifacts.

use serde::{Deserialize, Serialize};

/// Structured output of the judgment step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Why the answer does or does not follow the rules.
    #[serde(default)]
    pub reason: String,
    /// `true` when the answer conforms to the rule set.
    pub judge: bool,
}

impl Verdict {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            judge: true,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            judge: false,
        }
    }

    /// A failing verdict must carry a non-blank reason.
    pub fn validate(&self) -> Result<(), String> {
        if !self.judge && self.reason.trim().is_empty() {
            return Err("failing verdict has an empty reason".to_string());
        }
        Ok(())
    }
}

/// Loop topology: regenerate automatically, or ask an operator first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// A failing verdict loops straight back to generation.
    #[default]
    Auto,
    /// A failing verdict suspends the run until an operator decides.
    Gated,
}

/// Position of the loop controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Generate,
    Check,
    OperatorReview,
    Done,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Generate => "generate",
            Phase::Check => "check",
            Phase::OperatorReview => "operator_review",
            Phase::Done => "done",
        }
    }
}

/// Operator response to a failing verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Keep the current answer despite the reported issues.
    Accept,
    /// Discard the verdict and generate again with the reason injected.
    Regenerate,
}

/// Which generation prompt variant to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptShape {
    /// No judgment has failed yet.
    Fresh,
    /// The previous judgment's reason is injected as a correction.
    Corrective,
}

impl PromptShape {
    pub fn for_reason(reason: &str) -> Self {
        if reason.is_empty() {
            PromptShape::Fresh
        } else {
            PromptShape::Corrective
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_follows_reason_presence() {
        assert_eq!(PromptShape::for_reason(""), PromptShape::Fresh);
        assert_eq!(PromptShape::for_reason("missing step"), PromptShape::Corrective);
        assert_eq!(PromptShape::for_reason(" "), PromptShape::Corrective);
    }

    #[test]
    fn failing_verdict_requires_reason() {
        assert!(Verdict::fail("").validate().is_err());
        assert!(Verdict::fail("  \n").validate().is_err());
        assert!(Verdict::fail("bad format").validate().is_ok());
        assert!(Verdict::pass("").validate().is_ok());
    }

    #[test]
    fn verdict_reason_defaults_when_absent() {
        let verdict: Verdict = serde_json::from_str(r#"{"judge": true}"#).expect("parse");
        assert_eq!(verdict, Verdict::pass(""));
    }
}
