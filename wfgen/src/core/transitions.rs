//! Transition table for the generate/check loop.
//!
//! Both loop modes share one table. `OperatorReview` is only reachable in
//! [`LoopMode::Gated`].

use crate::core::run_state::RunState;
use crate::core::types::{LoopMode, Phase};

/// Phase the controller enters after finishing `phase`.
///
/// `state` must already reflect the node that just ran (the appended answer,
/// the new verdict, or the operator decision).
pub fn next_phase(mode: LoopMode, phase: Phase, state: &RunState) -> Phase {
    match phase {
        Phase::Generate => Phase::Check,
        Phase::Check if state.passed() => Phase::Done,
        Phase::Check => match mode {
            LoopMode::Auto => Phase::Generate,
            LoopMode::Gated => Phase::OperatorReview,
        },
        Phase::OperatorReview if state.operator_accepted() => Phase::Done,
        Phase::OperatorReview => Phase::Generate,
        Phase::Done => Phase::Done,
    }
}
