//! Loop controller: Generator → Judge → (done | operator review) → Generator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::agents::generator::Generator;
use crate::agents::judge::judge_latest;
use crate::core::run_state::RunState;
use crate::core::transitions::next_phase;
use crate::core::types::{Decision, LoopMode, Phase, Verdict};
use crate::io::backend::{GenerationBackend, JudgmentBackend};
use crate::io::operator::{OperatorGate, Review};
use crate::io::rules::RuleSet;

/// Why a run stopped before reaching `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopAbort {
    #[error("run cancelled after {generations} generations")]
    Cancelled { generations: usize },
    #[error("run exceeded max_iterations={max_iterations} without an accepted answer")]
    IterationLimit { max_iterations: u32 },
}

/// Shared flag that stops a run at the next iteration boundary.
///
/// Raising it never interrupts a backend call in flight.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How failing verdicts are handled.
pub enum Gate<'a> {
    /// Regenerate immediately.
    Auto,
    /// Ask an operator before regenerating.
    Operator(&'a mut dyn OperatorGate),
}

impl Gate<'_> {
    pub fn mode(&self) -> LoopMode {
        match self {
            Gate::Auto => LoopMode::Auto,
            Gate::Operator(_) => LoopMode::Gated,
        }
    }
}

/// Progress notification emitted after each node runs.
#[derive(Debug, Clone, Copy)]
pub enum LoopEvent<'a> {
    Generated { attempt: usize, answer: &'a str },
    Judged { attempt: usize, verdict: &'a Verdict },
    Reviewed { attempt: usize, decision: Decision },
}

/// How the run reached `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The latest answer passed judgment.
    Passed,
    /// The operator accepted a failing answer.
    AcceptedByOperator,
}

/// Final state of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub state: RunState,
    pub stop: LoopStop,
}

/// Limits applied when driving a run.
#[derive(Debug, Clone, Default)]
pub struct LoopLimits {
    /// Abort instead of starting generation number `max_iterations + 1`.
    pub max_iterations: Option<u32>,
    /// Raised by embedding callers (another thread, an event handler). The
    /// `wfgen` binary never raises it; Ctrl-C there terminates the process.
    pub cancel: CancelFlag,
}

/// Everything a run needs besides the request.
pub struct LoopController<'a, G, J> {
    pub generator: &'a Generator,
    pub generation: &'a G,
    pub judgment: &'a J,
    /// Shared by the generator and the judge.
    pub rules: &'a RuleSet,
    pub limits: LoopLimits,
}

impl<G: GenerationBackend, J: JudgmentBackend> LoopController<'_, G, J> {
    /// Run the loop for `request` until it reaches `Done`.
    ///
    /// Any backend or gate failure aborts the run and is returned as is; no
    /// partial state is returned. Limit and cancellation stops surface as
    /// [`LoopAbort`] inside the error.
    #[instrument(skip_all, fields(mode = ?gate.mode()))]
    pub fn run<F: FnMut(&LoopEvent<'_>)>(
        &self,
        request: &str,
        mut gate: Gate<'_>,
        mut on_event: F,
    ) -> Result<LoopOutcome> {
        let mode = gate.mode();
        let mut state = RunState::new(request);
        let mut phase = Phase::Generate;

        while phase != Phase::Done {
            match phase {
                Phase::Generate => {
                    self.check_limits(&state)?;
                    self.generator.run(self.generation, self.rules, &mut state)?;
                    if let Some(answer) = state.latest_answer() {
                        on_event(&LoopEvent::Generated {
                            attempt: state.history().len(),
                            answer,
                        });
                    }
                }
                Phase::Check => {
                    let verdict = judge_latest(self.judgment, self.rules, &mut state)?;
                    on_event(&LoopEvent::Judged {
                        attempt: state.history().len(),
                        verdict: &verdict,
                    });
                }
                Phase::OperatorReview => {
                    let Gate::Operator(operator) = &mut gate else {
                        bail!("operator review reached without an operator gate");
                    };
                    let answer = state.latest_answer().unwrap_or_default();
                    let decision = operator.review(&Review {
                        attempt: state.history().len(),
                        reason: state.reason(),
                        answer,
                    })?;
                    state.apply_decision(decision);
                    on_event(&LoopEvent::Reviewed {
                        attempt: state.history().len(),
                        decision,
                    });
                }
                Phase::Done => {}
            }

            let next = next_phase(mode, phase, &state);
            debug!(from = phase.as_str(), to = next.as_str(), "transition");
            phase = next;
        }

        let stop = if state.passed() {
            LoopStop::Passed
        } else {
            LoopStop::AcceptedByOperator
        };
        info!(generations = state.history().len(), ?stop, "run done");
        Ok(LoopOutcome { state, stop })
    }

    fn check_limits(&self, state: &RunState) -> Result<(), LoopAbort> {
        let generations = state.history().len();
        if self.limits.cancel.is_cancelled() {
            info!(generations, "run cancelled");
            return Err(LoopAbort::Cancelled { generations });
        }
        if let Some(max_iterations) = self.limits.max_iterations
            && generations >= max_iterations as usize
        {
            info!(generations, max_iterations, "iteration limit reached");
            return Err(LoopAbort::IterationLimit { max_iterations });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ScriptedGate, ScriptedGeneration, ScriptedJudgment, generator_config, sample_rules,
    };

    fn controller<'a>(
        generator: &'a Generator,
        generation: &'a ScriptedGeneration,
        judgment: &'a ScriptedJudgment,
        rules: &'a RuleSet,
        limits: LoopLimits,
    ) -> LoopController<'a, ScriptedGeneration, ScriptedJudgment> {
        LoopController {
            generator,
            generation,
            judgment,
            rules,
            limits,
        }
    }

    #[test]
    fn events_follow_node_order() {
        let generator = Generator::new(generator_config());
        let generation =
            ScriptedGeneration::new(vec![Ok("a1".to_string()), Ok("a2".to_string())]);
        let judgment = ScriptedJudgment::new(vec![
            Ok(Verdict::fail("missing step")),
            Ok(Verdict::pass("")),
        ]);
        let rules = sample_rules();
        let mut gate = ScriptedGate::new(vec![Decision::Regenerate]);

        let mut events = Vec::new();
        let outcome = controller(
            &generator,
            &generation,
            &judgment,
            &rules,
            LoopLimits::default(),
        )
        .run("req", Gate::Operator(&mut gate), |event| {
            events.push(match event {
                LoopEvent::Generated { attempt, .. } => format!("generated:{attempt}"),
                LoopEvent::Judged { attempt, verdict } => {
                    format!("judged:{attempt}:{}", verdict.judge)
                }
                LoopEvent::Reviewed { attempt, decision } => {
                    format!("reviewed:{attempt}:{decision:?}")
                }
            });
        })
        .expect("run");

        assert_eq!(outcome.stop, LoopStop::Passed);
        assert_eq!(
            events,
            vec![
                "generated:1",
                "judged:1:false",
                "reviewed:1:Regenerate",
                "generated:2",
                "judged:2:true",
            ]
        );
    }

    #[test]
    fn iteration_limit_aborts_before_next_generation() {
        let generator = Generator::new(generator_config());
        let generation =
            ScriptedGeneration::new(vec![Ok("a1".to_string()), Ok("a2".to_string())]);
        let judgment = ScriptedJudgment::new(vec![
            Ok(Verdict::fail("missing step")),
            Ok(Verdict::fail("still missing")),
        ]);
        let rules = sample_rules();
        let limits = LoopLimits {
            max_iterations: Some(2),
            ..LoopLimits::default()
        };

        let err = controller(&generator, &generation, &judgment, &rules, limits)
            .run("req", Gate::Auto, |_| {})
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<LoopAbort>(),
            Some(&LoopAbort::IterationLimit { max_iterations: 2 })
        );
        assert_eq!(generation.requests().len(), 2);
        assert_eq!(judgment.requests().len(), 2);
    }

    #[test]
    fn cancellation_stops_at_iteration_boundary() {
        let generator = Generator::new(generator_config());
        let generation =
            ScriptedGeneration::new(vec![Ok("a1".to_string()), Ok("a2".to_string())]);
        let judgment = ScriptedJudgment::new(vec![Ok(Verdict::fail("missing step"))]);
        let rules = sample_rules();
        let limits = LoopLimits::default();
        let cancel = limits.cancel.clone();

        let err = controller(&generator, &generation, &judgment, &rules, limits)
            .run("req", Gate::Auto, |event| {
                if matches!(event, LoopEvent::Judged { .. }) {
                    cancel.cancel();
                }
            })
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<LoopAbort>(),
            Some(&LoopAbort::Cancelled { generations: 1 })
        );
        assert_eq!(generation.requests().len(), 1);
    }

    #[test]
    fn fatal_generation_error_returns_no_state() {
        let generator = Generator::new(generator_config());
        let generation = ScriptedGeneration::new(vec![]);
        let judgment = ScriptedJudgment::new(vec![]);
        let rules = sample_rules();

        let err = controller(
            &generator,
            &generation,
            &judgment,
            &rules,
            LoopLimits::default(),
        )
        .run("req", Gate::Auto, |_| {})
        .unwrap_err();
        assert!(err.to_string().contains("script exhausted"));
        assert!(judgment.requests().is_empty());
    }
}
