//! Generator node: produce one new answer and append it to the history.

use anyhow::Result;
use tracing::{info, instrument};

use crate::agents::accumulator::CompletionAccumulator;
use crate::core::run_state::RunState;
use crate::io::backend::GenerationBackend;
use crate::io::config::ContinuationConfig;
use crate::io::prompt::PromptContext;
use crate::io::rules::RuleSet;

/// Per-deployment generation settings.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub role: String,
    pub max_output_tokens: u32,
    pub continuation: ContinuationConfig,
}

#[derive(Debug, Clone)]
pub struct Generator {
    config: GeneratorConfig,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Generate one answer for `state` and append it to the history.
    ///
    /// The prompt is corrective when the state carries a judgment reason and
    /// fresh otherwise. Nothing is appended when generation fails.
    #[instrument(skip_all, fields(attempt = state.history().len() + 1))]
    pub fn run<B: GenerationBackend>(
        &self,
        backend: &B,
        rules: &RuleSet,
        state: &mut RunState,
    ) -> Result<()> {
        let ctx = PromptContext {
            role: &self.config.role,
            rules,
            request: state.request(),
            reason: state.reason(),
        };
        info!(shape = ?ctx.shape(), "generator: start");

        let answer = CompletionAccumulator::new(
            backend,
            self.config.continuation,
            self.config.max_output_tokens,
        )
        .complete(&ctx)?;

        info!(bytes = answer.len(), "generator: end");
        state.push_answer(answer);
        Ok(())
    }
}
