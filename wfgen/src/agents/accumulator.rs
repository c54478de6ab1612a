//! Completion accumulator: one logical generation call across truncation.

use std::thread;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, warn};

use crate::io::backend::{BackendError, GenerationBackend, GenerationRequest};
use crate::io::config::ContinuationConfig;
use crate::io::prompt::{PromptContext, build_generation_prompt};

/// The backend kept hitting the context limit after every allowed continuation.
#[derive(Debug, Error)]
#[error("generation still exceeded the context length after {continuations} continuations ({accumulated_bytes} bytes accumulated)")]
pub struct ContinuationLimitExceeded {
    pub continuations: u32,
    pub accumulated_bytes: usize,
}

/// Drives a generation backend until a call finishes without running out of
/// context, concatenating partial outputs in call order.
pub struct CompletionAccumulator<'a, B> {
    backend: &'a B,
    policy: ContinuationConfig,
    max_output_tokens: u32,
}

impl<'a, B: GenerationBackend> CompletionAccumulator<'a, B> {
    pub fn new(backend: &'a B, policy: ContinuationConfig, max_output_tokens: u32) -> Self {
        Self {
            backend,
            policy,
            max_output_tokens,
        }
    }

    /// Produce the complete answer for `ctx`.
    ///
    /// Each continuation re-renders the prompt with the text accumulated so far.
    /// Errors other than [`BackendError::ContextLengthExceeded`] propagate
    /// immediately.
    pub fn complete(&self, ctx: &PromptContext<'_>) -> Result<String> {
        let mut answer = String::new();
        let mut continuations = 0u32;

        loop {
            let request = GenerationRequest {
                prompt: build_generation_prompt(ctx, &answer)?,
                max_output_tokens: self.max_output_tokens,
            };

            match self.backend.generate(&request) {
                Ok(text) => {
                    answer.push_str(&text);
                    debug!(continuations, bytes = answer.len(), "completion finished");
                    return Ok(answer);
                }
                Err(BackendError::ContextLengthExceeded { partial }) => {
                    answer.push_str(&partial);
                    if continuations >= self.policy.max_retries {
                        return Err(ContinuationLimitExceeded {
                            continuations,
                            accumulated_bytes: answer.len(),
                        }
                        .into());
                    }
                    continuations += 1;
                    let delay = self.policy.backoff(continuations);
                    warn!(
                        continuations,
                        partial_bytes = partial.len(),
                        delay_ms = delay.as_millis() as u64,
                        "context length exceeded, continuing"
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
