//! Prompt rendering for the generation and judgment calls.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::types::PromptShape;
use crate::io::rules::RuleSet;

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const JUDGE_TEMPLATE: &str = include_str!("prompts/judge.md");

/// Inputs shared by every generation call of one Generator run.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    /// Role line placed at the top of the prompt.
    pub role: &'a str,
    pub rules: &'a RuleSet,
    /// The user's natural-language request.
    pub request: &'a str,
    /// Reason from the previous failing judgment; empty on a fresh run.
    pub reason: &'a str,
}

impl PromptContext<'_> {
    pub fn shape(&self) -> PromptShape {
        PromptShape::for_reason(self.reason)
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("generate", GENERATE_TEMPLATE)
            .context("load generate template")?;
        env.add_template("judge", JUDGE_TEMPLATE)
            .context("load judge template")?;
        Ok(Self { env })
    }

    fn render_generation(&self, ctx: &PromptContext<'_>, existing: &str) -> Result<String> {
        let reason = match ctx.shape() {
            PromptShape::Fresh => None,
            PromptShape::Corrective => Some(ctx.reason.trim()),
        };
        let template = self.env.get_template("generate")?;
        let rendered = template.render(context! {
            role => ctx.role.trim(),
            rules => ctx.rules.payload().trim_end(),
            request => ctx.request.trim(),
            existing => (!existing.is_empty()).then_some(existing),
            reason => reason,
        })?;
        Ok(rendered)
    }

    fn render_judgment(&self, rules: &RuleSet, request: &str, answer: &str) -> Result<String> {
        let template = self.env.get_template("judge")?;
        let rendered = template.render(context! {
            rules => rules.payload().trim_end(),
            request => request.trim(),
            answer => answer,
        })?;
        Ok(rendered)
    }
}

/// Render one generation prompt.
///
/// `existing` is the answer accumulated so far in the current call; when it is
/// non-empty the prompt asks the backend to continue it rather than restart.
pub fn build_generation_prompt(ctx: &PromptContext<'_>, existing: &str) -> Result<String> {
    let prompt = PromptEngine::new()?
        .render_generation(ctx, existing)
        .context("render generation prompt")?;
    debug!(
        shape = ?ctx.shape(),
        existing_bytes = existing.len(),
        prompt_bytes = prompt.len(),
        "generation prompt rendered"
    );
    Ok(prompt)
}

/// Render the judgment prompt for `answer`.
pub fn build_judgment_prompt(rules: &RuleSet, request: &str, answer: &str) -> Result<String> {
    let prompt = PromptEngine::new()?
        .render_judgment(rules, request, answer)
        .context("render judgment prompt")?;
    debug!(prompt_bytes = prompt.len(), "judgment prompt rendered");
    Ok(prompt)
}
