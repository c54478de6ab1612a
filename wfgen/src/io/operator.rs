//! Operator gate: a human (or a driving program) decides what happens to a
//! failing answer.
//!
//! [`ConsoleGate`] is the line-oriented terminal prompt. [`ChannelGate`] hands
//! the review to another thread over `std::sync::mpsc` and blocks until a
//! decision comes back, so non-interactive deployments can decide
//! programmatically.

use std::io::{BufRead, Write};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, warn};

use crate::core::types::Decision;
use crate::io::config::OperatorConfig;

/// What the operator is asked to review.
#[derive(Debug, Clone, Copy)]
pub struct Review<'a> {
    /// Generation attempt that produced `answer` (1-indexed).
    pub attempt: usize,
    /// Reason the judge gave for failing the answer.
    pub reason: &'a str,
    pub answer: &'a str,
}

/// Decides whether a failing answer is accepted or regenerated.
pub trait OperatorGate {
    fn review(&mut self, review: &Review<'_>) -> Result<Decision>;
}

/// Normalize one line of operator input.
pub fn parse_decision(input: &str) -> Option<Decision> {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "accept" => Some(Decision::Accept),
        "n" | "no" | "reject" | "regenerate" => Some(Decision::Regenerate),
        _ => None,
    }
}

const QUESTION: &str = "Accept this workflow despite the issues? (y = accept, n = regenerate): ";

/// Terminal gate reading decisions line by line.
pub struct ConsoleGate<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleGate<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn show(&mut self, review: &Review<'_>) -> Result<()> {
        writeln!(
            self.output,
            "\nWarning: the following issues were detected:\n{}",
            review.reason.trim_end()
        )?;
        writeln!(
            self.output,
            "\nGenerated workflow (attempt {}):\n{}",
            review.attempt,
            review.answer.trim_end()
        )?;
        Ok(())
    }
}

impl<R: BufRead, W: Write> OperatorGate for ConsoleGate<R, W> {
    fn review(&mut self, review: &Review<'_>) -> Result<Decision> {
        info!(attempt = review.attempt, "asking operator");
        self.show(review).context("write review to operator")?;

        loop {
            write!(self.output, "\n{QUESTION}")?;
            self.output.flush().context("flush operator prompt")?;

            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .context("read operator input")?;
            if read == 0 {
                bail!("operator input closed before a decision was made");
            }
            match parse_decision(&line) {
                Some(decision) => {
                    info!(?decision, "operator decided");
                    return Ok(decision);
                }
                None => {
                    warn!(input = %line.trim(), "invalid operator input");
                    writeln!(self.output, "Invalid input. Please enter y or n.")?;
                }
            }
        }
    }
}

/// Owned copy of a [`Review`] sent across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub attempt: usize,
    pub reason: String,
    pub answer: String,
}

/// Gate that suspends the run until a decision arrives on a channel.
pub struct ChannelGate {
    requests: Sender<ReviewRequest>,
    decisions: Receiver<Decision>,
    timeout: Option<Duration>,
}

impl ChannelGate {
    pub fn new(requests: Sender<ReviewRequest>, decisions: Receiver<Decision>) -> Self {
        Self {
            requests,
            decisions,
            timeout: None,
        }
    }

    /// Gate whose timeout comes from the `[operator]` config table.
    pub fn from_config(
        requests: Sender<ReviewRequest>,
        decisions: Receiver<Decision>,
        config: &OperatorConfig,
    ) -> Self {
        Self::new(requests, decisions).with_timeout(config.timeout())
    }

    /// Fail the run when no decision arrives within `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl OperatorGate for ChannelGate {
    fn review(&mut self, review: &Review<'_>) -> Result<Decision> {
        info!(attempt = review.attempt, "waiting for operator decision");
        self.requests
            .send(ReviewRequest {
                attempt: review.attempt,
                reason: review.reason.to_string(),
                answer: review.answer.to_string(),
            })
            .map_err(|_| anyhow!("operator channel closed before review was sent"))?;

        let decision = match self.timeout {
            None => self
                .decisions
                .recv()
                .map_err(|_| anyhow!("operator channel closed before a decision was made"))?,
            Some(timeout) => match self.decisions.recv_timeout(timeout) {
                Ok(decision) => decision,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(timeout_secs = timeout.as_secs(), "operator decision timed out");
                    bail!("no operator decision within {timeout:?}");
                }
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("operator channel closed before a decision was made")
                }
            },
        };
        info!(?decision, "operator decided");
        Ok(decision)
    }
}
