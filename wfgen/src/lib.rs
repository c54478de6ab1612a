//! Generate-judge-retry loop for workflow documents.
//!
//! A run turns a natural-language request into a workflow definition by
//! alternating two model calls: a generator drafts an answer under a YAML rule
//! set, and a judge checks the answer against the same rules. Failing answers
//! are regenerated with the judge's reason folded into the prompt, either
//! immediately or after an operator approves the retry.
//!
//! - **[`core`]**: Pure, deterministic logic (run state, transitions, fenced
//!   block extraction). No I/O.
//! - **[`io`]**: Side-effecting operations (backend commands, config, rules,
//!   operator prompts, run logs). Behind traits where tests need doubles.
//! - **[`agents`]**: Generator and judge nodes built on the backends.
//!
//! [`looping`] drives the nodes until the run is done.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
