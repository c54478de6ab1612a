//! Stable exit codes for wfgen CLI commands.

/// Command succeeded (the run passed judgment, or `check` passed).
pub const OK: i32 = 0;
/// Command failed due to invalid layout/config/rules or a fatal backend error.
pub const INVALID: i32 = 1;
/// `wfgen run` finished because the operator accepted a failing answer.
pub const ACCEPTED_WITH_ISSUES: i32 = 2;
/// `wfgen run` finished but the final answer has no fenced yaml block.
pub const NO_DOCUMENT: i32 = 3;
/// `wfgen check` judged the answer as not following the rules.
pub const CHECK_FAILED: i32 = 4;
