//! I/O helpers for wfgen commands.

pub mod backend;
pub mod config;
pub mod init;
pub mod operator;
pub mod process;
pub mod prompt;
pub mod rules;
pub mod run_log;
