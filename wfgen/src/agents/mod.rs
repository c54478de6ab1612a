//! Loop nodes that talk to the model backends.

pub mod accumulator;
pub mod generator;
pub mod judge;
