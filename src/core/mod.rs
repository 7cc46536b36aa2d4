//! Core engine: types, catalogue parsing, parameter resolution, execution.

pub mod clock;
pub mod executor;
pub mod orchestrator;
pub mod parser;
pub mod resolver;
pub mod types;
