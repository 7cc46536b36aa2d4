//! Rangerun: scripted verification actions and plans for virtual network testbeds.
//!
//! Actions are ordered shell commands with expected output, run on lab
//! machines. Plans chain actions across machines in `need` and `actions`
//! phases. Every run leaves a YAML trace.

pub mod cli;
pub mod core;
pub mod trace;
pub mod transport;
