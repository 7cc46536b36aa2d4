//! RR-010: Local execution transport.

use super::{run_piped, ExecOutput};
use std::process::Command;

/// Execute a command locally via `bash`, script piped on stdin.
pub fn exec_local(script: &str) -> Result<ExecOutput, String> {
    run_piped(Command::new("bash"), script, "bash")
}
