//! RR-011: SSH execution transport.
//!
//! Shells out to the `ssh` binary in batch mode. The command goes to the
//! remote `bash` on stdin, never as an argument.

use super::{run_piped, ExecOutput};
use crate::core::types::Machine;
use std::process::Command;

/// Expand a leading `~/` against `$HOME`.
fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home, rest),
            Err(_) => path.to_string(),
        },
        None => path.to_string(),
    }
}

/// Execute a command on a remote machine via SSH.
pub fn exec_ssh(name: &str, machine: &Machine, script: &str) -> Result<ExecOutput, String> {
    let addr = machine
        .addr
        .as_deref()
        .ok_or_else(|| format!("machine '{}' has no ssh addr", name))?;

    let mut cmd = Command::new("ssh");
    cmd.args(["-o", "BatchMode=yes"])
        .args(["-o", "ConnectTimeout=5"])
        .args(["-o", "StrictHostKeyChecking=accept-new"]);

    if let Some(ref key) = machine.ssh_key {
        cmd.args(["-i", &expand_home(key)]);
    }

    cmd.arg(format!("{}@{}", machine.user, addr)).arg("bash");

    run_piped(cmd, script, &format!("ssh to {}", addr))
}
