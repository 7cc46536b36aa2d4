//! RR-010/011/012: Execution backends for lab machines.

pub mod container;
pub mod local;
#[cfg(test)]
pub(crate) mod scripted;
pub mod ssh;

use crate::core::types::{Machine, TransportKind};
use indexmap::IndexMap;
use std::io::Write;
use std::process::{Command, Stdio};

/// Output from executing a command on a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Synthetic failure for a dispatch that never produced process output.
    pub fn dispatch_error(error: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: error.into(),
        }
    }

    /// Trimmed stdout if non-empty, else trimmed stderr.
    pub fn output(&self) -> &str {
        let stdout = self.stdout.trim();
        if stdout.is_empty() {
            self.stderr.trim()
        } else {
            stdout
        }
    }
}

/// Runs one shell command on one named machine.
///
/// `Err` means the command could not be dispatched at all; callers downgrade it
/// to a failed `ExecOutput`.
pub trait Transport {
    fn exec(&self, machine: &str, command: &str) -> Result<ExecOutput, String>;
}

/// Transport over the lab inventory, choosing per machine.
#[derive(Debug, Clone, Default)]
pub struct LabTransport {
    machines: IndexMap<String, Machine>,
}

impl LabTransport {
    pub fn new(machines: IndexMap<String, Machine>) -> Self {
        Self { machines }
    }
}

impl Transport for LabTransport {
    fn exec(&self, machine: &str, command: &str) -> Result<ExecOutput, String> {
        let target = self
            .machines
            .get(machine)
            .ok_or_else(|| format!("unknown machine '{}'", machine))?;

        tracing::debug!(machine, transport = %target.transport, "dispatching command");
        match target.transport {
            TransportKind::Container => container::exec_container(machine, target, command),
            TransportKind::Ssh => ssh::exec_ssh(machine, target, command),
            TransportKind::Local => local::exec_local(command),
        }
    }
}

/// Spawn `cmd`, pipe `script` to its stdin and collect the output.
pub(crate) fn run_piped(mut cmd: Command, script: &str, what: &str) -> Result<ExecOutput, String> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn {}: {}", what, e))?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("{} wait error: {}", what, e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
