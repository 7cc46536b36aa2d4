//! RR-012: Container execution transport.
//!
//! Runs `<runtime> exec -i <container> sh` and pipes the command on stdin, the
//! same way the SSH transport feeds `bash`. Lab devices are containers managed
//! by an external lifecycle tool; this transport only executes inside them.

use super::{run_piped, ExecOutput};
use crate::core::types::Machine;
use std::process::Command;

/// Container name for a machine: explicit `container`, else the machine name.
pub fn container_name<'a>(name: &'a str, machine: &'a Machine) -> &'a str {
    machine.container.as_deref().unwrap_or(name)
}

fn build_command(name: &str, machine: &Machine) -> Command {
    let mut cmd = Command::new(&machine.runtime);
    cmd.args(["exec", "-i", container_name(name, machine), "sh"]);
    cmd
}

/// Execute a command inside a lab container.
pub fn exec_container(name: &str, machine: &Machine, script: &str) -> Result<ExecOutput, String> {
    let cmd = build_command(name, machine);
    run_piped(
        cmd,
        script,
        &format!("{} exec {}", machine.runtime, container_name(name, machine)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rr012_container_name_default() {
        let machine = Machine::default();
        assert_eq!(container_name("kali", &machine), "kali");
    }

    #[test]
    fn test_rr012_container_name_explicit() {
        let machine = Machine {
            container: Some("lab3_kali_1".to_string()),
            ..Machine::default()
        };
        assert_eq!(container_name("kali", &machine), "lab3_kali_1");
    }

    #[test]
    fn test_rr012_build_command_args() {
        let machine = Machine {
            runtime: "podman".to_string(),
            ..Machine::default()
        };
        let cmd = build_command("r1", &machine);
        assert_eq!(cmd.get_program(), "podman");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args, vec!["exec", "-i", "r1", "sh"]);
    }

    #[test]
    fn test_rr012_missing_runtime_is_dispatch_error() {
        let machine = Machine {
            runtime: "rangerun-no-such-runtime".to_string(),
            ..Machine::default()
        };
        let err = exec_container("kali", &machine, "true").unwrap_err();
        assert!(err.contains("failed to spawn"));
    }
}
