//! Scripted transport for executor and plan tests.

use super::{ExecOutput, Transport};
use crate::core::clock::ManualClock;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Replays canned responses keyed by exact command text and advances a manual
/// clock by each command's simulated duration. Unscripted commands succeed
/// with empty output.
pub struct ScriptedTransport<'a> {
    clock: &'a ManualClock,
    responses: HashMap<String, Result<ExecOutput, String>>,
    durations: HashMap<String, Duration>,
    interrupts: HashMap<String, Arc<AtomicBool>>,
    calls: RefCell<Vec<(String, String)>>,
}

impl<'a> ScriptedTransport<'a> {
    pub fn new(clock: &'a ManualClock) -> Self {
        Self {
            clock,
            responses: HashMap::new(),
            durations: HashMap::new(),
            interrupts: HashMap::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn respond(mut self, command: &str, exit_code: i32, stdout: &str) -> Self {
        self.responses.insert(
            command.to_string(),
            Ok(ExecOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
        self
    }

    pub fn respond_stderr(mut self, command: &str, exit_code: i32, stderr: &str) -> Self {
        self.responses.insert(
            command.to_string(),
            Ok(ExecOutput {
                exit_code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
        );
        self
    }

    pub fn unreachable(mut self, command: &str, error: &str) -> Self {
        self.responses
            .insert(command.to_string(), Err(error.to_string()));
        self
    }

    pub fn takes(mut self, command: &str, secs: f64) -> Self {
        self.durations
            .insert(command.to_string(), Duration::from_secs_f64(secs));
        self
    }

    /// Raise `flag` while `command` is in flight.
    pub fn interrupt_on(mut self, command: &str, flag: Arc<AtomicBool>) -> Self {
        self.interrupts.insert(command.to_string(), flag);
        self
    }

    /// Commands dispatched so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(_, c)| c.clone()).collect()
    }

    /// `(machine, command)` pairs dispatched so far, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.borrow().clone()
    }
}

impl Transport for ScriptedTransport<'_> {
    fn exec(&self, machine: &str, command: &str) -> Result<ExecOutput, String> {
        self.calls
            .borrow_mut()
            .push((machine.to_string(), command.to_string()));
        if let Some(d) = self.durations.get(command) {
            self.clock.advance(*d);
        }
        if let Some(flag) = self.interrupts.get(command) {
            flag.store(true, Ordering::SeqCst);
        }
        self.responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| Ok(ExecOutput::default()))
    }
}
