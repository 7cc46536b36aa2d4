//! RR-004: Action executor.
//!
//! Interprets one action against one machine, depth-first and sequentially.
//! Each node is dispatched through the transport, compared against its
//! expectation and recorded in the trace. The first failing top-level node
//! ends the action.

use super::clock::Clock;
use super::resolver;
use super::types::*;
use crate::trace::{child_key, Trace, TraceKind, TraceNode};
use crate::transport::{ExecOutput, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Error marker for a command interrupted by the operator.
pub const INTERRUPTED: &str = "interrupted";

/// Result of one action invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRun {
    pub result: Outcome,
    /// Sum of every dispatched leaf command, nested calls included.
    pub elapsed: Duration,
    pub trace: Trace,
    /// Set when the action could not run at all (unknown action).
    pub error: Option<String>,
}

impl ActionRun {
    fn failed(error: String) -> Self {
        Self {
            result: Outcome::Fail,
            elapsed: Duration::ZERO,
            trace: Trace::new(),
            error: Some(error),
        }
    }
}

/// One dispatched command and what came back.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub output: ExecOutput,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl Dispatch {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.output.success()
    }
}

/// An absent or empty expectation always matches; otherwise it must occur in
/// the output.
pub fn expectation_met(output: &str, expected: Option<&str>) -> bool {
    expected.is_none_or(|e| e.is_empty() || output.contains(e))
}

/// Runs actions from an immutable catalogue.
pub struct Executor<'a> {
    actions: &'a ActionCatalogue,
    transport: &'a dyn Transport,
    clock: &'a dyn Clock,
    interrupt: Option<&'a AtomicBool>,
}

impl<'a> Executor<'a> {
    pub fn new(
        actions: &'a ActionCatalogue,
        transport: &'a dyn Transport,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            actions,
            transport,
            clock,
            interrupt: None,
        }
    }

    /// Observe `flag` for interrupts raised while a command is dispatched.
    pub fn with_interrupt(mut self, flag: &'a AtomicBool) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn clock(&self) -> &'a dyn Clock {
        self.clock
    }

    /// Run `name` on `machine` with caller overrides `call_params`.
    pub fn run_action(&self, machine: &str, name: &str, call_params: &Params) -> ActionRun {
        let mut chain = Vec::new();
        let run = self.run_nested(machine, name, call_params, &mut chain);
        tracing::info!(
            machine,
            action = name,
            result = %run.result,
            seconds = run.elapsed.as_secs_f64(),
            "action finished"
        );
        run
    }

    /// Dispatch one already-substituted command.
    ///
    /// Transport errors become a failed output; an interrupt raised during the
    /// call is consumed and marks the command failed.
    pub fn dispatch(&self, machine: &str, command: &str) -> Dispatch {
        tracing::debug!(machine, command, "dispatch");
        if let Some(flag) = self.interrupt {
            // Only an interrupt raised during this call is charged to it.
            flag.store(false, Ordering::SeqCst);
        }
        let start = self.clock.now();
        let result = self.transport.exec(machine, command);
        let elapsed = self.clock.since(start);

        let (output, mut error) = match result {
            Ok(output) => (output, None),
            Err(e) => {
                tracing::warn!(machine, command, error = %e, "dispatch failed");
                (ExecOutput::dispatch_error(e.clone()), Some(e))
            }
        };

        if let Some(flag) = self.interrupt {
            if flag.swap(false, Ordering::SeqCst) {
                tracing::warn!(machine, command, "interrupted");
                error = Some(INTERRUPTED.to_string());
            }
        }

        Dispatch {
            output,
            elapsed,
            error,
        }
    }

    fn run_nested(
        &self,
        machine: &str,
        name: &str,
        call_params: &Params,
        chain: &mut Vec<String>,
    ) -> ActionRun {
        let Some(def) = self.actions.get(name) else {
            tracing::warn!(machine, action = name, "unknown action");
            return ActionRun::failed(format!("unknown action '{}'", name));
        };

        chain.push(name.to_string());
        let mut run = ActionRun {
            result: Outcome::Success,
            elapsed: Duration::ZERO,
            trace: Trace::new(),
            error: None,
        };

        for (i, node) in def.commands.iter().enumerate() {
            let index = i + 1;
            let entry = match node {
                CommandNode::Simple(cmd) => self.run_simple(machine, def, cmd, call_params),
                CommandNode::Compound { operator, children } => {
                    self.run_compound(machine, def, index, *operator, children, call_params)
                }
                CommandNode::Call {
                    action,
                    expected,
                    params,
                } => self.run_call(machine, action, *expected, params, call_params, chain),
            };

            run.elapsed += entry.elapsed;
            let ok = entry.is_success();
            run.trace.insert(index.to_string(), entry);
            if !ok {
                run.result = Outcome::Fail;
                break;
            }
        }

        chain.pop();
        run
    }

    fn run_simple(
        &self,
        machine: &str,
        def: &ActionDefinition,
        cmd: &SimpleCommand,
        call_params: &Params,
    ) -> TraceNode {
        let params = resolver::merge_scopes(&[&def.parameters, &cmd.params, call_params]);
        let resolved = resolver::resolve_command(&cmd.text, cmd.expected.as_deref(), &params);
        let missing = resolved.missing_marker();
        let (command, expected) = (resolved.command, resolved.expected);

        let dispatch = self.dispatch(machine, &command);
        let output = dispatch.output.output().to_string();
        let result =
            Outcome::from_bool(dispatch.success() && expectation_met(&output, expected.as_deref()));
        tracing::debug!(machine, command = %command, result = %result, "command finished");

        let mut node = TraceNode::new(
            TraceKind::Command { command, expected },
            result,
            dispatch.elapsed,
        );
        node.output = Some(output);
        node.error = dispatch.error.or(missing);
        node
    }

    fn run_compound(
        &self,
        machine: &str,
        def: &ActionDefinition,
        index: usize,
        operator: Operator,
        children: &[SimpleCommand],
        call_params: &Params,
    ) -> TraceNode {
        // AND starts optimistic and stops at the first failure; OR starts
        // failed and stops at the first success.
        let stop_on = match operator {
            Operator::And => Outcome::Fail,
            Operator::Or => Outcome::Success,
        };
        let mut group = TraceNode::new(
            TraceKind::Group { operator },
            match operator {
                Operator::And => Outcome::Success,
                Operator::Or => Outcome::Fail,
            },
            Duration::ZERO,
        );

        for (j, child) in children.iter().enumerate() {
            let entry = self.run_simple(machine, def, child, call_params);
            group.elapsed += entry.elapsed;
            let result = entry.result;
            group.children.insert(child_key(index, j), entry);
            if result == stop_on {
                group.result = stop_on;
                break;
            }
        }
        group
    }

    fn run_call(
        &self,
        machine: &str,
        target: &str,
        expected: Outcome,
        overrides: &Params,
        call_params: &Params,
        chain: &mut Vec<String>,
    ) -> TraceNode {
        let kind = TraceKind::Call {
            call: target.to_string(),
            expected,
        };

        if chain.iter().any(|active| active == target) {
            tracing::warn!(machine, action = target, chain = ?chain, "recursive call");
            let mut node = TraceNode::new(kind, Outcome::Fail, Duration::ZERO);
            node.error = Some(format!(
                "recursive call to '{}' via {}",
                target,
                chain.join(" -> ")
            ));
            return node;
        }

        let params = resolver::merge_scopes(&[call_params, overrides]);
        let nested = self.run_nested(machine, target, &params, chain);
        tracing::debug!(machine, action = target, result = %nested.result, "call returned");

        let mut node = TraceNode::new(
            kind,
            Outcome::from_bool(nested.result == expected),
            nested.elapsed,
        );
        node.error = nested.error;
        node.children = nested.trace;
        node
    }
}
