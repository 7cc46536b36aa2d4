//! RR-005: Plan orchestrator.
//!
//! Runs a plan's `need` phase, then its `actions` phase. The first failing
//! step ends the plan. Timeouts are compared after each step returns; an
//! in-flight command is never preempted.

use super::executor::{expectation_met, Executor};
use super::resolver;
use super::types::*;
use crate::trace::{Trace, TraceKind, TraceNode};
use std::time::Duration;

/// Error marker when a plan outlives `plan_timeout`.
pub const PLAN_TIMEOUT: &str = "plan timeout exceeded";

/// Result of one plan invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRun {
    pub result: Outcome,
    /// Wall-clock time from plan start to plan end.
    pub elapsed: Duration,
    pub trace: Trace,
    pub error: Option<String>,
}

/// Runs plans, delegating action steps to an `Executor`.
pub struct PlanRunner<'a> {
    plans: &'a PlanCatalogue,
    executor: &'a Executor<'a>,
    defaults: Params,
}

impl<'a> PlanRunner<'a> {
    pub fn new(plans: &'a PlanCatalogue, executor: &'a Executor<'a>) -> Self {
        Self {
            plans,
            executor,
            defaults: Params::new(),
        }
    }

    /// Lab-wide parameters, below plan and step parameters.
    pub fn with_defaults(mut self, defaults: Params) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn run_plan(&self, name: &str) -> PlanRun {
        let Some(plan) = self.plans.get(name) else {
            tracing::warn!(plan = name, "unknown plan");
            return PlanRun {
                result: Outcome::Fail,
                elapsed: Duration::ZERO,
                trace: Trace::new(),
                error: Some(format!("unknown plan '{}'", name)),
            };
        };

        let clock = self.executor.clock();
        let start = clock.now();
        let mut trace = Trace::new();
        let mut result = Outcome::Success;

        for (phase, steps) in [(Phase::Need, &plan.need), (Phase::Actions, &plan.actions)] {
            let node = self.run_phase(plan, phase, steps, start);
            let ok = node.is_success();
            trace.insert(phase.to_string(), node);
            if !ok {
                result = Outcome::Fail;
                break;
            }
        }

        let elapsed = clock.since(start);
        tracing::info!(plan = name, result = %result, seconds = elapsed.as_secs_f64(), "plan finished");
        PlanRun {
            result,
            elapsed,
            trace,
            error: None,
        }
    }

    fn run_phase(
        &self,
        plan: &PlanDefinition,
        phase: Phase,
        steps: &[PlanStep],
        plan_start: Duration,
    ) -> TraceNode {
        let clock = self.executor.clock();
        let phase_start = clock.now();
        let mut node = TraceNode::new(TraceKind::Phase {}, Outcome::Success, Duration::ZERO);
        tracing::debug!(%phase, steps = steps.len(), "phase started");

        for (i, step) in steps.iter().enumerate() {
            let entry = self.run_step(plan, step);
            let ok = entry.is_success();
            node.children.insert((i + 1).to_string(), entry);
            if !ok {
                node.result = Outcome::Fail;
                break;
            }
            if let Some(limit) = plan.plan_timeout {
                if clock.since(plan_start) > limit {
                    tracing::warn!(%phase, limit = limit.as_secs_f64(), "plan timeout exceeded");
                    node.result = Outcome::Fail;
                    node.error = Some(PLAN_TIMEOUT.to_string());
                    break;
                }
            }
        }

        node.elapsed = clock.since(phase_start);
        node
    }

    fn run_step(&self, plan: &PlanDefinition, step: &PlanStep) -> TraceNode {
        let clock = self.executor.clock();
        let start = clock.now();
        let params = resolver::merge_scopes(&[&self.defaults, &plan.parameters, &step.parameters]);

        let (mut node, timeout_marker) = match &step.kind {
            StepKind::Action { name, expected } => {
                let run = self.executor.run_action(&step.machine, name, &params);
                let mut node = TraceNode::new(
                    TraceKind::ActionStep {
                        action: name.clone(),
                        machine: step.machine.clone(),
                        expected: *expected,
                    },
                    Outcome::from_bool(run.result == *expected),
                    Duration::ZERO,
                );
                node.error = run.error;
                node.children = run.trace;
                (node, "Action timeout")
            }
            StepKind::Command { text, expected } => {
                let resolved = resolver::resolve_command(text, expected.as_deref(), &params);
                let missing = resolved.missing_marker();
                let (command, expected) = (resolved.command, resolved.expected);
                let dispatch = self.executor.dispatch(&step.machine, &command);
                let output = dispatch.output.output().to_string();
                let ok = dispatch.success() && expectation_met(&output, expected.as_deref());
                let mut node = TraceNode::new(
                    TraceKind::CommandStep {
                        command,
                        machine: step.machine.clone(),
                        expected,
                    },
                    Outcome::from_bool(ok),
                    Duration::ZERO,
                );
                node.output = Some(output);
                node.error = dispatch.error.or(missing);
                (node, "Command timeout")
            }
        };

        node.elapsed = clock.since(start);
        if let Some(limit) = step.timeout {
            if node.elapsed > limit {
                tracing::warn!(
                    machine = %step.machine,
                    limit = limit.as_secs_f64(),
                    seconds = node.elapsed.as_secs_f64(),
                    "{}",
                    timeout_marker
                );
                node.result = Outcome::Fail;
                node.error = Some(timeout_marker.to_string());
            }
        }
        node
    }
}
