//! RR-001: Core types for lab configuration, catalogues, outcomes and run events.
//!
//! The lab file and run events derive Serialize/Deserialize. Catalogue types are
//! built by the loaders in [`super::parser`] from raw YAML and are never
//! deserialized directly, so the shorthand forms stay confined to parsing.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Resolved parameter mapping: `$NAME` → value.
pub type Params = HashMap<String, String>;

// ============================================================================
// Top-level lab.yaml
// ============================================================================

/// Lab configuration: the machines and where the catalogues live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Lab name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Machine inventory
    #[serde(default)]
    pub machines: IndexMap<String, Machine>,

    /// Action catalogue path, relative to the lab file
    #[serde(default = "default_actions_file")]
    pub actions: String,

    /// Plan catalogue path, relative to the lab file
    #[serde(default = "default_plans_file")]
    pub plans: String,

    /// Trace log directory, relative to the lab file
    #[serde(default = "default_log_dir")]
    pub logs: String,

    /// Lab-wide parameter overrides (lowest caller tier)
    #[serde(default)]
    pub params: HashMap<String, serde_yaml_ng::Value>,
}

fn default_actions_file() -> String {
    "actions.yaml".to_string()
}

fn default_plans_file() -> String {
    "plans.yaml".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

// ============================================================================
// Machines
// ============================================================================

/// A lab machine reachable through one of the transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    /// How commands reach the machine
    #[serde(default)]
    pub transport: TransportKind,

    /// Container name (defaults to the machine name)
    #[serde(default)]
    pub container: Option<String>,

    /// Container runtime binary
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Network address (ssh only)
    #[serde(default)]
    pub addr: Option<String>,

    /// SSH user
    #[serde(default = "default_user")]
    pub user: String,

    /// Path to SSH private key
    #[serde(default)]
    pub ssh_key: Option<String>,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            container: None,
            runtime: default_runtime(),
            addr: None,
            user: default_user(),
            ssh_key: None,
        }
    }
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

/// Transport selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Container,
    Ssh,
    Local,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::Ssh => write!(f, "ssh"),
            Self::Local => write!(f, "local"),
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Terminal result of a command, group, call, step, action or plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Fail,
}

impl Outcome {
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Self::Success
        } else {
            Self::Fail
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Parse a declared expectation. Only the exact outcome names are accepted.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Success" => Some(Self::Success),
            "Fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Fail => write!(f, "Fail"),
        }
    }
}

/// Boolean operator of a compound group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl Operator {
    /// Case-insensitive parse of `AND` / `OR`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

// ============================================================================
// Action catalogue
// ============================================================================

/// All actions, in declaration order.
pub type ActionCatalogue = IndexMap<String, ActionDefinition>;

/// One named action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionDefinition {
    /// Action-level defaults (lowest tier)
    pub parameters: Params,

    /// Commands in execution order
    pub commands: Vec<CommandNode>,
}

/// A single shell command with its success criterion.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleCommand {
    /// Command template
    pub text: String,

    /// Substring that must appear in the output
    pub expected: Option<String>,

    /// Per-command defaults: embedded `<$NAME:default>` tokens plus explicit params
    pub params: Params,
}

/// A node of an action's command tree.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandNode {
    Simple(SimpleCommand),
    Compound {
        operator: Operator,
        children: Vec<SimpleCommand>,
    },
    Call {
        action: String,
        expected: Outcome,
        params: Params,
    },
}

// ============================================================================
// Plan catalogue
// ============================================================================

/// All plans, in declaration order.
pub type PlanCatalogue = IndexMap<String, PlanDefinition>;

/// One named plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDefinition {
    /// Wall-clock budget for the whole plan
    pub plan_timeout: Option<Duration>,

    /// Plan-wide step overrides (below step parameters)
    pub parameters: Params,

    /// Prerequisite steps
    pub need: Vec<PlanStep>,

    /// Main steps
    pub actions: Vec<PlanStep>,
}

/// A single plan step.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    /// Target machine
    pub machine: String,

    /// Wall-clock budget for this step
    pub timeout: Option<Duration>,

    /// Step overrides
    pub parameters: Params,

    /// What the step runs
    pub kind: StepKind,
}

/// Plan step target.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// Run a catalogue action; its outcome must equal `expected`.
    Action { name: String, expected: Outcome },
    /// Run one shell command; `expected` is an output substring.
    Command {
        text: String,
        expected: Option<String>,
    },
}

/// Plan phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Need,
    Actions,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Need => write!(f, "need"),
            Self::Actions => write!(f, "actions"),
        }
    }
}

// ============================================================================
// Run events
// ============================================================================

/// Invocation event for the JSONL run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    ActionStarted {
        machine: String,
        action: String,
        run_id: String,
    },
    ActionCompleted {
        machine: String,
        action: String,
        run_id: String,
        result: Outcome,
        total_seconds: f64,
    },
    PlanStarted {
        plan: String,
        run_id: String,
    },
    PlanCompleted {
        plan: String,
        run_id: String,
        result: Outcome,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for parameter substitution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => serde_yaml_ng::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rr001_lab_parse() {
        let yaml = r#"
version: "1.0"
name: lab3
machines:
  kali:
    container: lab3_kali
  r1:
    transport: ssh
    addr: 10.0.0.1
    user: admin
  host:
    transport: local
params:
  $PORT: 2222
"#;
        let lab: LabConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(lab.name, "lab3");
        assert_eq!(lab.machines.len(), 3);
        assert_eq!(lab.machines["kali"].transport, TransportKind::Container);
        assert_eq!(lab.machines["kali"].container.as_deref(), Some("lab3_kali"));
        assert_eq!(lab.machines["r1"].transport, TransportKind::Ssh);
        assert_eq!(lab.machines["r1"].user, "admin");
        assert_eq!(lab.machines["host"].transport, TransportKind::Local);
        assert_eq!(lab.actions, "actions.yaml");
        assert_eq!(lab.plans, "plans.yaml");
        assert_eq!(lab.logs, "logs");
    }

    #[test]
    fn test_rr001_machine_defaults() {
        let m: Machine = serde_yaml_ng::from_str("{}").unwrap();
        assert_eq!(m.transport, TransportKind::Container);
        assert_eq!(m.runtime, "docker");
        assert_eq!(m.user, "root");
        assert!(m.addr.is_none());
    }

    #[test]
    fn test_rr001_outcome_parse_and_display() {
        assert_eq!(Outcome::parse("Success"), Some(Outcome::Success));
        assert_eq!(Outcome::parse("Fail"), Some(Outcome::Fail));
        assert_eq!(Outcome::parse("success"), None);
        assert_eq!(Outcome::Success.to_string(), "Success");
        assert_eq!(Outcome::from_bool(false), Outcome::Fail);
        assert!(Outcome::Success.is_success());
    }

    #[test]
    fn test_rr001_operator_parse() {
        assert_eq!(Operator::parse("AND"), Some(Operator::And));
        assert_eq!(Operator::parse("or"), Some(Operator::Or));
        assert_eq!(Operator::parse("XOR"), None);
        assert_eq!(Operator::Or.to_string(), "OR");
    }

    #[test]
    fn test_rr001_outcome_serde() {
        let yaml = serde_yaml_ng::to_string(&Outcome::Fail).unwrap();
        assert_eq!(yaml.trim(), "Fail");
        let json = serde_json::to_string(&Operator::And).unwrap();
        assert_eq!(json, "\"AND\"");
    }

    #[test]
    fn test_rr001_run_event_serde() {
        let event = RunEvent::ActionCompleted {
            machine: "kali".to_string(),
            action: "check".to_string(),
            run_id: "r-abc".to_string(),
            result: Outcome::Success,
            total_seconds: 0.5,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"action_completed\""));
        assert!(json.contains("\"result\":\"Success\""));
    }

    #[test]
    fn test_rr001_yaml_value_to_string() {
        assert_eq!(
            yaml_value_to_string(&serde_yaml_ng::Value::String("hello".into())),
            "hello"
        );
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Bool(true)), "true");
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Null), "");
        let n: serde_yaml_ng::Value = serde_yaml_ng::from_str("2222").unwrap();
        assert_eq!(yaml_value_to_string(&n), "2222");
    }

    #[test]
    fn test_rr001_phase_display() {
        assert_eq!(Phase::Need.to_string(), "need");
        assert_eq!(Phase::Actions.to_string(), "actions");
    }
}
