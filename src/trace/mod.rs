//! RR-007: Execution trace model.
//!
//! A trace mirrors the executed tree. Top-level entries are keyed by 1-based
//! declaration index, compound children by `{index}{letter}` (`"3b"`), plan
//! phases by `need` / `actions`.

pub mod eventlog;
pub mod logger;

use crate::core::types::{Operator, Outcome};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Ordered trace entries.
pub type Trace = IndexMap<String, TraceNode>;

/// What a trace node ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceKind {
    /// Plan step invoking an action.
    ActionStep {
        action: String,
        machine: String,
        expected: Outcome,
    },
    /// Plan step running a single shell command.
    CommandStep {
        command: String,
        machine: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<String>,
    },
    /// Nested action call.
    Call { call: String, expected: Outcome },
    /// AND/OR compound group.
    Group { operator: Operator },
    /// Dispatched shell command.
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<String>,
    },
    /// Plan phase container.
    Phase {},
}

/// One executed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceNode {
    #[serde(flatten)]
    pub kind: TraceKind,

    pub result: Outcome,

    #[serde(
        rename = "time",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub elapsed: Duration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub children: Trace,
}

impl TraceNode {
    /// A node with no output, error or children yet.
    pub fn new(kind: TraceKind, result: Outcome, elapsed: Duration) -> Self {
        Self {
            kind,
            result,
            elapsed,
            output: None,
            error: None,
            children: Trace::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// Trace key for child `child` (0-based) of top-level entry `index` (1-based).
pub fn child_key(index: usize, child: usize) -> String {
    let mut letters = Vec::new();
    let mut n = child + 1;
    while n > 0 {
        n -= 1;
        letters.push(char::from(b'a' + (n % 26) as u8));
        n /= 26;
    }
    let suffix: String = letters.into_iter().rev().collect();
    format!("{}{}", index, suffix)
}

/// Seconds rounded to two decimals.
pub fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

pub(crate) fn serialize_secs<S: Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round_secs(*elapsed))
}

pub(crate) fn deserialize_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(d)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_node(command: &str, expected: Option<&str>, ok: bool) -> TraceNode {
        TraceNode::new(
            TraceKind::Command {
                command: command.to_string(),
                expected: expected.map(String::from),
            },
            Outcome::from_bool(ok),
            Duration::from_millis(1234),
        )
    }

    #[test]
    fn test_rr007_child_keys() {
        assert_eq!(child_key(3, 0), "3a");
        assert_eq!(child_key(3, 1), "3b");
        assert_eq!(child_key(1, 25), "1z");
        assert_eq!(child_key(1, 26), "1aa");
        assert_eq!(child_key(12, 27), "12ab");
    }

    #[test]
    fn test_rr007_round_secs() {
        assert_eq!(round_secs(Duration::from_millis(1234)), 1.23);
        assert_eq!(round_secs(Duration::from_millis(1236)), 1.24);
        assert_eq!(round_secs(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_rr007_command_node_yaml_keys() {
        let mut node = command_node("uptime", Some("up"), true);
        node.output = Some("system up 3 days".to_string());
        let yaml = serde_yaml_ng::to_string(&node).unwrap();
        let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(value["command"].as_str(), Some("uptime"));
        assert_eq!(value["expected"].as_str(), Some("up"));
        assert_eq!(value["output"].as_str(), Some("system up 3 days"));
        assert_eq!(value["result"].as_str(), Some("Success"));
        assert_eq!(value["time"].as_f64(), Some(1.23));
        assert!(value.get("error").is_none());
        assert!(value.get("children").is_none());
    }

    #[test]
    fn test_rr007_group_roundtrip() {
        let mut group = TraceNode::new(
            TraceKind::Group {
                operator: Operator::Or,
            },
            Outcome::Success,
            Duration::from_secs(2),
        );
        group
            .children
            .insert(child_key(2, 0), command_node("ping -c1 r2", Some("1 received"), false));
        group
            .children
            .insert(child_key(2, 1), command_node("ping -c1 r3", None, true));

        let yaml = serde_yaml_ng::to_string(&group).unwrap();
        let back: TraceNode = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back.kind, group.kind);
        assert_eq!(back.result, Outcome::Success);
        let keys: Vec<_> = back.children.keys().cloned().collect();
        assert_eq!(keys, vec!["2a", "2b"]);
        assert_eq!(back.children["2a"].result, Outcome::Fail);
        assert_eq!(
            back.children["2b"].kind,
            TraceKind::Command {
                command: "ping -c1 r3".to_string(),
                expected: None,
            }
        );
    }

    #[test]
    fn test_rr007_step_kinds_roundtrip() {
        let action_step = TraceNode::new(
            TraceKind::ActionStep {
                action: "check".to_string(),
                machine: "r1".to_string(),
                expected: Outcome::Success,
            },
            Outcome::Success,
            Duration::from_secs(1),
        );
        let yaml = serde_yaml_ng::to_string(&action_step).unwrap();
        let back: TraceNode = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back.kind, action_step.kind);

        let mut cmd_step = TraceNode::new(
            TraceKind::CommandStep {
                command: "vtysh -c 'show ip route'".to_string(),
                machine: "r2".to_string(),
                expected: Some("O>*".to_string()),
            },
            Outcome::Fail,
            Duration::from_secs(31),
        );
        cmd_step.error = Some("Command timeout".to_string());
        let yaml = serde_yaml_ng::to_string(&cmd_step).unwrap();
        let back: TraceNode = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back.kind, cmd_step.kind);
        assert_eq!(back.error.as_deref(), Some("Command timeout"));
    }

    #[test]
    fn test_rr007_call_node_roundtrip() {
        let mut call = TraceNode::new(
            TraceKind::Call {
                call: "configure".to_string(),
                expected: Outcome::Success,
            },
            Outcome::Fail,
            Duration::from_millis(500),
        );
        call.children
            .insert("1".to_string(), command_node("false", None, false));
        let yaml = serde_yaml_ng::to_string(&call).unwrap();
        let back: TraceNode = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back.kind, call.kind);
        assert_eq!(back.children.len(), 1);
        assert_eq!(back.elapsed, Duration::from_millis(500));
    }
}
