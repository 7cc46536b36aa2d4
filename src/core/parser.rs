//! RR-002: Catalogue loading and lab validation.
//!
//! Turns the action and plan catalogues into closed Rust types:
//! - Shorthand command forms (string, list, record) become `SimpleCommand`
//! - `operator` records become compound groups, `call` records become calls
//! - Ordering tokens are sorted (numeric tokens numerically) before flattening
//!
//! The first malformed entry aborts the whole load. Cross-references between
//! the lab file and the catalogues are checked separately by [`validate_lab`].

use super::resolver;
use super::types::*;
use serde_yaml_ng::{Mapping, Value};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Malformed catalogue entry.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("action '{action}': unsupported operator '{operator}'")]
    Operator { action: String, operator: String },

    #[error("action '{action}' entry {entry}: {reason}")]
    Command {
        action: String,
        entry: String,
        reason: String,
    },

    #[error("plan '{plan}' {phase} step {entry}: {reason}")]
    Step {
        plan: String,
        phase: Phase,
        entry: String,
        reason: String,
    },

    #[error("{0}")]
    Structure(String),
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ============================================================================
// Lab file
// ============================================================================

/// Parse a lab.yaml file from disk.
pub fn parse_lab_file(path: &Path) -> Result<LabConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_lab(&content)
}

/// Parse a lab.yaml from a string.
pub fn parse_lab(yaml: &str) -> Result<LabConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

// ============================================================================
// Ordering tokens
// ============================================================================

/// Render a mapping key as an ordering token or name.
fn key_string(key: &Value) -> String {
    yaml_value_to_string(key)
}

/// Integer-like tokens sort numerically and before all other tokens.
pub fn order_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Entries of a mapping sorted by ordering token, skipping reserved keys.
fn sorted_entries<'a>(map: &'a Mapping, reserved: &[&str]) -> Vec<(String, &'a Value)> {
    let mut entries: Vec<(String, &Value)> = map
        .iter()
        .map(|(k, v)| (key_string(k), v))
        .filter(|(k, _)| !reserved.contains(&k.as_str()))
        .collect();
    entries.sort_by(|(a, _), (b, _)| order_cmp(a, b));
    entries
}

/// Read an optional `parameters` mapping into normalized `Params`.
fn mapping_params(value: Option<&Value>) -> Result<Params, String> {
    match value {
        None | Some(Value::Null) => Ok(Params::new()),
        Some(Value::Mapping(map)) => Ok(map
            .iter()
            .map(|(k, v)| (resolver::param_key(&key_string(k)), yaml_value_to_string(v)))
            .collect()),
        Some(_) => Err("parameters must be a mapping".to_string()),
    }
}

/// Read an optional non-negative number of seconds. Zero means no limit.
fn seconds(value: Option<&Value>, field: &str) -> Result<Option<Duration>, String> {
    let invalid = || format!("'{}' must be a non-negative number of seconds", field);
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let secs = v.as_f64().ok_or_else(invalid)?;
            let limit = Duration::try_from_secs_f64(secs).map_err(|_| invalid())?;
            Ok(Some(limit).filter(|d| !d.is_zero()))
        }
    }
}

/// Optional scalar rendered as text; null means absent.
fn optional_text(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(v) => Some(yaml_value_to_string(v)),
    }
}

// ============================================================================
// Action catalogue
// ============================================================================

/// Parse an action catalogue file from disk.
pub fn parse_actions_file(path: &Path) -> Result<ActionCatalogue, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_actions(&content)
}

/// Parse an action catalogue from a string.
pub fn parse_actions(yaml: &str) -> Result<ActionCatalogue, DefinitionError> {
    let mut catalogue = ActionCatalogue::new();
    if yaml.trim().is_empty() {
        return Ok(catalogue);
    }
    let root: Value = serde_yaml_ng::from_str(yaml)?;

    let actions = match root.get("actions") {
        None | Some(Value::Null) => return Ok(catalogue),
        Some(Value::Mapping(map)) => map,
        Some(_) => {
            return Err(DefinitionError::Structure(
                "'actions' must be a mapping".to_string(),
            ))
        }
    };

    for (name, body) in actions {
        let name = key_string(name);
        if name.parse::<i64>().is_ok() {
            tracing::warn!(action = %name, "numeric action name, possibly a misplaced command");
        }
        let definition = parse_action(&name, body)?;
        catalogue.insert(name, definition);
    }

    Ok(catalogue)
}

fn parse_action(name: &str, body: &Value) -> Result<ActionDefinition, DefinitionError> {
    let command_err = |entry: &str, reason: String| DefinitionError::Command {
        action: name.to_string(),
        entry: entry.to_string(),
        reason,
    };

    match body {
        // A bare command or a single shorthand list is a one-command action.
        Value::String(_) | Value::Sequence(_) => {
            let simple = parse_simple(body).map_err(|r| command_err("1", r))?;
            Ok(ActionDefinition {
                parameters: Params::new(),
                commands: vec![CommandNode::Simple(simple)],
            })
        }
        Value::Mapping(map) => {
            let parameters =
                mapping_params(map.get("parameters")).map_err(|r| command_err("parameters", r))?;
            let mut commands = Vec::new();
            for (entry, value) in sorted_entries(map, &["parameters"]) {
                commands.push(parse_node(name, &entry, value)?);
            }
            Ok(ActionDefinition {
                parameters,
                commands,
            })
        }
        _ => Err(command_err(
            "-",
            "action body must be a command, a list or a mapping".to_string(),
        )),
    }
}

fn parse_node(action: &str, entry: &str, value: &Value) -> Result<CommandNode, DefinitionError> {
    let command_err = |reason: String| DefinitionError::Command {
        action: action.to_string(),
        entry: entry.to_string(),
        reason,
    };

    let map = match value {
        Value::Mapping(map) => map,
        _ => return parse_simple(value).map(CommandNode::Simple).map_err(command_err),
    };

    if let Some(op) = map.get("operator") {
        let op_text = yaml_value_to_string(op);
        let operator = Operator::parse(&op_text).ok_or_else(|| DefinitionError::Operator {
            action: action.to_string(),
            operator: op_text.clone(),
        })?;
        let mut children = Vec::new();
        for (sub, child) in sorted_entries(map, &["operator"]) {
            let simple = parse_simple(child).map_err(|reason| DefinitionError::Command {
                action: action.to_string(),
                entry: format!("{}.{}", entry, sub),
                reason,
            })?;
            children.push(simple);
        }
        if children.is_empty() {
            return Err(command_err(format!("{} group has no commands", operator)));
        }
        return Ok(CommandNode::Compound { operator, children });
    }

    if let Some(target) = map.get("call") {
        let target = target
            .as_str()
            .ok_or_else(|| command_err("'call' must name an action".to_string()))?;
        let expected = match optional_text(map.get("expected")) {
            None => Outcome::Success,
            Some(text) => Outcome::parse(&text).ok_or_else(|| {
                command_err(format!("call expected must be Success or Fail, got '{}'", text))
            })?,
        };
        let params = mapping_params(map.get("parameters")).map_err(command_err)?;
        return Ok(CommandNode::Call {
            action: target.to_string(),
            expected,
            params,
        });
    }

    parse_simple(value).map(CommandNode::Simple).map_err(command_err)
}

/// Normalize one shorthand form into a `SimpleCommand`.
fn parse_simple(value: &Value) -> Result<SimpleCommand, String> {
    let (text, expected, explicit) = match value {
        Value::String(s) => (s.clone(), None, Params::new()),
        Value::Sequence(items) => {
            if items.len() != 2 && items.len() != 3 {
                return Err(format!(
                    "list form must be [command, expected] or [command, expected, params], got {} element(s)",
                    items.len()
                ));
            }
            let text = items[0]
                .as_str()
                .ok_or_else(|| "list form command must be a string".to_string())?
                .to_string();
            let expected = optional_text(items.get(1));
            let explicit = mapping_params(items.get(2))?;
            (text, expected, explicit)
        }
        Value::Mapping(map) => {
            if map.contains_key("call") {
                return Err("call is not allowed inside a compound group".to_string());
            }
            let text = match map.get("command") {
                Some(Value::String(s)) => s.clone(),
                Some(_) => return Err("'command' must be a string".to_string()),
                None => return Err("record has neither 'command' nor 'call'".to_string()),
            };
            let expected = optional_text(map.get("expected"));
            let explicit = mapping_params(map.get("parameters"))?;
            (text, expected, explicit)
        }
        _ => return Err("unsupported command form".to_string()),
    };

    let embedded = resolver::extract_embedded_defaults(&text);
    let params = resolver::merge_scopes(&[&embedded, &explicit]);
    Ok(SimpleCommand {
        text,
        expected: expected.filter(|e| !e.is_empty()),
        params,
    })
}

// ============================================================================
// Plan catalogue
// ============================================================================

/// Parse a plan catalogue file from disk.
pub fn parse_plans_file(path: &Path) -> Result<PlanCatalogue, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_plans(&content)
}

/// Parse a plan catalogue from a string.
pub fn parse_plans(yaml: &str) -> Result<PlanCatalogue, DefinitionError> {
    let mut catalogue = PlanCatalogue::new();
    if yaml.trim().is_empty() {
        return Ok(catalogue);
    }
    let root: Value = serde_yaml_ng::from_str(yaml)?;

    let plans = match root.get("plans") {
        None | Some(Value::Null) => return Ok(catalogue),
        Some(Value::Mapping(map)) => map,
        Some(_) => {
            return Err(DefinitionError::Structure(
                "'plans' must be a mapping".to_string(),
            ))
        }
    };

    for (name, body) in plans {
        let name = key_string(name);
        let definition = parse_plan(&name, body)?;
        catalogue.insert(name, definition);
    }

    Ok(catalogue)
}

fn parse_plan(name: &str, body: &Value) -> Result<PlanDefinition, DefinitionError> {
    let plan_err = |reason: String| DefinitionError::Structure(format!("plan '{}': {}", name, reason));

    let map = body
        .as_mapping()
        .ok_or_else(|| plan_err("must be a mapping".to_string()))?;

    let plan_timeout = seconds(map.get("plan_timeout"), "plan_timeout").map_err(plan_err)?;
    let parameters = mapping_params(map.get("parameters")).map_err(plan_err)?;

    let mut plan = PlanDefinition {
        plan_timeout,
        parameters,
        need: Vec::new(),
        actions: Vec::new(),
    };

    for phase in [Phase::Need, Phase::Actions] {
        let section = match map.get(phase.to_string().as_str()) {
            None | Some(Value::Null) => continue,
            Some(Value::Mapping(section)) => section,
            Some(_) => return Err(plan_err(format!("'{}' must be a mapping", phase))),
        };
        let mut steps = Vec::new();
        for (entry, value) in sorted_entries(section, &[]) {
            let step = parse_step(value).map_err(|reason| DefinitionError::Step {
                plan: name.to_string(),
                phase,
                entry,
                reason,
            })?;
            steps.push(step);
        }
        match phase {
            Phase::Need => plan.need = steps,
            Phase::Actions => plan.actions = steps,
        }
    }

    Ok(plan)
}

fn parse_step(value: &Value) -> Result<PlanStep, String> {
    let map = value
        .as_mapping()
        .ok_or_else(|| "step must be a mapping".to_string())?;

    let machine = match map.get("machine") {
        Some(Value::String(m)) if !m.is_empty() => m.clone(),
        Some(Value::Null) | None => return Err("missing 'machine'".to_string()),
        Some(_) => return Err("'machine' must be a machine name".to_string()),
    };

    let expected = optional_text(map.get("expected"));
    let kind = match (map.get("action"), map.get("command")) {
        (Some(action), None) => {
            let name = action
                .as_str()
                .ok_or_else(|| "'action' must name an action".to_string())?;
            let expected = match expected {
                None => Outcome::Success,
                Some(text) => Outcome::parse(&text).ok_or_else(|| {
                    format!("action step expected must be Success or Fail, got '{}'", text)
                })?,
            };
            StepKind::Action {
                name: name.to_string(),
                expected,
            }
        }
        (None, Some(command)) => {
            let text = command
                .as_str()
                .ok_or_else(|| "'command' must be a string".to_string())?;
            StepKind::Command {
                text: text.to_string(),
                expected: expected.filter(|e| !e.is_empty()),
            }
        }
        (Some(_), Some(_)) => return Err("declares both 'action' and 'command'".to_string()),
        (None, None) => return Err("must declare one of 'action' or 'command'".to_string()),
    };

    Ok(PlanStep {
        machine,
        timeout: seconds(map.get("timeout"), "timeout")?,
        parameters: mapping_params(map.get("parameters"))?,
        kind,
    })
}

// ============================================================================
// Cross-reference validation
// ============================================================================

/// Validate a lab against its catalogues. Returns a list of errors (empty = valid).
pub fn validate_lab(
    lab: &LabConfig,
    actions: &ActionCatalogue,
    plans: &PlanCatalogue,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if lab.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", lab.version),
        });
    }

    if lab.name.is_empty() {
        errors.push(ValidationError {
            message: "name must not be empty".to_string(),
        });
    }

    for (name, machine) in &lab.machines {
        if machine.transport == TransportKind::Ssh && machine.addr.is_none() {
            errors.push(ValidationError {
                message: format!("machine '{}' (ssh) has no addr", name),
            });
        }
    }

    for (name, def) in actions {
        for target in resolver::call_targets(def) {
            if !actions.contains_key(&target) {
                errors.push(ValidationError {
                    message: format!("action '{}' calls unknown action '{}'", name, target),
                });
            }
        }
    }

    if let Err(e) = resolver::build_call_order(actions) {
        errors.push(ValidationError { message: e });
    }

    for (name, plan) in plans {
        let phases = [(Phase::Need, &plan.need), (Phase::Actions, &plan.actions)];
        for (phase, steps) in phases {
            for (idx, step) in steps.iter().enumerate() {
                if !lab.machines.contains_key(&step.machine) {
                    errors.push(ValidationError {
                        message: format!(
                            "plan '{}' {} step {} targets unknown machine '{}'",
                            name,
                            phase,
                            idx + 1,
                            step.machine
                        ),
                    });
                }
                if let StepKind::Action { name: action, .. } = &step.kind {
                    if !actions.contains_key(action) {
                        errors.push(ValidationError {
                            message: format!(
                                "plan '{}' {} step {} references unknown action '{}'",
                                name,
                                phase,
                                idx + 1,
                                action
                            ),
                        });
                    }
                }
            }
        }
    }

    errors
}
