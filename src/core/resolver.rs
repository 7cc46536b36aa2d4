//! RR-003: Parameter substitution and call-graph ordering.
//!
//! Resolves `<$NAME:default>` placeholders against a tiered parameter mapping
//! (action defaults → per-command defaults → caller overrides, later wins).
//! Builds the action call graph from `call` nodes and orders it with Kahn's
//! algorithm, alphabetical tie-breaking, so recursive definitions are reported.

use super::types::*;
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\$(\w+)(?::([^>]*))?>").expect("placeholder pattern is valid")
});

/// Result of substituting one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub text: String,
    /// Parameter names (with `$`) that had neither a value nor a default
    pub missing: Vec<String>,
}

/// Normalize a parameter key to its `$NAME` form.
pub fn param_key(key: &str) -> String {
    if key.starts_with('$') {
        key.to_string()
    } else {
        format!("${}", key)
    }
}

/// Convert a raw YAML mapping into `Params`, normalizing keys.
pub fn params_from_yaml<'a, I>(entries: I) -> Params
where
    I: IntoIterator<Item = (&'a String, &'a serde_yaml_ng::Value)>,
{
    entries
        .into_iter()
        .map(|(k, v)| (param_key(k), yaml_value_to_string(v)))
        .collect()
}

/// Collect embedded defaults from every `<$NAME:default>` token in `text`.
/// Tokens without a default (`<$NAME>`, `<$NAME:>`) contribute nothing.
pub fn extract_embedded_defaults(text: &str) -> Params {
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| {
            let default = caps.get(2)?.as_str();
            if default.is_empty() {
                return None;
            }
            Some((format!("${}", &caps[1]), default.to_string()))
        })
        .collect()
}

/// Merge scopes in order; later scopes override earlier ones.
pub fn merge_scopes(scopes: &[&Params]) -> Params {
    let mut merged = Params::new();
    for scope in scopes {
        for (k, v) in scope.iter() {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

/// Substitute every placeholder in `template`.
///
/// Each token becomes the mapping's value, else its embedded default, else
/// `<$NAME:?>`. Missing names are warned about and returned.
pub fn resolve_template(template: &str, params: &Params) -> Resolved {
    let mut missing = Vec::new();
    let text = PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = format!("${}", &caps[1]);
            if let Some(value) = params.get(&key) {
                return value.clone();
            }
            match caps.get(2).map(|m| m.as_str()) {
                Some(default) if !default.is_empty() => default.to_string(),
                _ => {
                    tracing::warn!(parameter = %key, "missing parameter, dispatching placeholder");
                    if !missing.contains(&key) {
                        missing.push(key.clone());
                    }
                    format!("<{}:?>", key)
                }
            }
        })
        .into_owned();

    Resolved { text, missing }
}

/// A command and its expectation after substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub command: String,
    pub expected: Option<String>,
    pub missing: Vec<String>,
}

impl ResolvedCommand {
    /// Error marker for a trace node when any parameter went unresolved.
    pub fn missing_marker(&self) -> Option<String> {
        if self.missing.is_empty() {
            return None;
        }
        Some(format!("missing parameter {}", self.missing.join(", ")))
    }
}

/// Substitute a command and its optional expected text with the same scope.
pub fn resolve_command(text: &str, expected: Option<&str>, params: &Params) -> ResolvedCommand {
    let command = resolve_template(text, params);
    let mut missing = command.missing;
    let expected = expected.map(|e| {
        let r = resolve_template(e, params);
        for key in r.missing {
            if !missing.contains(&key) {
                missing.push(key);
            }
        }
        r.text
    });
    ResolvedCommand {
        command: command.text,
        expected,
        missing,
    }
}

/// Action names referenced by `call` nodes of one action, sorted and deduplicated.
pub fn call_targets(def: &ActionDefinition) -> Vec<String> {
    let targets: BTreeSet<String> = def
        .commands
        .iter()
        .filter_map(|node| match node {
            CommandNode::Call { action, .. } => Some(action.clone()),
            _ => None,
        })
        .collect();
    targets.into_iter().collect()
}

/// Order actions so every callee precedes its callers.
/// Uses Kahn's algorithm with alphabetical tie-breaking for determinism.
/// Calls to actions outside the catalogue are ignored here; validation reports them.
pub fn build_call_order(actions: &ActionCatalogue) -> Result<Vec<String>, String> {
    let names: Vec<String> = actions.keys().cloned().collect();
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut callers: HashMap<String, Vec<String>> = HashMap::new();

    for name in &names {
        in_degree.insert(name.clone(), 0);
        callers.insert(name.clone(), Vec::new());
    }

    // Edge callee → caller: the caller becomes ready once its callees are ordered.
    for (name, def) in actions {
        for callee in call_targets(def) {
            if let Some(list) = callers.get_mut(&callee) {
                list.push(name.clone());
                *in_degree.entry(name.clone()).or_insert(0) += 1;
            }
        }
    }

    let mut zero_degree: Vec<String> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(name, _)| name.clone())
        .collect();
    zero_degree.sort();
    let mut queue: VecDeque<String> = zero_degree.into_iter().collect();

    let mut order = Vec::new();
    while let Some(current) = queue.pop_front() {
        order.push(current.clone());

        let mut next_ready: Vec<String> = Vec::new();
        if let Some(list) = callers.get(&current) {
            for caller in list {
                if let Some(degree) = in_degree.get_mut(caller) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(caller.clone());
                    }
                }
            }
        }
        next_ready.sort();
        queue.extend(next_ready);
    }

    if order.len() != names.len() {
        let ordered: HashSet<&String> = order.iter().collect();
        let mut cycle_members: Vec<&str> = names
            .iter()
            .filter(|n| !ordered.contains(n))
            .map(|s| s.as_str())
            .collect();
        cycle_members.sort_unstable();
        return Err(format!(
            "call cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order)
}
