//! RR-008: Trace persistence. One YAML record per action or plan invocation.
//!
//! Layout under the log directory:
//!   <machine>/actions/<action>/<action>_<YYYYmmdd_HHMMSS>.yaml
//!   plans/<plan>/<plan>_<YYYYmmdd_HHMMSS>.yaml

use super::{deserialize_secs, serialize_secs, Trace};
use crate::core::executor::ActionRun;
use crate::core::orchestrator::PlanRun;
use crate::core::types::Outcome;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Persisted record of one action invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub name: String,
    pub machine: String,
    pub timestamp: String,
    #[serde(serialize_with = "serialize_secs", deserialize_with = "deserialize_secs")]
    pub total_time: Duration,
    pub final_result: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub commands: Trace,
}

impl ActionRecord {
    pub fn new(machine: &str, name: &str, timestamp: String, run: &ActionRun) -> Self {
        Self {
            name: name.to_string(),
            machine: machine.to_string(),
            timestamp,
            total_time: run.elapsed,
            final_result: run.result,
            error: run.error.clone(),
            commands: run.trace.clone(),
        }
    }
}

/// Persisted record of one plan invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub name: String,
    pub timestamp: String,
    #[serde(serialize_with = "serialize_secs", deserialize_with = "deserialize_secs")]
    pub total_time: Duration,
    pub final_result: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub steps: Trace,
}

impl PlanRecord {
    pub fn new(name: &str, timestamp: String, run: &PlanRun) -> Self {
        Self {
            name: name.to_string(),
            timestamp,
            total_time: run.elapsed,
            final_result: run.result,
            error: run.error.clone(),
            steps: run.trace.clone(),
        }
    }
}

/// Local-time stamp used in record names and bodies.
pub fn timestamp() -> String {
    chrono::Local::now().format(STAMP_FORMAT).to_string()
}

pub fn action_log_dir(log_dir: &Path, machine: &str, action: &str) -> PathBuf {
    log_dir.join(machine).join("actions").join(action)
}

pub fn plan_log_dir(log_dir: &Path, plan: &str) -> PathBuf {
    log_dir.join("plans").join(plan)
}

/// Save an action run. Returns the written path.
pub fn save_action_log(
    log_dir: &Path,
    machine: &str,
    action: &str,
    run: &ActionRun,
) -> Result<PathBuf, String> {
    let stamp = timestamp();
    let record = ActionRecord::new(machine, action, stamp.clone(), run);
    write_record(&action_log_dir(log_dir, machine, action), action, &stamp, &record)
}

/// Save a plan run. Returns the written path.
pub fn save_plan_log(log_dir: &Path, plan: &str, run: &PlanRun) -> Result<PathBuf, String> {
    let stamp = timestamp();
    let record = PlanRecord::new(plan, stamp.clone(), run);
    write_record(&plan_log_dir(log_dir, plan), plan, &stamp, &record)
}

pub fn load_action_log(path: &Path) -> Result<ActionRecord, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_yaml_ng::from_str(&content).map_err(|e| format!("invalid record {}: {}", path.display(), e))
}

pub fn load_plan_log(path: &Path) -> Result<PlanRecord, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_yaml_ng::from_str(&content).map_err(|e| format!("invalid record {}: {}", path.display(), e))
}

/// First free `<name>_<stamp>[_N].yaml` in `dir`.
fn record_path(dir: &Path, name: &str, stamp: &str) -> PathBuf {
    let mut path = dir.join(format!("{}_{}.yaml", name, stamp));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}_{}.yaml", name, stamp, n));
        n += 1;
    }
    path
}

/// Serialize and write atomically (temp file, then rename).
fn write_record<T: Serialize>(
    dir: &Path,
    name: &str,
    stamp: &str,
    record: &T,
) -> Result<PathBuf, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("cannot create dir {}: {}", dir.display(), e))?;

    let yaml = serde_yaml_ng::to_string(record).map_err(|e| format!("serialize error: {}", e))?;

    let path = record_path(dir, name, stamp);
    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    tracing::debug!(path = %path.display(), "trace saved");
    Ok(path)
}
