//! RR-009: Append-only JSONL log of invocation start and finish events.

use crate::core::types::{RunEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};

/// ISO 8601 UTC timestamp.
pub fn now_iso8601() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default() as u64;
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

pub fn event_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join("events.jsonl")
}

/// Append an event to the lab's event log.
pub fn append_event(log_dir: &Path, event: RunEvent) -> Result<(), String> {
    let path = event_log_path(log_dir);
    std::fs::create_dir_all(log_dir).map_err(|e| format!("cannot create log dir: {}", e))?;

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

/// Read every event back, skipping lines that fail to parse.
pub fn read_events(log_dir: &Path) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(log_dir);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(content
        .lines()
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed event line");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Outcome;

    #[test]
    fn test_rr009_now_iso8601() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
        assert_eq!(ts.len(), 20);
    }

    #[test]
    fn test_rr009_generate_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert_eq!(id.len(), 14);
    }

    #[test]
    fn test_rr009_event_log_path() {
        let p = event_log_path(Path::new("/lab/logs"));
        assert_eq!(p, PathBuf::from("/lab/logs/events.jsonl"));
    }

    #[test]
    fn test_rr009_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        append_event(
            dir.path(),
            RunEvent::ActionStarted {
                machine: "r1".to_string(),
                action: "check".to_string(),
                run_id: "r-abc".to_string(),
            },
        )
        .unwrap();
        append_event(
            dir.path(),
            RunEvent::ActionCompleted {
                machine: "r1".to_string(),
                action: "check".to_string(),
                run_id: "r-abc".to_string(),
                result: Outcome::Success,
                total_seconds: 0.42,
            },
        )
        .unwrap();

        let content = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"event\":\"action_started\""));
        assert!(content.contains("r-abc"));

        let events = read_events(dir.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1].event,
            RunEvent::ActionCompleted {
                result: Outcome::Success,
                ..
            }
        ));
    }

    #[test]
    fn test_rr009_read_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        append_event(
            dir.path(),
            RunEvent::PlanStarted {
                plan: "smoke".to_string(),
                run_id: "r-1".to_string(),
            },
        )
        .unwrap();
        let path = event_log_path(dir.path());
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not json").unwrap();

        let events = read_events(dir.path()).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_rr009_read_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_events(dir.path()).unwrap().is_empty());
    }
}
