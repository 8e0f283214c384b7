//! Task records as the backend reports them, and everything the console
//! derives from them for display.

pub mod actions;
pub mod filter;
pub mod view;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::catalog::template::ParamValueRef;
use crate::error::{Error, Result};

pub use actions::{TaskAction, legal_actions};
pub use filter::TaskFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Queued,
    Running,
    Paused,
    Finished,
    Terminated,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "QUEUED",
            TaskState::Running => "RUNNING",
            TaskState::Paused => "PAUSED",
            TaskState::Finished => "FINISHED",
            TaskState::Terminated => "TERMINATED",
        }
    }

    /// Paused, finished or terminated.
    pub fn is_settled(self) -> bool {
        !matches!(self, TaskState::Queued | TaskState::Running)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(TaskState::Queued),
            "RUNNING" => Ok(TaskState::Running),
            "PAUSED" => Ok(TaskState::Paused),
            "FINISHED" => Ok(TaskState::Finished),
            "TERMINATED" => Ok(TaskState::Terminated),
            other => Err(Error::msg(format!("unknown task state '{other}'"))),
        }
    }
}

impl<'de> Deserialize<'de> for TaskState {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Task {
    pub uuid: String,
    pub state: TaskState,
    #[serde(default)]
    pub params: Vec<ParamValueRef>,
    #[serde(default, rename = "try")]
    pub try_number: u32,
    #[serde(default)]
    pub is_pausing: bool,
    #[serde(default)]
    pub is_saving: bool,
    #[serde(default)]
    pub creating_checkpoint: bool,
    #[serde(default)]
    pub finished_iterations: u64,
    #[serde(default)]
    pub total_iterations: u64,
    #[serde(default, deserialize_with = "timestamp")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    pub saved_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "seconds")]
    pub run_time: Option<u64>,
    #[serde(default, deserialize_with = "seconds")]
    pub time_left: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_test: bool,
    #[serde(default)]
    pub had_error: bool,
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub device: Option<String>,
}

impl Task {
    pub fn new(uuid: impl Into<String>, state: TaskState) -> Self {
        Self {
            uuid: uuid.into(),
            state,
            params: Vec::new(),
            try_number: 0,
            is_pausing: false,
            is_saving: false,
            creating_checkpoint: false,
            finished_iterations: 0,
            total_iterations: 0,
            creation_time: None,
            saved_time: None,
            start_time: None,
            run_time: None,
            time_left: None,
            tags: Vec::new(),
            is_test: false,
            had_error: false,
            metrics: BTreeMap::new(),
            config: Value::Null,
            device: None,
        }
    }

    /// Resolved names of the selected values, in order.
    pub fn name_parts(&self) -> Result<Vec<String>> {
        self.params.iter().map(ParamValueRef::resolved_name).collect()
    }

    /// Current (last) sample of a metric.
    pub fn metric(&self, name: &str) -> Option<f64> {
        match self.metrics.get(name)? {
            Value::Array(samples) => samples.last()?.as_f64(),
            v => v.as_f64(),
        }
    }
}

/// A task in the snapshot: either fully loaded, or a stub whose details
/// must be requested.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TaskEntry {
    Loaded(Box<Task>),
    Stub { uuid: String },
}

impl TaskEntry {
    pub fn uuid(&self) -> &str {
        match self {
            TaskEntry::Loaded(t) => &t.uuid,
            TaskEntry::Stub { uuid } => uuid,
        }
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            TaskEntry::Loaded(t) => Some(t),
            TaskEntry::Stub { .. } => None,
        }
    }
}

fn timestamp<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(|secs| DateTime::from_timestamp(secs.trunc() as i64, 0)),
        Some(Value::String(s)) if !s.trim().is_empty() => {
            let s = s.trim();
            match DateTime::parse_from_rfc3339(s) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(_) => chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
                    .map(|n| n.and_utc())
                    .map_err(|e| {
                        <D::Error as serde::de::Error>::custom(format!(
                            "invalid timestamp '{s}': {e}"
                        ))
                    })
                    .map(Some)?,
            }
        }
        _ => None,
    })
}

// Durations arrive as (possibly fractional) seconds; negative means unknown.
fn seconds<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u64>, D::Error> {
    let v = Option::<f64>::deserialize(d)?;
    Ok(v.filter(|s| s.is_finite() && *s >= 0.0).map(|s| s.trunc() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_record_and_stub_deserialize() {
        let entries: Vec<TaskEntry> = serde_json::from_value(serde_json::json!([
            {
                "uuid": "t1",
                "state": "RUNNING",
                "try": 2,
                "params": [[null, {"uuid": "v1", "name": "lr_$T0$"}, "0.1"]],
                "finished_iterations": 7,
                "total_iterations": 5,
                "run_time": 125.7,
                "time_left": null,
                "creation_time": 1700000000,
                "saved_time": "2023-11-14T22:13:20Z",
                "metrics": {"loss": [0.1, 0.2, 0.25]}
            },
            {"uuid": "t2"}
        ]))
        .expect("entries");

        let t = entries[0].task().expect("loaded");
        assert_eq!(t.state, TaskState::Running);
        assert_eq!(t.try_number, 2);
        assert_eq!(t.run_time, Some(125));
        assert_eq!(t.time_left, None);
        assert_eq!(t.creation_time, t.saved_time);
        assert_eq!(t.name_parts().expect("names"), vec!["lr_0.1".to_string()]);
        assert_eq!(t.metric("loss"), Some(0.25));
        assert_eq!(t.metric("acc"), None);

        assert!(entries[1].task().is_none());
        assert_eq!(entries[1].uuid(), "t2");
    }

    #[test]
    fn state_parsing_is_case_insensitive() {
        assert_eq!("paused".parse::<TaskState>().expect("state"), TaskState::Paused);
        assert!("sleeping".parse::<TaskState>().is_err());
        assert!(TaskState::Terminated.is_settled());
        assert!(!TaskState::Queued.is_settled());
    }
}
