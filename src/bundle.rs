//! Typed checkpoint records.
//!
//! A checkpoint is a versioned, typed record rather than a loose key/value
//! mapping, so format drift is caught at deserialization time. Serde field
//! names are the stable bundle keys of the checkpoint format:
//! `creation_time`, `class_name`, `pid`, `state`, `finished`, `terminated`,
//! `inputs`, `outputs`, `wait_on`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::spec::PortMap;
use crate::state::RunEntry;
use crate::types::{ProcessId, Result};

/// Current checkpoint schema version.
pub const BUNDLE_VERSION: u32 = 1;

/// Serialized snapshot of a process.
///
/// Restoring from a record yields a process whose pid, creation time,
/// inputs, outputs, flags and state label match the original at capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessRecord {
    pub version: u32,
    pub creation_time: DateTime<Utc>,
    pub class_name: String,
    pub pid: ProcessId,
    pub state: Option<StateRecord>,
    pub finished: bool,
    pub terminated: bool,
    pub inputs: Option<PortMap>,
    pub outputs: PortMap,
}

impl ProcessRecord {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Serialized snapshot of the active state, tagged by state label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "label", rename_all = "lowercase")]
pub enum StateRecord {
    Created,
    Running {
        entry: RunEntry,
    },
    Waiting {
        wait_on: WaitOnRecord,
        resume_step: Option<String>,
    },
    Stopped {
        aborted: bool,
        abort_msg: Option<String>,
    },
    Failed {
        message: String,
    },
}

/// Serialized snapshot of an awaited condition.
///
/// `kind` selects the restorer registered with the process factory; `data`
/// is the condition's own payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitOnRecord {
    pub kind: String,
    pub id: String,
    pub data: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_record() -> ProcessRecord {
        let mut outputs = PortMap::new();
        outputs.insert("y".to_string(), json!(42));
        ProcessRecord {
            version: BUNDLE_VERSION,
            creation_time: Utc::now(),
            class_name: "adder".to_string(),
            pid: ProcessId::new(),
            state: Some(StateRecord::Waiting {
                wait_on: WaitOnRecord {
                    kind: "signal".to_string(),
                    id: "w-1".to_string(),
                    data: json!({"ready": false}),
                },
                resume_step: Some("after_wait".to_string()),
            }),
            finished: false,
            terminated: false,
            inputs: None,
            outputs,
        }
    }

    #[test]
    fn record_roundtrips_through_json() {
        let record = sample_record();
        let json = record.to_json().unwrap();
        let back = ProcessRecord::from_json(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn state_records_use_lowercase_labels() {
        let json = serde_json::to_value(StateRecord::Stopped {
            aborted: true,
            abort_msg: Some("user requested".to_string()),
        })
        .unwrap();
        assert_eq!(json["label"], "stopped");
        assert_eq!(json["aborted"], true);

        let json = serde_json::to_value(StateRecord::Running {
            entry: RunEntry::Start,
        })
        .unwrap();
        assert_eq!(json["label"], "running");
    }

    #[test]
    fn bundle_keys_are_stable() {
        let record = sample_record();
        let json = serde_json::to_value(&record).unwrap();
        for key in [
            "creation_time",
            "class_name",
            "pid",
            "state",
            "finished",
            "terminated",
            "inputs",
            "outputs",
        ] {
            assert!(json.get(key).is_some(), "missing bundle key {key}");
        }
        assert!(json["state"].get("wait_on").is_some());
    }
}
