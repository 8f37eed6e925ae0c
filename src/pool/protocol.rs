// src/pool/protocol.rs
//! Worker-pool message protocol
//!
//! Closed tagged types for everything that crosses the dispatcher/worker
//! boundary. This protocol is deliberately separate from the cluster IPC
//! protocol in [`crate::cluster::ipc`]; the two channels carry different
//! message sets and are never unified.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters for `parse-manifest`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestParams {
    /// Path to the package manifest (e.g. `package.json`)
    pub path: String,
}

/// Parameters for `scan-directory`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanParams {
    pub path: String,

    /// Maximum recursion depth (root is depth 0)
    pub max_depth: usize,

    /// Suffix patterns like `*.rs`; empty means every file matches
    pub patterns: Vec<String>,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            path: ".".to_string(),
            max_depth: 5,
            patterns: Vec::new(),
        }
    }
}

/// Parameters for `analyze-code`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeParams {
    pub path: String,
}

/// Parameters for `benchmark`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BenchmarkParams {
    pub iterations: u64,
}

impl Default for BenchmarkParams {
    fn default() -> Self {
        Self {
            iterations: 1_000_000,
        }
    }
}

/// A decoded task request dispatched pool → worker
#[derive(Debug, Clone)]
pub enum TaskRequest {
    ParseManifest(ManifestParams),
    ScanDirectory(ScanParams),
    AnalyzeCode(AnalyzeParams),
    Benchmark(BenchmarkParams),
}

impl TaskRequest {
    /// Decode a `{type, data}` envelope. An unrecognized tag is
    /// [`EngineError::UnknownTaskType`]; a malformed payload for a known
    /// tag is [`EngineError::Validation`].
    pub fn decode(task_type: &str, payload: Value) -> Result<Self> {
        fn params<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T> {
            serde_json::from_value(payload)
                .map_err(|e| EngineError::Validation(format!("bad task payload: {}", e)))
        }

        match task_type {
            "parse-manifest" => Ok(Self::ParseManifest(params(payload)?)),
            "scan-directory" => Ok(Self::ScanDirectory(params(payload)?)),
            "analyze-code" => Ok(Self::AnalyzeCode(params(payload)?)),
            "benchmark" => Ok(Self::Benchmark(params(payload)?)),
            other => Err(EngineError::UnknownTaskType(other.to_string())),
        }
    }

    /// The wire tag for this request
    pub fn task_type(&self) -> &'static str {
        match self {
            Self::ParseManifest(_) => "parse-manifest",
            Self::ScanDirectory(_) => "scan-directory",
            Self::AnalyzeCode(_) => "analyze-code",
            Self::Benchmark(_) => "benchmark",
        }
    }
}

/// Worker reply envelope: `{success: true, data}` or `{success: false, error}`
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResponse {
    Success { data: Value },
    Failure { error: String },
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Serialize for TaskResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let wire = match self {
            TaskResponse::Success { data } => WireResponse {
                success: true,
                data: Some(data.clone()),
                error: None,
            },
            TaskResponse::Failure { error } => WireResponse {
                success: false,
                data: None,
                error: Some(error.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TaskResponse {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = WireResponse::deserialize(deserializer)?;
        if wire.success {
            Ok(TaskResponse::Success {
                data: wire.data.unwrap_or(Value::Null),
            })
        } else {
            Ok(TaskResponse::Failure {
                error: wire.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

impl From<Result<Value>> for TaskResponse {
    fn from(result: Result<Value>) -> Self {
        match result {
            Ok(data) => TaskResponse::Success { data },
            Err(e) => TaskResponse::Failure {
                error: e.to_string(),
            },
        }
    }
}

/// One-time startup signal from a worker thread
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerEvent {
    Ready {
        #[serde(rename = "workerId")]
        worker_id: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_known_tags() {
        let req = TaskRequest::decode("parse-manifest", json!({"path": "/tmp/package.json"}))
            .unwrap();
        assert_eq!(req.task_type(), "parse-manifest");

        let req = TaskRequest::decode(
            "scan-directory",
            json!({"path": "/src", "maxDepth": 3, "patterns": ["*.rs"]}),
        )
        .unwrap();
        match req {
            TaskRequest::ScanDirectory(p) => {
                assert_eq!(p.max_depth, 3);
                assert_eq!(p.patterns, vec!["*.rs"]);
            }
            _ => panic!("wrong variant"),
        }

        assert!(TaskRequest::decode("benchmark", json!({})).is_ok());
    }

    #[test]
    fn test_decode_unknown_tag() {
        let err = TaskRequest::decode("mine-bitcoin", json!({})).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTaskType(_)));
    }

    #[test]
    fn test_decode_bad_payload() {
        let err = TaskRequest::decode("analyze-code", json!({"nope": 1})).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_response_wire_shape() {
        let ok = TaskResponse::Success {
            data: json!({"lines": 10}),
        };
        let encoded = serde_json::to_value(&ok).unwrap();
        assert_eq!(encoded["success"], json!(true));
        assert_eq!(encoded["data"]["lines"], json!(10));
        assert!(encoded.get("error").is_none());

        let err = TaskResponse::Failure {
            error: "boom".into(),
        };
        let encoded = serde_json::to_value(&err).unwrap();
        assert_eq!(encoded["success"], json!(false));
        assert_eq!(encoded["error"], json!("boom"));
    }

    #[test]
    fn test_response_round_trip() {
        let original = TaskResponse::Failure {
            error: "handler died".into(),
        };
        let decoded: TaskResponse =
            serde_json::from_value(serde_json::to_value(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_ready_event_shape() {
        let event = WorkerEvent::Ready { worker_id: 3 };
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded, json!({"type": "ready", "workerId": 3}));
    }
}
