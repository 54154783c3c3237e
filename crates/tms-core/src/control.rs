use crate::counts::{deserialize_counts, CountMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const START_PROCESSING_PATH: &str = "/start_processing";
pub const STOP_PROCESSING_PATH: &str = "/stop_processing";
pub const VEHICLE_COUNTS_PATH: &str = "/api/vehicle_counts";
pub const VIOLATIONS_PATH: &str = "/api/violations";

const UNKNOWN_SERVER_ERROR: &str = "unknown server error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub video_source: String,
    #[serde(default)]
    pub config_path: Option<String>,
}

impl StartRequest {
    pub fn new(video_source: impl Into<String>) -> Self {
        Self {
            video_source: video_source.into(),
            config_path: None,
        }
    }

    pub fn with_config_path(mut self, config_path: Option<String>) -> Self {
        self.config_path = config_path.filter(|path| !path.trim().is_empty());
        self
    }

    /// Form fields for the start endpoint, which reads `video_path` and `config_path`.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("video_path", self.video_source.clone())];
        if let Some(config_path) = &self.config_path {
            fields.push(("config_path", config_path.clone()));
        }
        fields
    }
}

/// Body returned by the start and stop endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ControlResponse {
    Success {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

impl ControlResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, ControlResponse::Success { .. })
    }

    /// `Ok` carries the optional acknowledgement text, `Err` the server's rejection message.
    pub fn into_result(self) -> Result<Option<String>, String> {
        match self {
            ControlResponse::Success { message } => Ok(message),
            ControlResponse::Error { message } => Err(message
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_SERVER_ERROR.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationsSummary {
    #[serde(default)]
    pub total: u64,
    #[serde(default, deserialize_with = "deserialize_counts")]
    pub counts: CountMap,
    #[serde(default)]
    pub recent: Vec<ViolationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub vehicle_id: Option<Value>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl ViolationRecord {
    pub fn timestamp_label(&self) -> String {
        match &self.timestamp {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Number(number)) => number.to_string(),
            _ => "-".to_string(),
        }
    }
}
