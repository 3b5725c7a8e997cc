use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Information about a long running operation, as reported by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    /// Human-readable status of the operation, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Server-defined resource path for the target of the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Name of the verb executed by the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_requested: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Service specific metadata keys (`@type`, `progressPercent`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A server-side handle to asynchronous work.
///
/// Values are never mutated after being decoded: every status fetch yields a
/// new `Operation` that replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    /// `false` means the operation is still in progress
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<OperationMetadata>,
    /// The normal response of the operation in case of success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// The error result of the operation in case of failure or cancellation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// How a finished operation ended
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Succeeded(Value),
    Failed(Value),
}

impl Operation {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            metadata: None,
            response: None,
            error: None,
        }
    }

    pub fn succeeded(name: impl Into<String>, response: Value) -> Self {
        Self {
            done: true,
            response: Some(response),
            ..Self::pending(name)
        }
    }

    pub fn failed(name: impl Into<String>, error: Value) -> Self {
        Self {
            done: true,
            error: Some(error),
            ..Self::pending(name)
        }
    }

    pub fn status_detail(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.status_detail.as_deref())
    }

    /// The terminal outcome, or `None` while the operation is still running.
    ///
    /// Only a structured `response` (object or array) counts as success. A
    /// finished operation with anything else carries its `error`, or `null`
    /// when the server sent none.
    pub fn outcome(&self) -> Option<OperationOutcome> {
        if !self.done {
            return None;
        }

        match &self.response {
            Some(response @ (Value::Object(_) | Value::Array(_))) => {
                Some(OperationOutcome::Succeeded(response.clone()))
            }
            _ => Some(OperationOutcome::Failed(
                self.error.clone().unwrap_or(Value::Null),
            )),
        }
    }
}

/// Render a Google `Status` payload (`{code, message, details}`) for humans
pub fn describe_status(error: &Value) -> String {
    let code = error.get("code").and_then(Value::as_i64);
    let message = error.get("message").and_then(Value::as_str);

    match (code, message) {
        (Some(code), Some(message)) => format!("{} - {}", code, message),
        (None, Some(message)) => message.to_string(),
        _ => error.to_string(),
    }
}
