use serde_json::Value;
use thiserror::Error;

use crate::model::Operation;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {code} - {message}")]
    Api {
        status: u16,
        code: i64,
        message: String,
        details: Vec<Value>,
    },
    #[error("API returned {status} without a body")]
    EmptyBody { status: u16 },
    #[error("invalid JSON from API: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

/// One REST call, relative to the transport's API root
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl RestResponse {
    /// Check the status of a REST call and get its data.
    ///
    /// Error statuses are decoded from Google's `{"error": {...}}` envelope
    /// when present.
    pub fn into_data(self) -> Result<Value, TransportError> {
        let status = self.status;

        if status >= 400 {
            let error = self.body.as_ref().and_then(|b| b.get("error"));
            return Err(TransportError::Api {
                status,
                code: error
                    .and_then(|e| e.get("code"))
                    .and_then(Value::as_i64)
                    .unwrap_or(i64::from(status)),
                message: error
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .or_else(|| self.body.as_ref().and_then(Value::as_str))
                    .unwrap_or("request failed")
                    .to_string(),
                details: error
                    .and_then(|e| e.get("details"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            });
        }

        match self.body {
            None | Some(Value::Null) => Err(TransportError::EmptyBody { status }),
            Some(body) => Ok(body),
        }
    }
}

/// Issues REST calls against one Google API root
#[async_trait::async_trait]
pub trait RestTransport: Send + Sync {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError>;

    async fn get(&self, path: &str) -> Result<Value, TransportError> {
        self.send(RestRequest::new(Method::Get, path)).await?.into_data()
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        self.send(RestRequest::new(Method::Post, path).json(body))
            .await?
            .into_data()
    }

    async fn delete(&self, path: &str) -> Result<Value, TransportError> {
        self.send(RestRequest::new(Method::Delete, path)).await?.into_data()
    }
}

/// Re-fetches the status of a long running operation, one round trip per call
#[async_trait::async_trait]
pub trait OperationFetcher: Send + Sync {
    async fn fetch_operation(&self, name: &str) -> Result<Operation, TransportError>;
}
