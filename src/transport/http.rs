use std::time::Duration;

use log::debug;
use reqwest::{header, Client};
use serde_json::Value;

use super::traits::{Method, OperationFetcher, RestRequest, RestResponse, RestTransport, TransportError};
use crate::config::ApiConfig;
use crate::model::Operation;

/// REST transport over reqwest with a pre-acquired OAuth access token
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, TransportError> {
        Self::new(
            config.base_url.clone(),
            config.access_token(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resource paths and operation names are relative to the API root
    fn url_for(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }
}

#[async_trait::async_trait]
impl RestTransport for HttpTransport {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError> {
        let url = self.url_for(&request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        debug!("{} {}", method, url);

        let mut builder = self
            .client
            .request(method, &url)
            .header(header::ACCEPT, "application/json")
            .query(&request.query);

        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        // Proxies answer errors with HTML, keep the text so the status survives
        let body = if text.trim().is_empty() {
            None
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(body) => Some(body),
                Err(_) if status >= 400 => Some(Value::String(text.clone())),
                Err(e) => return Err(e.into()),
            }
        };
        debug!("Response {} from {}: {}", status, url, text);

        Ok(RestResponse { status, body })
    }
}

#[async_trait::async_trait]
impl OperationFetcher for HttpTransport {
    async fn fetch_operation(&self, name: &str) -> Result<Operation, TransportError> {
        let data = self.get(name).await?;
        Ok(serde_json::from_value(data)?)
    }
}
