use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::logic::poller::{ExponentReset, PollConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub poll: PollSettings,
    pub task: TaskConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub max_transient_errors: u32,
    pub max_exponent: u32,
    pub base_delay_millis: u64,
    pub exponent_reset: ExponentReset,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Overall timeout of one task run, cancels any poll in flight
    pub timeout_secs: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://appengine.googleapis.com/v1".to_string(),
            access_token: None,
            request_timeout_secs: 30,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        let defaults = PollConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            max_transient_errors: defaults.max_transient_errors,
            max_exponent: defaults.max_exponent,
            base_delay_millis: defaults.base_delay.as_millis() as u64,
            exponent_reset: defaults.exponent_reset,
        }
    }
}

impl PollSettings {
    pub fn to_poll_config(&self) -> PollConfig {
        PollConfig {
            max_attempts: self.max_attempts,
            max_transient_errors: self.max_transient_errors,
            max_exponent: self.max_exponent,
            base_delay: Duration::from_millis(self.base_delay_millis),
            exponent_reset: self.exponent_reset,
        }
    }
}

impl ApiConfig {
    /// Get the access token from config or environment
    pub fn access_token(&self) -> Option<String> {
        if let Some(token) = &self.access_token {
            return Some(token.clone());
        }

        // Fall back to the variable set by `gcloud auth print-access-token` wrappers
        std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok()
    }
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("gcp-tasks").required(false));

        // Add environment variables with prefix "GCP_TASKS"
        config = config.add_source(
            config::Environment::with_prefix("GCP_TASKS")
                .separator("__")
                .prefix_separator("__"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task.timeout_secs.map(Duration::from_secs)
    }
}
