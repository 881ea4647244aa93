use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;
use crate::env::sanitize_value;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Client-side settings for talking to a relay deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Deployment root; functions live under `{base_url}/functions/v1/`.
    pub base_url: String,
    /// Publishable key sent as `apikey` and used as bearer when no session exists.
    pub public_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
    pub request_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl ConsumerConfig {
    pub fn new(base_url: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            public_key: public_key.into(),
            session_token: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }

    /// Builds a config from optional CLI/ENV values.
    pub fn from_parts(
        base_url: Option<String>,
        public_key: Option<String>,
        session_token: Option<String>,
        request_timeout_secs: Option<u64>,
        idle_timeout_secs: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let base_url = sanitize_value(base_url).ok_or(ConfigError::MissingField("base_url"))?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "base_url",
                value: base_url,
            });
        }
        let public_key =
            sanitize_value(public_key).ok_or(ConfigError::MissingField("public_key"))?;

        let request_timeout_secs = request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        let idle_timeout_secs = idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
        for (field, value) in [
            ("request_timeout_secs", request_timeout_secs),
            ("idle_timeout_secs", idle_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    value: value.to_string(),
                });
            }
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            public_key,
            session_token: sanitize_value(session_token),
            request_timeout_secs,
            idle_timeout_secs,
        })
    }

    pub fn function_url(&self, function: &str) -> String {
        format!(
            "{}/functions/v1/{}",
            self.base_url.trim_end_matches('/'),
            function
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
