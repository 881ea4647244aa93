use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8787;
const DEFAULT_MODEL: &str = "google/gemini-2.5-flash";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 86_400;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;

/// A relay endpoint: one path segment with its own system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub name: String,
    /// Template; `{field}` is replaced by the request's mode field of that name.
    pub system_prompt: String,
    #[serde(default)]
    pub stream_by_default: bool,
    /// Overrides the global model for this function.
    #[serde(default)]
    pub model: Option<String>,
}

pub fn default_functions() -> Vec<FunctionConfig> {
    vec![
        FunctionConfig {
            name: "ai-chat".to_string(),
            system_prompt: "You are FlowPulse's assistant. Answer concisely and stay within the \
                            user's business context."
                .to_string(),
            stream_by_default: true,
            model: None,
        },
        FunctionConfig {
            name: "ai-analyst".to_string(),
            system_prompt: "You are FlowPulse's financial analyst. Produce a {analysisType} \
                            analysis for {company}."
                .to_string(),
            stream_by_default: false,
            model: None,
        },
    ]
}

/// Final, merged relay configuration used by the running process.
///
/// Merge order: CLI > ENV > config file > defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Upstream chat-completions endpoint.
    pub upstream_url: String,
    /// Server-held credential; never sent to callers.
    pub upstream_api_key: String,
    pub model: String,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    pub connect_timeout_secs: u64,
    /// Total bound on one upstream call, streamed body included.
    pub request_timeout_secs: u64,
    /// Bound on silence between upstream body reads.
    pub stream_idle_timeout_secs: u64,
    pub heartbeat_secs: u64,
    pub functions: Vec<FunctionConfig>,
}

impl GlobalConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionConfig> {
        self.functions.iter().find(|function| function.name == name)
    }
}

/// Optional layer used for merging the global config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upstream_url: Option<String>,
    pub upstream_api_key: Option<String>,
    pub model: Option<String>,
    pub proxy: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub stream_idle_timeout_secs: Option<u64>,
    pub heartbeat_secs: Option<u64>,
    pub functions: Option<Vec<FunctionConfig>>,
}

impl GlobalConfigPatch {
    pub fn from_toml_str(text: &str, path: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml_str(&text, &display)
    }

    /// Fields set in `other` win.
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.upstream_url.is_some() {
            self.upstream_url = other.upstream_url;
        }
        if other.upstream_api_key.is_some() {
            self.upstream_api_key = other.upstream_api_key;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.connect_timeout_secs.is_some() {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
        if other.request_timeout_secs.is_some() {
            self.request_timeout_secs = other.request_timeout_secs;
        }
        if other.stream_idle_timeout_secs.is_some() {
            self.stream_idle_timeout_secs = other.stream_idle_timeout_secs;
        }
        if other.heartbeat_secs.is_some() {
            self.heartbeat_secs = other.heartbeat_secs;
        }
        if other.functions.is_some() {
            self.functions = other.functions;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, ConfigError> {
        let functions = self.functions.unwrap_or_else(default_functions);
        let mut seen = HashSet::new();
        for function in &functions {
            if function.name.trim().is_empty() || function.name.contains('/') {
                return Err(ConfigError::InvalidValue {
                    field: "functions.name",
                    value: function.name.clone(),
                });
            }
            if !seen.insert(function.name.as_str()) {
                return Err(ConfigError::DuplicateFunction(function.name.clone()));
            }
        }

        let heartbeat_secs = self.heartbeat_secs.unwrap_or(DEFAULT_HEARTBEAT_SECS);
        if heartbeat_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_secs",
                value: "0".to_string(),
            });
        }

        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            upstream_url: self
                .upstream_url
                .ok_or(ConfigError::MissingField("upstream_url"))?,
            upstream_api_key: self
                .upstream_api_key
                .ok_or(ConfigError::MissingField("upstream_api_key"))?,
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            proxy: self.proxy,
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout_secs: self
                .request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            stream_idle_timeout_secs: self
                .stream_idle_timeout_secs
                .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_SECS),
            heartbeat_secs,
            functions,
        })
    }
}
