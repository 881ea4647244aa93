mod config;
mod consumer;
mod env;

pub use config::{
    DEFAULT_HEARTBEAT_SECS, FunctionConfig, GlobalConfig, GlobalConfigPatch, default_functions,
};
pub use consumer::ConsumerConfig;
pub use env::{parse_u16_value, parse_u64_value, sanitize_value};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("duplicate function name: {0}")]
    DuplicateFunction(String),
    #[error("read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
