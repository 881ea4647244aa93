use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowpulse",
    version,
    about = "Streaming AI relay and stream consumer"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the relay in front of the chat-completions upstream.
    Serve(ServeArgs),
    /// Stream one answer from a relay function to stdout.
    Chat(ChatArgs),
}

/// Numeric values are taken as strings so blanks and `${VAR}` leftovers count as unset.
#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// TOML file with the base config layer (including `[[functions]]`).
    #[arg(long, env = "FLOWPULSE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind host.
    #[arg(long, env = "FLOWPULSE_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "FLOWPULSE_PORT")]
    pub port: Option<String>,

    /// Upstream chat-completions endpoint.
    #[arg(long, env = "FLOWPULSE_UPSTREAM_URL")]
    pub upstream_url: Option<String>,

    /// Server-held upstream credential.
    #[arg(long, env = "FLOWPULSE_UPSTREAM_API_KEY", hide_env_values = true)]
    pub upstream_api_key: Option<String>,

    /// Default model for functions without their own.
    #[arg(long, env = "FLOWPULSE_MODEL")]
    pub model: Option<String>,

    /// Optional outbound proxy for upstream requests.
    #[arg(long, env = "FLOWPULSE_PROXY")]
    pub proxy: Option<String>,

    #[arg(long, env = "FLOWPULSE_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: Option<String>,

    /// Total bound on one upstream call, streamed body included.
    #[arg(long, env = "FLOWPULSE_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<String>,

    #[arg(long, env = "FLOWPULSE_STREAM_IDLE_TIMEOUT_SECS")]
    pub stream_idle_timeout_secs: Option<String>,

    /// Silence before a keep-alive comment is sent on a stream.
    #[arg(long, env = "FLOWPULSE_HEARTBEAT_SECS")]
    pub heartbeat_secs: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ChatArgs {
    /// Deployment root; requests go to `{base_url}/functions/v1/{function}`.
    #[arg(long, env = "FLOWPULSE_BASE_URL")]
    pub base_url: Option<String>,

    /// Publishable key.
    #[arg(long, env = "FLOWPULSE_PUBLIC_KEY")]
    pub public_key: Option<String>,

    /// Session token; the public key is used as bearer when absent.
    #[arg(long, env = "FLOWPULSE_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    #[arg(long, default_value = "ai-chat")]
    pub function: String,

    /// Extra mode field as `name=value`; values that parse as JSON are sent as JSON.
    #[arg(long = "field", value_name = "NAME=VALUE")]
    pub fields: Vec<String>,

    /// Wait for the relay's response headers.
    #[arg(long, env = "FLOWPULSE_CHAT_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<String>,

    /// Wait between body reads.
    #[arg(long, env = "FLOWPULSE_CHAT_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: Option<String>,

    /// The user message.
    #[arg(required = true, num_args = 1..)]
    pub message: Vec<String>,
}
