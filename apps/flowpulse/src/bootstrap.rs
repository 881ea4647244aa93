use anyhow::{Context, bail};
use serde_json::{Map, Value};

use flowpulse_common::{
    ConsumerConfig, GlobalConfig, GlobalConfigPatch, parse_u16_value, parse_u64_value,
    sanitize_value,
};

use crate::cli::{ChatArgs, ServeArgs};

/// Merges the relay config once: CLI > ENV > file > defaults.
///
/// clap already applies CLI > ENV per field; that layer is overlaid on the file.
pub fn relay_config(args: ServeArgs) -> anyhow::Result<GlobalConfig> {
    let mut merged = match args.config.as_deref() {
        Some(path) => GlobalConfigPatch::load_file(path).context("load config file")?,
        None => GlobalConfigPatch::default(),
    };

    let cli_patch = GlobalConfigPatch {
        host: sanitize_value(args.host),
        port: parse_u16_value(args.port, "port")?,
        upstream_url: sanitize_value(args.upstream_url),
        upstream_api_key: sanitize_value(args.upstream_api_key),
        model: sanitize_value(args.model),
        proxy: sanitize_value(args.proxy),
        connect_timeout_secs: parse_u64_value(args.connect_timeout_secs, "connect_timeout_secs")?,
        request_timeout_secs: parse_u64_value(args.request_timeout_secs, "request_timeout_secs")?,
        stream_idle_timeout_secs: parse_u64_value(
            args.stream_idle_timeout_secs,
            "stream_idle_timeout_secs",
        )?,
        heartbeat_secs: parse_u64_value(args.heartbeat_secs, "heartbeat_secs")?,
        functions: None,
    };
    merged.overlay(cli_patch);

    merged
        .into_config()
        .context("finalize merged relay config")
}

pub fn consumer_config(args: &ChatArgs) -> anyhow::Result<ConsumerConfig> {
    let config = ConsumerConfig::from_parts(
        args.base_url.clone(),
        args.public_key.clone(),
        args.session_token.clone(),
        parse_u64_value(args.request_timeout_secs.clone(), "request_timeout_secs")?,
        parse_u64_value(args.idle_timeout_secs.clone(), "idle_timeout_secs")?,
    )
    .context("build consumer config")?;
    Ok(config)
}

/// Parses repeated `name=value` flags into request mode fields.
pub fn mode_fields(raw: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut fields = Map::new();
    for item in raw {
        let Some((name, value)) = item.split_once('=') else {
            bail!("invalid --field {item:?}, expected NAME=VALUE");
        };
        let name = name.trim();
        if name.is_empty() || name == "messages" || name == "stream" {
            bail!("invalid --field name {name:?}");
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        fields.insert(name.to_string(), value);
    }
    Ok(fields)
}
