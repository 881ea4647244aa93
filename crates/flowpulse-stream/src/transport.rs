use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value as JsonValue;
use tracing::debug;
use wreq::Client;
use wreq::header::CONTENT_TYPE;

use flowpulse_common::ConsumerConfig;
use flowpulse_protocol::RelayRequestBody;

use crate::error::StreamError;
use crate::session::SessionTokens;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// What a relay call handed back, which also picks the consumer's code path.
pub enum TransportResponse {
    /// A complete, already parsed JSON answer.
    Json(JsonValue),
    Stream(ByteStream),
    NoBody,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(<opaque>)"),
            Self::NoBody => f.write_str("NoBody"),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts `body` to the named relay function.
    ///
    /// Non-2xx statuses come back as errors (429 and 402 as their own kinds).
    async fn send(
        &self,
        function: &str,
        body: &RelayRequestBody,
    ) -> Result<TransportResponse, StreamError>;
}

pub struct WreqTransport {
    client: Client,
    config: ConsumerConfig,
    session: Arc<dyn SessionTokens>,
}

impl WreqTransport {
    pub fn new(
        config: ConsumerConfig,
        session: Arc<dyn SessionTokens>,
    ) -> Result<Self, StreamError> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|err| StreamError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            config,
            session,
        })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for WreqTransport {
    async fn send(
        &self,
        function: &str,
        body: &RelayRequestBody,
    ) -> Result<TransportResponse, StreamError> {
        let bearer = match self.session.access_token().await {
            Some(token) => token,
            None => self.config.public_key.clone(),
        };
        let payload =
            serde_json::to_vec(body).map_err(|err| StreamError::Transport(err.to_string()))?;
        let url = self.config.function_url(function);
        debug!(event = "relay_request", url = %url, body_bytes = payload.len());

        let resp = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {bearer}"))
            .header("apikey", &self.config.public_key)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|err| StreamError::Transport(err.to_string()))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp
                .text()
                .await
                .map_err(|err| StreamError::Transport(err.to_string()))?;
            return Err(StreamError::from_status(status, body));
        }
        if status == 204 {
            return Ok(TransportResponse::NoBody);
        }

        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase().starts_with("application/json"))
            .unwrap_or(false);
        if is_json {
            let value = resp
                .json::<JsonValue>()
                .await
                .map_err(|err| StreamError::Upstream {
                    status,
                    body: format!("malformed JSON body: {err}"),
                })?;
            return Ok(TransportResponse::Json(value));
        }

        let stream = resp
            .bytes_stream()
            .map(|item| item.map_err(|err| StreamError::Transport(err.to_string())));
        Ok(TransportResponse::Stream(Box::pin(stream)))
    }
}
