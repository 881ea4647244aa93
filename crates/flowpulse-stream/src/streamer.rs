use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowpulse_common::ConsumerConfig;
use flowpulse_protocol::{ChatCompletion, DeltaAssembler, Message, RelayRequestBody};

use crate::error::{StreamError, TimeoutPhase};
use crate::handler::StreamHandler;
use crate::session::SessionTokens;
use crate::transport::{ByteStream, Transport, TransportResponse, WreqTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Done,
    Errored,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Done { fragments: usize },
    Errored(StreamError),
    Cancelled { fragments: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct StreamTimeouts {
    /// Bound on the wait for response headers.
    pub request: Duration,
    /// Bound on each body read.
    pub idle: Duration,
}

impl StreamTimeouts {
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self {
            request: config.request_timeout(),
            idle: config.idle_timeout(),
        }
    }
}

/// Streams one relay function's answers into a [`StreamHandler`].
///
/// One call at a time per instance; overlapping calls are not guarded against.
pub struct ChatStreamer {
    transport: Arc<dyn Transport>,
    function: String,
    timeouts: StreamTimeouts,
    state: watch::Sender<StreamState>,
}

impl ChatStreamer {
    pub fn new(
        transport: Arc<dyn Transport>,
        function: impl Into<String>,
        timeouts: StreamTimeouts,
    ) -> Self {
        let (state, _) = watch::channel(StreamState::Idle);
        Self {
            transport,
            function: function.into(),
            timeouts,
            state,
        }
    }

    /// Streamer over HTTP for `function` on the configured deployment.
    pub fn connect(
        config: ConsumerConfig,
        session: Arc<dyn SessionTokens>,
        function: impl Into<String>,
    ) -> Result<Self, StreamError> {
        let timeouts = StreamTimeouts::from_config(&config);
        let transport = WreqTransport::new(config, session)?;
        Ok(Self::new(Arc::new(transport), function, timeouts))
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == StreamState::Streaming
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    pub async fn stream_chat<H>(&self, messages: Vec<Message>, handler: &mut H) -> StreamOutcome
    where
        H: StreamHandler + ?Sized,
    {
        self.stream_chat_with(messages, Map::new(), handler, CancellationToken::new())
            .await
    }

    /// Like [`stream_chat`](Self::stream_chat) with extra mode fields and a cancel token.
    ///
    /// Cancellation is observed while waiting for the response and between reads.
    /// A cancelled call fires no terminal callback.
    pub async fn stream_chat_with<H>(
        &self,
        messages: Vec<Message>,
        extra_fields: Map<String, JsonValue>,
        handler: &mut H,
        cancel: CancellationToken,
    ) -> StreamOutcome
    where
        H: StreamHandler + ?Sized,
    {
        let guard = StreamingGuard::begin(&self.state);
        let started_at = Instant::now();
        let mut body = RelayRequestBody::new(messages);
        body.stream = Some(true);
        body.fields = extra_fields;
        info!(
            event = "stream_started",
            function = %self.function,
            messages = body.messages.len()
        );

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            sent = tokio::time::timeout(
                self.timeouts.request,
                self.transport.send(&self.function, &body),
            ) => Some(sent),
        };
        let response = match sent {
            None => return self.cancelled(guard, 0, started_at),
            Some(Err(_)) => Err(StreamError::TimedOut(TimeoutPhase::Response)),
            Some(Ok(response)) => response,
        };

        let result = match response {
            Err(err) => Err((err, 0)),
            Ok(TransportResponse::NoBody) => Err((StreamError::MissingBody, 0)),
            Ok(TransportResponse::Json(value)) => deliver_buffered(value, handler),
            Ok(TransportResponse::Stream(stream)) => {
                match self.read_stream(stream, handler, &cancel).await {
                    ReadEnd::Finished(fragments) => Ok(fragments),
                    ReadEnd::Failed(err, fragments) => Err((err, fragments)),
                    ReadEnd::Cancelled(fragments) => {
                        return self.cancelled(guard, fragments, started_at);
                    }
                }
            }
        };

        match result {
            Ok(fragments) => {
                handler.on_done();
                guard.finish(StreamState::Done);
                info!(
                    event = "stream_finished",
                    function = %self.function,
                    fragments,
                    elapsed_ms = started_at.elapsed().as_millis()
                );
                StreamOutcome::Done { fragments }
            }
            Err((err, fragments)) => {
                handler.on_error(&err.to_string());
                guard.finish(StreamState::Errored);
                warn!(
                    event = "stream_failed",
                    function = %self.function,
                    error = %err,
                    fragments,
                    elapsed_ms = started_at.elapsed().as_millis()
                );
                StreamOutcome::Errored(err)
            }
        }
    }

    async fn read_stream<H>(
        &self,
        mut stream: ByteStream,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> ReadEnd
    where
        H: StreamHandler + ?Sized,
    {
        let mut assembler = DeltaAssembler::new();
        let mut fragments = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReadEnd::Cancelled(fragments),
                next = tokio::time::timeout(self.timeouts.idle, stream.next()) => next,
            };
            let chunk = match next {
                Err(_) => return ReadEnd::Failed(StreamError::TimedOut(TimeoutPhase::Read), fragments),
                Ok(None) => break,
                Ok(Some(Err(err))) => return ReadEnd::Failed(err, fragments),
                Ok(Some(Ok(chunk))) => chunk,
            };

            let step = assembler.push(&chunk);
            for dropped in &step.dropped {
                debug!(event = "frame_dropped", function = %self.function, text = %dropped);
            }
            for delta in &step.deltas {
                handler.on_delta(delta);
                fragments += 1;
            }
            if step.done {
                return ReadEnd::Finished(fragments);
            }
        }

        let flush = assembler.finish();
        if !flush.deltas.is_empty() || !flush.dropped.is_empty() {
            debug!(
                event = "best_effort_flush",
                function = %self.function,
                recovered = flush.deltas.len(),
                dropped = flush.dropped.len()
            );
        }
        for delta in &flush.deltas {
            handler.on_delta(delta);
            fragments += 1;
        }
        ReadEnd::Finished(fragments)
    }

    fn cancelled(
        &self,
        guard: StreamingGuard<'_>,
        fragments: usize,
        started_at: Instant,
    ) -> StreamOutcome {
        guard.finish(StreamState::Cancelled);
        info!(
            event = "stream_cancelled",
            function = %self.function,
            fragments,
            elapsed_ms = started_at.elapsed().as_millis()
        );
        StreamOutcome::Cancelled { fragments }
    }
}

enum ReadEnd {
    Finished(usize),
    Failed(StreamError, usize),
    Cancelled(usize),
}

/// Non-streaming answer: one delta with the whole message, if it has content.
fn deliver_buffered<H>(value: JsonValue, handler: &mut H) -> Result<usize, (StreamError, usize)>
where
    H: StreamHandler + ?Sized,
{
    if let Some(error) = value.get("error").and_then(JsonValue::as_str) {
        return Err((
            StreamError::Upstream {
                status: 200,
                body: error.to_string(),
            },
            0,
        ));
    }
    let completion: ChatCompletion = serde_json::from_value(value.clone()).map_err(|_| {
        (
            StreamError::Upstream {
                status: 200,
                body: value.to_string(),
            },
            0,
        )
    })?;
    match completion.content() {
        Some(content) => {
            handler.on_delta(content);
            Ok(1)
        }
        None => Ok(0),
    }
}

/// Holds the state at `Streaming` until a terminal state is set.
///
/// Dropping it unfinished (the call's future was dropped) records `Cancelled`.
struct StreamingGuard<'a> {
    state: &'a watch::Sender<StreamState>,
    finished: bool,
}

impl<'a> StreamingGuard<'a> {
    fn begin(state: &'a watch::Sender<StreamState>) -> Self {
        state.send_replace(StreamState::Streaming);
        Self {
            state,
            finished: false,
        }
    }

    fn finish(mut self, terminal: StreamState) {
        self.state.send_replace(terminal);
        self.finished = true;
    }
}

impl Drop for StreamingGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.send_replace(StreamState::Cancelled);
        }
    }
}
