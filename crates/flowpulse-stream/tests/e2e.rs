use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use flowpulse_common::{ConsumerConfig, GlobalConfigPatch};
use flowpulse_protocol::Message;
use flowpulse_relay::{
    RelayState, TransportErrorKind, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamRequest, UpstreamResponse,
    relay_router,
};
use flowpulse_stream::{
    Callbacks, ChatStreamer, StaticSession, StreamError, StreamOutcome, StreamState,
};

/// Upstream that answers every call with a fixed chunk sequence.
struct ChunkedUpstream {
    chunks: Vec<&'static [u8]>,
    /// Fail the body read after the last chunk.
    broken: bool,
}

impl UpstreamClient for ChunkedUpstream {
    fn send<'a>(
        &'a self,
        _req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamFailure>> + Send + 'a>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(self.chunks.len() + 1);
            for chunk in &self.chunks {
                tx.send(Ok(Bytes::from_static(*chunk))).await.unwrap();
            }
            if self.broken {
                tx.send(Err(UpstreamFailure {
                    kind: TransportErrorKind::Other,
                    message: "connection reset by peer".into(),
                }))
                .await
                .unwrap();
            }
            Ok(UpstreamResponse {
                status: 200,
                headers: vec![("content-type".into(), "text/event-stream".into())],
                body: UpstreamBody::Stream(rx),
            })
        })
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn serve_relay(upstream: ChunkedUpstream) -> SocketAddr {
    let config = GlobalConfigPatch {
        upstream_url: Some("http://upstream.invalid/v1/chat/completions".into()),
        upstream_api_key: Some("sk-server".into()),
        ..GlobalConfigPatch::default()
    }
    .into_config()
    .unwrap();
    serve(relay_router(RelayState::new(config, Arc::new(upstream)))).await
}

fn consumer_config(addr: SocketAddr) -> ConsumerConfig {
    ConsumerConfig::from_parts(
        Some(format!("http://{addr}")),
        Some("pk-public".into()),
        None,
        Some(5),
        Some(5),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn streams_through_the_relay() {
    let upstream = ChunkedUpstream {
        chunks: vec![
            &b": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"Hel"[..],
            &b"lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" w\xc3"[..],
            &b"\xb6rld\"}}]}\n\ndata: [DONE]\n\n"[..],
        ],
        broken: false,
    };
    let addr = serve_relay(upstream).await;

    let streamer = ChatStreamer::connect(
        consumer_config(addr),
        Arc::new(StaticSession::signed_out()),
        "ai-chat",
    )
    .unwrap();

    let mut text = String::new();
    let mut done = 0;
    let mut errors = Vec::new();
    let outcome = {
        let mut handler = Callbacks::new(
            |delta: &str| text.push_str(delta),
            || done += 1,
            |message: &str| errors.push(message.to_string()),
        );
        streamer
            .stream_chat(vec![Message::user("hi")], &mut handler)
            .await
    };

    assert_eq!(outcome, StreamOutcome::Done { fragments: 2 });
    assert_eq!(text, "Hello wörld");
    assert_eq!(done, 1);
    assert!(errors.is_empty());
    assert_eq!(streamer.state(), StreamState::Done);
}

#[tokio::test(flavor = "multi_thread")]
async fn upstream_failure_mid_stream_reaches_on_error() {
    let upstream = ChunkedUpstream {
        chunks: vec![&b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n"[..]],
        broken: true,
    };
    let addr = serve_relay(upstream).await;

    let streamer = ChatStreamer::connect(
        consumer_config(addr),
        Arc::new(StaticSession::signed_out()),
        "ai-chat",
    )
    .unwrap();

    let mut text = String::new();
    let mut errors = Vec::new();
    let outcome = {
        let mut handler = Callbacks::new(
            |delta: &str| text.push_str(delta),
            || panic!("a cut stream is not done"),
            |message: &str| errors.push(message.to_string()),
        );
        streamer
            .stream_chat(vec![Message::user("hi")], &mut handler)
            .await
    };

    assert!(matches!(
        outcome,
        StreamOutcome::Errored(StreamError::Transport(_))
    ));
    assert_eq!(text, "Hel");
    assert_eq!(errors.len(), 1);
    assert_eq!(streamer.state(), StreamState::Errored);
}

#[tokio::test(flavor = "multi_thread")]
async fn sends_credentials_and_maps_rate_limit() {
    let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
    let recorded = seen.clone();
    let app = Router::new().route(
        "/functions/v1/ai-chat",
        post(move |headers: HeaderMap| {
            let recorded = recorded.clone();
            async move {
                let header = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                };
                recorded
                    .lock()
                    .unwrap()
                    .push((header("authorization"), header("apikey")));
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("content-type", "application/json")],
                    r#"{"error":"Rate limit exceeded, please try again later."}"#,
                )
            }
        }),
    );
    let addr = serve(app).await;

    let streamer = ChatStreamer::connect(
        consumer_config(addr),
        Arc::new(StaticSession::new(Some("user-jwt".into()))),
        "ai-chat",
    )
    .unwrap();

    let mut errors = Vec::new();
    let outcome = {
        let mut handler = Callbacks::new(
            |_: &str| {},
            || panic!("no done on error"),
            |message: &str| errors.push(message.to_string()),
        );
        streamer
            .stream_chat(vec![Message::user("hi")], &mut handler)
            .await
    };

    assert_eq!(outcome, StreamOutcome::Errored(StreamError::RateLimited));
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Rate limit"));
    assert!(!streamer.is_streaming());
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[("Bearer user-jwt".to_string(), "pk-public".to_string())]
    );
}
