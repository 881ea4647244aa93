//! The relay: named chat functions in front of one chat-completions upstream.
//!
//! The server-held credential never leaves this process. Callers post a message
//! list, the function's system prompt is prepended, and the upstream answer is
//! relayed back either as an SSE pass-through or as the upstream JSON.

mod error;
mod headers;
mod prompt;
mod router;
mod upstream_client;

pub use error::RelayError;
pub use headers::{Headers, header_get, header_set};
pub use prompt::render_system_prompt;
pub use router::{REQUEST_ID_HEADER, RelayState, relay_router, wrap_sse_stream_with_heartbeat};
pub use upstream_client::{
    TransportErrorKind, UpstreamBody, UpstreamChunk, UpstreamClient, UpstreamClientConfig,
    UpstreamFailure, UpstreamRequest, UpstreamResponse, WreqUpstreamClient,
};
