//! Client side of the relay: turns a function's SSE answer into ordered deltas.

mod error;
mod handler;
mod session;
mod streamer;
mod transport;

pub use error::{StreamError, TimeoutPhase};
pub use handler::{Callbacks, StreamHandler};
pub use session::{SessionTokens, StaticSession};
pub use streamer::{ChatStreamer, StreamOutcome, StreamState, StreamTimeouts};
pub use tokio_util::sync::CancellationToken;
pub use transport::{ByteStream, Transport, TransportResponse, WreqTransport};
