//! Wire types and stream framing for the FlowPulse chat pipeline.
//!
//! Nothing in this crate performs IO. The relay and the stream consumer both
//! depend on it for the shapes they exchange with the upstream chat-completions
//! service, and the consumer drives [`DeltaAssembler`] with raw body chunks.

pub mod assemble;
pub mod chat;
pub mod sse;

pub use assemble::{DeltaAssembler, Flush, Step};
pub use chat::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, CompletionChoice,
    CompletionMessage, ErrorBody, Message, RelayRequestBody, Role, StreamChoice, StreamDelta,
};
pub use sse::{
    DONE_SENTINEL, DATA_PREFIX, Frame, FramedLines, PayloadError, Utf8Decoder, classify_line,
    decode_delta, split_lines,
};
