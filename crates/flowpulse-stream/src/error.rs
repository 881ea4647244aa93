use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting for response headers.
    Response,
    /// Waiting for the next body chunk.
    Read,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response => f.write_str("the response"),
            Self::Read => f.write_str("the next chunk"),
        }
    }
}

/// Fatal failures of one streaming call. Each one reaches `on_error` exactly once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Rate limit exceeded, please try again later.")]
    RateLimited,
    #[error("Payment required, please add credits to your workspace.")]
    PaymentRequired,
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("response has no body")]
    MissingBody,
    #[error("timed out waiting for {0}")]
    TimedOut(TimeoutPhase),
}

impl StreamError {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited,
            402 => Self::PaymentRequired,
            _ => Self::Upstream { status, body },
        }
    }
}
