use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;

use flowpulse_protocol::ErrorBody;

use crate::upstream_client::TransportErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("missing request body")]
    MissingBody,
    #[error("invalid request body: {0}")]
    InvalidBody(String),
    #[error("messages must not be empty")]
    EmptyMessages,
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("Rate limit exceeded, please try again later.")]
    RateLimited,
    #[error("Payment required, please add credits to your workspace.")]
    PaymentRequired,
    #[error("AI gateway error (status {status})")]
    Upstream { status: u16, body: String },
    #[error("AI gateway returned a malformed response")]
    MalformedUpstream,
    #[error("AI gateway unreachable ({kind})")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Maps a non-2xx upstream status to the contract's three outcomes.
    pub fn from_upstream_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited,
            402 => Self::PaymentRequired,
            _ => Self::Upstream { status, body },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingBody | Self::InvalidBody(_) | Self::EmptyMessages => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownFunction(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            Self::Upstream { .. }
            | Self::MalformedUpstream
            | Self::Transport { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody::new(self.to_string()))).into_response()
    }
}
