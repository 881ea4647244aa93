use async_trait::async_trait;

/// Source of the caller's current session token.
#[async_trait]
pub trait SessionTokens: Send + Sync {
    /// `None` when signed out; the transport then falls back to the public key.
    async fn access_token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    token: Option<String>,
}

impl StaticSession {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionTokens for StaticSession {
    async fn access_token(&self) -> Option<String> {
        self.token.clone()
    }
}
