use anyhow::Result;
use futures::future::BoxFuture;

/// Source of fresh identity-provider tokens.
///
/// Front ends implement this over whatever sign-in flow they run; the session
/// manager only ever sees the opaque token string it yields.
pub trait IdentityProvider: Send + Sync {
    fn identity_token(&self) -> BoxFuture<'_, Result<String>>;
}

/// Provider that always hands out the same token.
pub struct StaticIdentityProvider {
    token: String,
}

impl StaticIdentityProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn identity_token(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { Ok(self.token.clone()) })
    }
}
