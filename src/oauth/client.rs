//! Usage: OAuth client seam - the token-exchange capability the refresher
//! acquires per operation and releases on every exit path.

use crate::shared::error::AppResult;
use async_trait::async_trait;

/// Result of one `refresh_token` grant. Ephemeral: lives for the duration of
/// one refresh operation and the callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absolute expiry, unix seconds.
    pub expires_at: Option<i64>,
}

/// One acquired OAuth client. `close` must be safe to call even after a
/// failed exchange.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    async fn refresh_token(&self, refresh_token: &str) -> AppResult<OAuthTokenSet>;

    async fn close(&self) -> AppResult<()>;

    /// Whether a credential expiring at `expires_at` is due for renewal,
    /// measured against the wall clock with the given safety buffer.
    fn is_token_expired(&self, expires_at: i64, buffer_secs: i64) -> bool {
        crate::oauth::refresh::is_token_expired(
            expires_at,
            buffer_secs,
            crate::shared::time::now_unix_seconds(),
        )
    }
}

/// Scoped acquisition: the refresher opens a fresh client for each refresh
/// operation and closes it when the operation ends, success or not.
pub trait OAuthClientFactory: Send + Sync {
    fn open(&self) -> AppResult<Box<dyn OAuthClient>>;
}
