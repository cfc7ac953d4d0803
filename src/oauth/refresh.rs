//! Usage: Pure expiry-policy helpers, shared by the scheduler loop and the
//! on-demand `should_refresh_now` query.

/// True iff the token is due for renewal: `now >= expires_at - buffer`.
/// Boundary equality counts as due; a negative buffer clamps to zero.
pub fn is_token_expired(expires_at: i64, buffer_secs: i64, now_unix: i64) -> bool {
    let buffer = buffer_secs.max(0);
    expires_at.saturating_sub(buffer) <= now_unix
}

/// Policy over an optional expiry: an unknown expiry is never due.
pub fn should_refresh_now(expires_at: Option<i64>, buffer_secs: i64, now_unix: i64) -> bool {
    let Some(expiry) = expires_at else {
        return false;
    };
    is_token_expired(expiry, buffer_secs, now_unix)
}
