//! Credential-refresh core for the iFlow local API gateway: a background
//! scheduler that keeps the single gateway OAuth credential fresh, renews it
//! ahead of expiry, persists the result and notifies listeners - and never
//! takes the host process down on failure.

mod infra;
mod oauth;
mod refresher;
mod shared;

pub use infra::credentials::{
    CredentialStore, GatewayCredentials, JsonCredentialStore, AUTH_MODE_OAUTH,
};
pub use infra::logging::init_file_logging;
pub use oauth::client::{OAuthClient, OAuthClientFactory, OAuthTokenSet};
pub use oauth::refresh::{is_token_expired, should_refresh_now};
pub use oauth::token_exchange::{IflowOAuth, IflowOAuthEndpoint};
pub use refresher::{
    global_refresher, start_global_refresher, stop_global_refresher, TokenRefresher,
    DEFAULT_CHECK_INTERVAL, DEFAULT_REFRESH_BUFFER_SECS,
};
pub use shared::error::{AppError, AppResult};
