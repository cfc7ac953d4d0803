//! Usage: Gateway credential record (schema + file-backed store).
//!
//! The record is owned by the store; the refresher only reads a snapshot at
//! the start of a tick and writes back a patched copy after a successful
//! exchange. A missing file is not an error and loads as the default record.

use crate::oauth::client::OAuthTokenSet;
use crate::shared::error::AppResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `auth_mode` value for credentials managed by the iFlow OAuth flow.
pub const AUTH_MODE_OAUTH: &str = "oauth-iflow";

const CREDENTIALS_FILE: &str = "credentials.json";
const DOTDIR_ENV: &str = "IFLOW_HUB_DOTDIR";
const DEFAULT_DOTDIR: &str = ".iflow-hub";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayCredentials {
    pub auth_mode: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absolute expiry, unix seconds. Absent disables auto-refresh.
    pub expires_at: Option<i64>,
}

impl GatewayCredentials {
    /// The refresh token, if the record qualifies for auto-refresh at all.
    ///
    /// Requires the OAuth auth mode, a non-empty refresh token and a known
    /// expiry. Anything else means the record was never completed (or is
    /// API-key based) and the scheduler must leave it alone.
    pub fn refresh_inputs(&self) -> Option<(&str, i64)> {
        if self.auth_mode != AUTH_MODE_OAUTH {
            return None;
        }
        let refresh_token = self
            .refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())?;
        let expires_at = self.expires_at?;
        Some((refresh_token, expires_at))
    }

    /// Merge a token-exchange result into the record.
    ///
    /// `access_token` is replaced unconditionally. `refresh_token` and
    /// `expires_at` are replaced only when the exchange supplied a new value,
    /// since a provider may choose not to rotate them.
    pub fn apply_refresh(&mut self, tokens: &OAuthTokenSet) {
        self.access_token = tokens.access_token.clone();
        if let Some(rotated) = tokens
            .refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            self.refresh_token = Some(rotated.to_string());
        }
        if let Some(expires_at) = tokens.expires_at {
            self.expires_at = Some(expires_at);
        }
    }
}

/// Persistence seam for the credential record.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> AppResult<GatewayCredentials>;
    fn save(&self, credentials: &GatewayCredentials) -> AppResult<()>;
}

/// File-based store at `<dot-dir>/credentials.json`.
#[derive(Debug, Clone)]
pub struct JsonCredentialStore {
    path: PathBuf,
}

impl JsonCredentialStore {
    pub fn new() -> Self {
        Self {
            path: dotdir().join(CREDENTIALS_FILE),
        }
    }

    /// Store at a specific path (useful for testing).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for JsonCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for JsonCredentialStore {
    fn load(&self) -> AppResult<GatewayCredentials> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(GatewayCredentials::default());
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    fn save(&self, credentials: &GatewayCredentials) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(credentials)?;
        std::fs::write(&self.path, &data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

/// Application dot-dir, `~/.iflow-hub` unless overridden via `IFLOW_HUB_DOTDIR`.
pub(crate) fn dotdir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DOTDIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    home_dir().join(DEFAULT_DOTDIR)
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
