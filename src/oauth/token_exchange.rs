//! Usage: reqwest-backed OAuth client for the `refresh_token` grant against
//! the iFlow token endpoint.

use crate::oauth::client::{OAuthClient, OAuthClientFactory, OAuthTokenSet};
use crate::shared::error::AppResult;
use crate::shared::time::now_unix_seconds;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

const DEFAULT_TOKEN_URI: &str = "https://iflow.cn/oauth/token";
const DEFAULT_CLIENT_ID: &str = "10009311001";
const ERROR_BODY_SNIPPET_MAX: usize = 240;

/// Token-endpoint coordinates. Doubles as the client factory handed to the
/// refresher: each refresh operation gets a fresh `IflowOAuth`.
#[derive(Debug, Clone)]
pub struct IflowOAuthEndpoint {
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl Default for IflowOAuthEndpoint {
    fn default() -> Self {
        Self {
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: None,
        }
    }
}

impl OAuthClientFactory for IflowOAuthEndpoint {
    fn open(&self) -> AppResult<Box<dyn OAuthClient>> {
        Ok(Box::new(IflowOAuth {
            http: reqwest::Client::new(),
            endpoint: self.clone(),
        }))
    }
}

pub struct IflowOAuth {
    http: reqwest::Client,
    endpoint: IflowOAuthEndpoint,
}

#[async_trait]
impl OAuthClient for IflowOAuth {
    async fn refresh_token(&self, refresh_token: &str) -> AppResult<OAuthTokenSet> {
        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("grant_type", "refresh_token".to_string());
        form.insert("refresh_token", refresh_token.trim().to_string());
        form.insert("client_id", self.endpoint.client_id.trim().to_string());
        if let Some(secret) = self.endpoint.client_secret.as_deref().map(str::trim) {
            if !secret.is_empty() {
                form.insert("client_secret", secret.to_string());
            }
        }

        let response = self
            .http
            .post(self.endpoint.token_uri.trim())
            .form(&form)
            .send()
            .await
            .map_err(|e| format!("OAUTH_EXCHANGE: token refresh request failed: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("OAUTH_EXCHANGE: token response read failed: {e}"))?;

        if !status.is_success() {
            return Err(format!(
                "OAUTH_EXCHANGE: token endpoint returned status={} body={}",
                status.as_u16(),
                sanitize_error_body_snippet(&body)
            )
            .into());
        }

        parse_token_payload(&body, now_unix_seconds())
    }

    async fn close(&self) -> AppResult<()> {
        // reqwest has no explicit shutdown; dropping the client releases the
        // connection pool. The trait method exists so other implementations
        // can hold real session resources.
        Ok(())
    }
}

/// Parse a successful token-endpoint body. `access_token` is required;
/// `refresh_token` is optional (providers may not rotate); a positive
/// `expires_in` becomes an absolute `expires_at` relative to `now_unix`.
fn parse_token_payload(body: &str, now_unix: i64) -> AppResult<OAuthTokenSet> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("OAUTH_EXCHANGE: token response json invalid: {e}"))?;

    let access_token = value
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| "OAUTH_EXCHANGE: token response missing access_token".to_string())?
        .to_string();

    let refresh_token = value
        .get("refresh_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let expires_in = value.get("expires_in").and_then(parse_i64_lossy);
    let expires_at = expires_in.and_then(|v| {
        if v <= 0 {
            None
        } else {
            Some(now_unix.saturating_add(v))
        }
    });

    Ok(OAuthTokenSet {
        access_token,
        refresh_token,
        expires_at,
    })
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lc = key.trim().to_ascii_lowercase();
    key_lc.contains("token") || key_lc.contains("secret")
}

/// Keep error bodies loggable without leaking credentials: redact values of
/// token/secret keys in JSON bodies, then truncate.
fn sanitize_error_body_snippet(body: &str) -> String {
    let sanitized = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => {
            let redacted: serde_json::Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| {
                    if is_sensitive_key(&k) {
                        (k, Value::String("<redacted>".to_string()))
                    } else {
                        (k, v)
                    }
                })
                .collect();
            Value::Object(redacted).to_string()
        }
        _ => body.trim().to_string(),
    };
    sanitized.chars().take(ERROR_BODY_SNIPPET_MAX).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_token_payload_maps_expires_in_to_absolute_expiry() {
        let tokens = parse_token_payload(
            r#"{"access_token":"at","refresh_token":"rt","expires_in":3600}"#,
            1_000,
        )
        .expect("parse");
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt"));
        assert_eq!(tokens.expires_at, Some(4_600));
    }

    #[test]
    fn parse_token_payload_tolerates_missing_rotation_and_expiry() {
        let tokens = parse_token_payload(r#"{"access_token":"at"}"#, 1_000).expect("parse");
        assert!(tokens.refresh_token.is_none());
        assert!(tokens.expires_at.is_none());
    }

    #[test]
    fn parse_token_payload_accepts_string_expires_in() {
        let tokens =
            parse_token_payload(r#"{"access_token":"at","expires_in":"600"}"#, 1_000).expect("parse");
        assert_eq!(tokens.expires_at, Some(1_600));
    }

    #[test]
    fn parse_token_payload_rejects_missing_access_token() {
        let err = parse_token_payload(r#"{"refresh_token":"rt"}"#, 1_000).unwrap_err();
        assert_eq!(err.code(), "OAUTH_EXCHANGE");
    }

    #[test]
    fn parse_token_payload_ignores_non_positive_expires_in() {
        let tokens =
            parse_token_payload(r#"{"access_token":"at","expires_in":0}"#, 1_000).expect("parse");
        assert!(tokens.expires_at.is_none());
    }

    #[test]
    fn opened_client_reports_expiry_via_policy() {
        let client = IflowOAuthEndpoint::default().open().expect("open");
        assert!(client.is_token_expired(0, 0));
        assert!(!client.is_token_expired(i64::MAX, 300));
    }

    #[test]
    fn error_snippet_redacts_sensitive_keys() {
        let snippet =
            sanitize_error_body_snippet(r#"{"error":"invalid_grant","refresh_token":"rt-secret"}"#);
        assert!(snippet.contains("invalid_grant"));
        assert!(!snippet.contains("rt-secret"));
    }

    #[test]
    fn error_snippet_truncates_long_bodies() {
        let body = "x".repeat(10_000);
        assert_eq!(sanitize_error_body_snippet(&body).len(), ERROR_BODY_SNIPPET_MAX);
    }
}
