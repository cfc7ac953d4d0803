//! Shared mocks for the refresher integration tests: an in-memory credential
//! store and a scripted OAuth client, both with call counters.

#![allow(dead_code)]

use async_trait::async_trait;
use iflow_hub::{
    AppResult, CredentialStore, GatewayCredentials, OAuthClient, OAuthClientFactory,
    OAuthTokenSet, AUTH_MODE_OAUTH,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn oauth_record(expires_at: i64) -> GatewayCredentials {
    GatewayCredentials {
        auth_mode: AUTH_MODE_OAUTH.to_string(),
        access_token: "old".to_string(),
        refresh_token: Some("r1".to_string()),
        expires_at: Some(expires_at),
    }
}

pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as i64
}

/// In-memory credential store with failure injection.
pub struct MockStore {
    record: Mutex<GatewayCredentials>,
    save_calls: AtomicUsize,
    fail_loads: AtomicBool,
}

impl MockStore {
    pub fn new(record: GatewayCredentials) -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(record),
            save_calls: AtomicUsize::new(0),
            fail_loads: AtomicBool::new(false),
        })
    }

    pub fn snapshot(&self) -> GatewayCredentials {
        self.record.lock().expect("store lock").clone()
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }
}

impl CredentialStore for MockStore {
    fn load(&self) -> AppResult<GatewayCredentials> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err("IO_ERROR: injected load failure".into());
        }
        Ok(self.snapshot())
    }

    fn save(&self, credentials: &GatewayCredentials) -> AppResult<()> {
        *self.record.lock().expect("store lock") = credentials.clone();
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
enum ExchangeScript {
    Succeed(OAuthTokenSet),
    Fail,
    /// Sleep before succeeding, to keep a refresh in flight during `stop`.
    SucceedAfter(Duration, OAuthTokenSet),
}

/// Scripted OAuth client factory. Each `open` hands out a client sharing the
/// same script and counters, mirroring the one-client-per-operation contract.
pub struct MockOAuth {
    script: Arc<Mutex<ExchangeScript>>,
    refresh_calls: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
    seen_refresh_tokens: Arc<Mutex<Vec<String>>>,
}

impl MockOAuth {
    pub fn succeeding(tokens: OAuthTokenSet) -> Arc<Self> {
        Self::with_script(ExchangeScript::Succeed(tokens))
    }

    pub fn failing() -> Arc<Self> {
        Self::with_script(ExchangeScript::Fail)
    }

    pub fn slow(delay: Duration, tokens: OAuthTokenSet) -> Arc<Self> {
        Self::with_script(ExchangeScript::SucceedAfter(delay, tokens))
    }

    fn with_script(script: ExchangeScript) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Mutex::new(script)),
            refresh_calls: Arc::new(AtomicUsize::new(0)),
            close_calls: Arc::new(AtomicUsize::new(0)),
            seen_refresh_tokens: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn seen_refresh_tokens(&self) -> Vec<String> {
        self.seen_refresh_tokens.lock().expect("tokens lock").clone()
    }
}

impl OAuthClientFactory for MockOAuth {
    fn open(&self) -> AppResult<Box<dyn OAuthClient>> {
        Ok(Box::new(MockOAuthClient {
            script: Arc::clone(&self.script),
            refresh_calls: Arc::clone(&self.refresh_calls),
            close_calls: Arc::clone(&self.close_calls),
            seen_refresh_tokens: Arc::clone(&self.seen_refresh_tokens),
        }))
    }
}

struct MockOAuthClient {
    script: Arc<Mutex<ExchangeScript>>,
    refresh_calls: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
    seen_refresh_tokens: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl OAuthClient for MockOAuthClient {
    async fn refresh_token(&self, refresh_token: &str) -> AppResult<OAuthTokenSet> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_refresh_tokens
            .lock()
            .expect("tokens lock")
            .push(refresh_token.to_string());

        let script = self.script.lock().expect("script lock").clone();
        match script {
            ExchangeScript::Succeed(tokens) => Ok(tokens),
            ExchangeScript::Fail => Err("OAUTH_EXCHANGE: injected provider failure".into()),
            ExchangeScript::SucceedAfter(delay, tokens) => {
                tokio::time::sleep(delay).await;
                Ok(tokens)
            }
        }
    }

    async fn close(&self) -> AppResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
