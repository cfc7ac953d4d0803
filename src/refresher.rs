//! Usage: Background OAuth credential refresher for the local gateway.
//!
//! Contract:
//! - One loop task per instance, spawned by `start()` on the tokio runtime.
//! - Each tick: load a fresh credential snapshot, apply the expiry policy,
//!   run the refresh exchange when due. Ticks are sequential; a new tick
//!   never starts while a refresh is still in flight.
//! - Nothing raised inside a tick escapes the loop. A failed exchange or save
//!   leaves the stored record unchanged, so the next tick retries.
//! - `stop()` wakes the end-of-tick wait immediately and joins the task with
//!   a bounded timeout; an in-flight refresh that outlives the bound is
//!   detached, not aborted.

use crate::infra::credentials::{CredentialStore, GatewayCredentials, JsonCredentialStore};
use crate::oauth::client::{OAuthClientFactory, OAuthTokenSet};
use crate::oauth::refresh::is_token_expired;
use crate::oauth::token_exchange::IflowOAuthEndpoint;
use crate::shared::error::{AppError, AppResult};
use crate::shared::time::now_unix_seconds;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 300;
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

type RefreshCallback = Arc<dyn Fn(&OAuthTokenSet) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Stopped,
    Running,
    Stopping,
}

struct LoopState {
    phase: RunPhase,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

/// Everything a tick needs, shared between the handle and the loop task.
struct RefreshEngine {
    check_interval: Duration,
    refresh_buffer_secs: i64,
    store: Arc<dyn CredentialStore>,
    oauth: Arc<dyn OAuthClientFactory>,
    callback: Mutex<Option<RefreshCallback>>,
}

pub struct TokenRefresher {
    engine: Arc<RefreshEngine>,
    state: Mutex<LoopState>,
}

impl std::fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefresher").finish_non_exhaustive()
    }
}

impl TokenRefresher {
    /// Refresher with default tuning: check hourly, renew five minutes early.
    pub fn new(store: Arc<dyn CredentialStore>, oauth: Arc<dyn OAuthClientFactory>) -> Self {
        Self {
            engine: Arc::new(RefreshEngine {
                check_interval: DEFAULT_CHECK_INTERVAL,
                refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
                store,
                oauth,
                callback: Mutex::new(None),
            }),
            state: Mutex::new(LoopState {
                phase: RunPhase::Stopped,
                stop_tx: None,
                handle: None,
            }),
        }
    }

    /// Refresher with explicit tuning. Zero interval and negative buffer are
    /// construction errors; everything operational never fails.
    pub fn with_tuning(
        store: Arc<dyn CredentialStore>,
        oauth: Arc<dyn OAuthClientFactory>,
        check_interval: Duration,
        refresh_buffer_secs: i64,
    ) -> AppResult<Self> {
        if check_interval.is_zero() {
            return Err(AppError::new(
                "INVALID_TUNING",
                "check_interval must be non-zero",
            ));
        }
        if refresh_buffer_secs < 0 {
            return Err(AppError::new(
                "INVALID_TUNING",
                "refresh_buffer_secs must not be negative",
            ));
        }
        Ok(Self {
            engine: Arc::new(RefreshEngine {
                check_interval,
                refresh_buffer_secs,
                store,
                oauth,
                callback: Mutex::new(None),
            }),
            state: Mutex::new(LoopState {
                phase: RunPhase::Stopped,
                stop_tx: None,
                handle: None,
            }),
        })
    }

    /// Register the callback invoked once per successful refresh, with the
    /// raw exchange result (not the merged record). The callback runs on the
    /// loop task after persistence succeeded and must not panic.
    pub fn set_refresh_callback(&self, callback: impl Fn(&OAuthTokenSet) + Send + Sync + 'static) {
        let mut slot = self
            .engine
            .callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(callback));
    }

    /// Launch the loop task. No-op while a loop is already running (or still
    /// winding down), so at most one loop exists per instance.
    pub fn start(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.phase != RunPhase::Stopped {
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let engine = Arc::clone(&self.engine);
        state.phase = RunPhase::Running;
        state.stop_tx = Some(stop_tx);
        state.handle = Some(tokio::spawn(async move {
            engine.run_loop(stop_rx).await;
        }));

        tracing::info!(
            interval_s = self.engine.check_interval.as_secs(),
            buffer_s = self.engine.refresh_buffer_secs,
            "credential refresher started"
        );
    }

    /// Signal the loop to exit and wait for it, bounded by `STOP_JOIN_TIMEOUT`
    /// regardless of `check_interval`. No-op unless currently running.
    pub async fn stop(&self) {
        let handle = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.phase != RunPhase::Running {
                return;
            }
            state.phase = RunPhase::Stopping;
            if let Some(stop_tx) = state.stop_tx.take() {
                let _ = stop_tx.send(true);
            }
            state.handle.take()
        };

        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!(
                    timeout_s = STOP_JOIN_TIMEOUT.as_secs(),
                    "refresher loop did not exit in time; detaching"
                );
            }
        }

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.phase = RunPhase::Stopped;
        tracing::info!("credential refresher stopped");
    }

    pub fn is_running(&self) -> bool {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.phase == RunPhase::Running
    }

    /// On-demand query: would a tick refresh right now? Load failures and
    /// non-qualifying records degrade to `false`.
    pub fn should_refresh_now(&self) -> bool {
        let Ok(credentials) = self.engine.store.load() else {
            return false;
        };
        let Some((_, expires_at)) = credentials.refresh_inputs() else {
            return false;
        };
        is_token_expired(
            expires_at,
            self.engine.refresh_buffer_secs,
            now_unix_seconds(),
        )
    }
}

impl RefreshEngine {
    async fn run_loop(&self, mut stop_rx: watch::Receiver<bool>) {
        loop {
            if *stop_rx.borrow() {
                break;
            }

            self.tick().await;

            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.check_interval) => {}
            }
        }
        tracing::debug!("credential refresher loop exited");
    }

    async fn tick(&self) {
        if let Err(err) = self.refresh_if_due().await {
            tracing::warn!("credential refresh tick failed: {}", err);
        }
    }

    async fn refresh_if_due(&self) -> AppResult<()> {
        let credentials = self.store.load()?;
        let Some((refresh_token, expires_at)) = credentials.refresh_inputs() else {
            // Record incomplete or not OAuth-based; skip without erroring.
            return Ok(());
        };
        if !is_token_expired(expires_at, self.refresh_buffer_secs, now_unix_seconds()) {
            return Ok(());
        }
        let refresh_token = refresh_token.to_string();
        self.refresh_once(credentials, refresh_token).await
    }

    async fn refresh_once(
        &self,
        mut credentials: GatewayCredentials,
        refresh_token: String,
    ) -> AppResult<()> {
        tracing::info!("refreshing gateway oauth credential");

        let client = self.oauth.open()?;
        let outcome = match client.refresh_token(&refresh_token).await {
            Ok(tokens) => self.persist_and_notify(&mut credentials, &tokens),
            Err(err) => Err(err),
        };

        // Release on every exit path; a close failure never masks the
        // exchange outcome.
        if let Err(err) = client.close().await {
            tracing::debug!("oauth client close failed: {}", err);
        }

        if outcome.is_ok() {
            tracing::info!(
                expires_at = ?credentials.expires_at,
                "gateway oauth credential refreshed"
            );
        }
        outcome
    }

    fn persist_and_notify(
        &self,
        credentials: &mut GatewayCredentials,
        tokens: &OAuthTokenSet,
    ) -> AppResult<()> {
        credentials.apply_refresh(tokens);
        self.store.save(credentials)?;

        let callback = self
            .callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(tokens);
        }
        Ok(())
    }
}

fn global_slot() -> &'static Mutex<Option<Arc<TokenRefresher>>> {
    static GLOBAL_REFRESHER: OnceLock<Mutex<Option<Arc<TokenRefresher>>>> = OnceLock::new();
    GLOBAL_REFRESHER.get_or_init(|| Mutex::new(None))
}

/// Process-wide refresher with default store, endpoint and tuning. Lazily
/// constructed; every call returns the same instance until
/// `stop_global_refresher` discards it. Convenience only - `TokenRefresher`
/// stays independently constructible.
pub fn global_refresher() -> Arc<TokenRefresher> {
    let mut slot = global_slot()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(existing) = slot.as_ref() {
        return Arc::clone(existing);
    }
    let refresher = Arc::new(TokenRefresher::new(
        Arc::new(JsonCredentialStore::new()),
        Arc::new(IflowOAuthEndpoint::default()),
    ));
    *slot = Some(Arc::clone(&refresher));
    refresher
}

pub fn start_global_refresher() {
    global_refresher().start();
}

/// Stop and forget the process-wide instance; the next `global_refresher`
/// call builds a fresh one.
pub async fn stop_global_refresher() {
    let taken = global_slot()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(refresher) = taken {
        refresher.stop().await;
    }
}
