//! Backend session lifecycle.
//!
//! `SessionManager` is the single writer of session state. It keeps an
//! in-memory copy of the token pair that always matches the `SessionStore`
//! (the store is written first, then the new state is published; a failed
//! write clears both), and it is the only path through which authenticated
//! requests reach the backend.
//!
//! Every sign-out and environment switch starts a new session epoch. Work
//! that began in an older epoch (an exchange, a refresh, a retry) can never
//! install tokens into, or present tokens to, the newer one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::api::client::{PushTokenRequest, PUSH_TOKEN_PATH};
use crate::api::{ApiError, BackendClient, ReqwestTransport, Transport};
use crate::config::{Environment, EnvironmentTarget};

use super::{
    IdentityProvider, SessionEvent, SessionState, SessionStatus, SessionStore, SignOutReason,
    TokenPair,
};

/// Retries allowed after a 401: one refresh, one retry, never a loop.
const MAX_AUTH_RETRIES: usize = 1;

/// Buffered session events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 32;

struct Boundary {
    epoch: u64,
    target: EnvironmentTarget,
}

pub struct SessionManager {
    client: BackendClient,
    store: SessionStore,
    boundary: Mutex<Boundary>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    refresh_gate: tokio::sync::Mutex<()>,
    exchange_gate: tokio::sync::Mutex<()>,
    sign_ins: AtomicU64,
}

impl SessionManager {
    /// Create a manager, restoring any complete session found in the store.
    ///
    /// A stored session issued by a different backend than `target` is
    /// discarded, along with the store's contents.
    pub fn new(transport: Arc<dyn Transport>, store: SessionStore, target: EnvironmentTarget) -> Self {
        let initial = match store.load() {
            Some(pair) if store.origin().as_deref() == Some(target.base_url.as_str()) => {
                info!(environment = %target.environment, "Restored backend session from secure store");
                SessionState::Authenticated(pair)
            }
            Some(_) => {
                warn!(
                    environment = %target.environment,
                    "Stored session was issued by another backend, discarding it"
                );
                store.clear();
                SessionState::Unauthenticated
            }
            None => SessionState::Unauthenticated,
        };
        let (state, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            client: BackendClient::new(transport),
            store,
            boundary: Mutex::new(Boundary { epoch: 0, target }),
            state,
            events,
            refresh_gate: tokio::sync::Mutex::new(()),
            exchange_gate: tokio::sync::Mutex::new(()),
            sign_ins: AtomicU64::new(0),
        }
    }

    /// Create a manager that talks HTTP through reqwest.
    pub fn with_default_transport(
        store: SessionStore,
        target: EnvironmentTarget,
    ) -> Result<Self, ApiError> {
        Ok(Self::new(Arc::new(ReqwestTransport::new()?), store, target))
    }

    // ===== Observation =====

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Current access token, for diagnostics.
    pub fn access_token(&self) -> Option<String> {
        self.current_pair().map(|pair| pair.access_token().to_string())
    }

    /// Receiver that always holds the latest session state.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn target(&self) -> EnvironmentTarget {
        self.boundary().target.clone()
    }

    pub fn environment(&self) -> Environment {
        self.boundary().target.environment
    }

    pub fn base_url(&self) -> String {
        self.boundary().target.base_url.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let target = self.target();
        SessionStatus {
            authenticated: self.is_authenticated(),
            environment: target.environment,
            base_url: target.base_url,
        }
    }

    // ===== Session lifecycle =====

    /// Exchange an identity-provider token for a backend session.
    ///
    /// Callers that were waiting while another exchange succeeded get that
    /// session back instead of making a second network call.
    pub async fn exchange(&self, identity_token: &str) -> Result<TokenPair, ApiError> {
        if identity_token.is_empty() {
            warn!("Refusing to exchange an empty identity token");
            return Err(ApiError::Unauthorized);
        }

        let observed = self.sign_ins.load(Ordering::SeqCst);
        let _gate = self.exchange_gate.lock().await;
        if self.sign_ins.load(Ordering::SeqCst) != observed {
            if let Some(pair) = self.current_pair() {
                debug!("Joined a concurrent sign-in");
                return Ok(pair);
            }
        }

        let (epoch, target) = {
            let boundary = self.boundary();
            (boundary.epoch, boundary.target.clone())
        };
        let pair = self.client.exchange(&target.base_url, identity_token).await?;
        self.commit_sign_in(&pair, epoch)?;
        self.sign_ins.fetch_add(1, Ordering::SeqCst);

        info!(environment = %target.environment, "Signed in to backend");
        Ok(pair)
    }

    /// Sign in with a fresh identity token unless a session already exists.
    /// Returns `true` when an exchange was performed.
    pub async fn ensure_authenticated(&self, provider: &dyn IdentityProvider) -> anyhow::Result<bool> {
        if self.is_authenticated() {
            return Ok(false);
        }
        let token = provider
            .identity_token()
            .await
            .context("Failed to obtain identity token")?;
        self.exchange(&token)
            .await
            .context("Backend token exchange failed")?;
        Ok(true)
    }

    /// End the session. Local state is always cleared; the backend is told on
    /// a best-effort basis and its failures are ignored.
    pub async fn sign_out(&self) {
        let (previous, base_url) = {
            let boundary = self.boundary();
            (self.current_pair(), boundary.target.base_url.clone())
        };
        self.end_session(SignOutReason::UserRequested, None);

        if let Some(pair) = previous {
            if let Err(e) = self.client.logout(&base_url, pair.access_token()).await {
                debug!(error = %e, "Ignoring logout notification failure");
            }
        }
    }

    /// Point the manager at another backend. The current session is dropped
    /// unconditionally; tokens are never valid across environments.
    pub fn switch_environment(&self, target: EnvironmentTarget) {
        let (previous, old_base_url, environment) = {
            let mut boundary = self.boundary();
            let old_base_url = std::mem::replace(&mut boundary.target, target).base_url;
            boundary.epoch += 1;
            self.store.clear();
            let previous = self.state.send_replace(SessionState::Unauthenticated);
            (previous.pair().cloned(), old_base_url, boundary.target.environment)
        };
        info!(%environment, "Switched backend environment, session cleared");

        if previous.is_some() {
            let _ = self.events.send(SessionEvent::SignedOut {
                reason: SignOutReason::EnvironmentChanged,
            });
        }
        let _ = self.events.send(SessionEvent::EnvironmentChanged { environment });

        // Tell the old backend without holding up the switch
        if let (Some(pair), Ok(runtime)) = (previous, tokio::runtime::Handle::try_current()) {
            let client = self.client.clone();
            runtime.spawn(async move {
                if let Err(e) = client.logout(&old_base_url, pair.access_token()).await {
                    debug!(error = %e, "Ignoring logout notification failure");
                }
            });
        }
    }

    // ===== Requests =====

    /// Send a bearer-authenticated request and decode the JSON response.
    ///
    /// A 401 triggers one token refresh followed by one retry. Other
    /// failures, including transport errors, are returned without retrying.
    pub async fn authenticated_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, ApiError> {
        let (epoch, base_url) = {
            let boundary = self.boundary();
            (boundary.epoch, boundary.target.base_url.clone())
        };
        let mut pair = self.pair_in_epoch(epoch).ok_or_else(|| {
            debug!(path, "No backend session, refusing request");
            ApiError::Unauthorized
        })?;
        let url = BackendClient::endpoint(&base_url, path)?;

        for attempt in 0..=MAX_AUTH_RETRIES {
            if attempt > 0 {
                self.refresh(&pair, epoch, &base_url).await?;
                pair = self.pair_in_epoch(epoch).ok_or(ApiError::Unauthorized)?;
            }

            let response = self
                .client
                .send_authorized(&url, method.clone(), pair.access_token(), body.clone())
                .await?;

            if response.status == StatusCode::UNAUTHORIZED {
                debug!(path, attempt, "Access token rejected");
                continue;
            }
            let response = BackendClient::check_response(response)?;
            return BackendClient::decode(&response);
        }

        warn!(path, "Request still unauthorized after token refresh");
        Err(ApiError::Unauthorized)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.authenticated_request(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let bytes = serde_json::to_vec(body)?;
        self.authenticated_request(Method::POST, path, Some(bytes)).await
    }

    /// Register a push-notification token with the backend.
    pub async fn update_push_token(&self, token: &str) -> Result<(), ApiError> {
        let _: Option<serde_json::Value> = self
            .post(PUSH_TOKEN_PATH, &PushTokenRequest { fcm_token: token })
            .await?;
        info!("Push token registered with backend");
        Ok(())
    }

    /// Unauthenticated reachability check against the active environment.
    pub async fn test_connection(&self) -> Result<bool, ApiError> {
        let base_url = self.base_url();
        self.client.health(&base_url).await
    }

    // ===== Internals =====

    /// Replace the access token that `stale` carried. Concurrent callers are
    /// serialised; a caller that finds the token already replaced returns
    /// without touching the network.
    ///
    /// `base_url` must be the backend of `epoch`; a pair is only returned by
    /// `pair_in_epoch` while that epoch, and so that backend, is current.
    async fn refresh(&self, stale: &TokenPair, epoch: u64, base_url: &str) -> Result<(), ApiError> {
        let _gate = self.refresh_gate.lock().await;

        let current = self.pair_in_epoch(epoch).ok_or(ApiError::Unauthorized)?;
        if current.access_token() != stale.access_token() {
            debug!("Access token already refreshed by a concurrent request");
            return Ok(());
        }

        match self.client.refresh(base_url, current.refresh_token()).await {
            Ok(access_token) => self.commit_refresh(&current, access_token),
            Err(ApiError::Unauthorized) => {
                warn!("Refresh token rejected, ending session");
                self.end_session(SignOutReason::RefreshRejected, Some(&current));
                Err(ApiError::Unauthorized)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, session left unchanged");
                Err(e)
            }
        }
    }

    fn commit_sign_in(&self, pair: &TokenPair, epoch: u64) -> Result<(), ApiError> {
        {
            let mut boundary = self.boundary();
            if boundary.epoch != epoch {
                warn!("Session ended while signing in, discarding issued tokens");
                return Err(ApiError::Unauthorized);
            }
            self.persist(&mut boundary, pair)?;
        }
        let _ = self.events.send(SessionEvent::SignedIn);
        Ok(())
    }

    fn commit_refresh(&self, refreshed: &TokenPair, access_token: String) -> Result<(), ApiError> {
        {
            let mut boundary = self.boundary();
            let unchanged = self.state.borrow().pair() == Some(refreshed);
            if !unchanged {
                debug!("Session changed while refreshing, dropping refreshed token");
                return Ok(());
            }
            self.persist(&mut boundary, &refreshed.with_access_token(access_token))?;
        }
        debug!("Access token refreshed");
        let _ = self.events.send(SessionEvent::Refreshed);
        Ok(())
    }

    /// Write `pair` through to the store, then publish it. A failed write may
    /// have replaced one token already, so the session is ended instead of
    /// keeping a memory copy that no longer matches the store.
    fn persist(&self, boundary: &mut Boundary, pair: &TokenPair) -> Result<(), ApiError> {
        let saved = self
            .store
            .record_origin(&boundary.target.base_url)
            .and_then(|()| self.store.save(pair));

        if let Err(e) = saved {
            warn!(error = %e, "Failed to persist session, signing out");
            boundary.epoch += 1;
            self.store.clear();
            let previous = self.state.send_replace(SessionState::Unauthenticated);
            if previous.is_authenticated() {
                let _ = self.events.send(SessionEvent::SignedOut {
                    reason: SignOutReason::PersistenceFailed,
                });
            }
            return Err(e.into());
        }

        self.state.send_replace(SessionState::Authenticated(pair.clone()));
        Ok(())
    }

    /// Clear memory and store. With `expected`, only a session still holding
    /// that pair is ended.
    fn end_session(&self, reason: SignOutReason, expected: Option<&TokenPair>) {
        {
            let mut boundary = self.boundary();
            if let Some(expected) = expected {
                if self.state.borrow().pair() != Some(expected) {
                    return;
                }
            }
            boundary.epoch += 1;
            self.store.clear();
            self.state.send_replace(SessionState::Unauthenticated);
        }
        info!(?reason, "Backend session ended");
        let _ = self.events.send(SessionEvent::SignedOut { reason });
    }

    fn current_pair(&self) -> Option<TokenPair> {
        self.state.borrow().pair().cloned()
    }

    fn pair_in_epoch(&self, epoch: u64) -> Option<TokenPair> {
        let boundary = self.boundary();
        if boundary.epoch != epoch {
            return None;
        }
        self.current_pair()
    }

    fn boundary(&self) -> MutexGuard<'_, Boundary> {
        self.boundary.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
