//! Session-continuity wrapper around a [`Transport`].
//!
//! Per call: send → (2xx/4xx/5xx other than 401: return as-is)
//!                → 401: refresh (single-flight) → replay once → return.
//!
//! Refresh coordination:
//! - `epoch` counts successful refreshes and sign-ins. A request remembers the
//!   epoch it was sent under; a 401 from an older epoch is replayed without
//!   refreshing again.
//! - The first 401 of an epoch spawns the refresh as its own task, so a caller
//!   that gives up (deadline, dropped future) never takes the refresh down with
//!   it. Every 401 of that epoch, the first included, waits on a watch channel
//!   for the outcome.
//! - A failed refresh poisons its epoch: later 401s from it fail immediately,
//!   and the sign-in redirect fires once, from the refresh task only.
//! - `reset` starts a new epoch. A refresh still running for an older epoch is
//!   not shared with the new one, and its failure neither poisons the new
//!   epoch nor redirects.
//! - Waiters fail with `Cancelled` only if the refresh task itself dies
//!   (panic, runtime shutdown) before publishing an outcome.
//!
//! Requests must be made from within a Tokio runtime.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::redirect::SignInRedirect;
use crate::transport::{ApiRequest, ApiResponse, Transport};

#[derive(Debug, Clone)]
enum RefreshOutcome {
    Refreshed,
    Failed(String),
}

type OutcomeRx = watch::Receiver<Option<RefreshOutcome>>;

struct InFlight {
    epoch: u64,
    rx: OutcomeRx,
}

#[derive(Default)]
struct RefreshState {
    epoch: u64,
    failed_epoch: Option<u64>,
    in_flight: Option<InFlight>,
}

impl RefreshState {
    fn release(&mut self, epoch: u64) {
        if self.in_flight.as_ref().is_some_and(|f| f.epoch == epoch) {
            self.in_flight = None;
        }
    }
}

enum Claim {
    /// Credentials changed after this request was sent.
    Replay,
    /// This epoch's refresh already failed.
    Failed(String),
    Wait(OutcomeRx),
    Refresh(RefreshGuard, OutcomeRx),
}

/// Owned by the refresh task. Dropping it without publishing releases the
/// claim and closes the channel.
struct RefreshGuard {
    state: Arc<Mutex<RefreshState>>,
    epoch: u64,
    tx: Option<watch::Sender<Option<RefreshOutcome>>>,
}

impl RefreshGuard {
    /// Apply the outcome to the shared state. Returns `false` when a `reset`
    /// moved the session to a new epoch while the refresh was running.
    fn settle(&self, outcome: &RefreshOutcome) -> bool {
        let mut state = self.state.lock();
        let current = state.epoch == self.epoch;
        match outcome {
            RefreshOutcome::Refreshed => state.epoch = state.epoch.max(self.epoch + 1),
            RefreshOutcome::Failed(_) if current => state.failed_epoch = Some(self.epoch),
            RefreshOutcome::Failed(_) => {}
        }
        state.release(self.epoch);
        current
    }

    fn publish(mut self, outcome: RefreshOutcome) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!("[session] refresh abandoned before completion");
            self.state.lock().release(self.epoch);
        }
    }
}

pub struct SessionClient<T: Transport> {
    transport: Arc<T>,
    refresh_request: ApiRequest,
    redirect: Arc<dyn SignInRedirect>,
    state: Arc<Mutex<RefreshState>>,
}

impl<T: Transport + 'static> SessionClient<T> {
    pub fn new(transport: T, redirect: Arc<dyn SignInRedirect>) -> Self {
        Self::with_refresh_request(
            transport,
            redirect,
            ApiRequest::get(ClientConfig::default().refresh_path),
        )
    }

    pub fn from_config(transport: T, config: &ClientConfig, redirect: Arc<dyn SignInRedirect>) -> Self {
        Self::with_refresh_request(transport, redirect, ApiRequest::get(config.refresh_path.clone()))
    }

    pub fn with_refresh_request(
        transport: T,
        redirect: Arc<dyn SignInRedirect>,
        refresh_request: ApiRequest,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            refresh_request,
            redirect,
            state: Arc::new(Mutex::new(RefreshState::default())),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mark a fresh sign-in: starts a new epoch and clears any failed refresh.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.failed_epoch = None;
        debug!("[session] session reset to epoch {}", state.epoch);
    }

    pub async fn request(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let epoch = self.state.lock().epoch;
        let response = self.transport.send(request).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        debug!("[session] {} {} unauthorized", request.method, request.path);
        match self.claim(epoch) {
            Claim::Replay => {}
            Claim::Failed(reason) => return Err(ClientError::AuthRefresh(reason)),
            Claim::Wait(rx) => wait_for_refresh(rx).await?,
            Claim::Refresh(guard, rx) => {
                tokio::spawn(run_refresh(
                    Arc::clone(&self.transport),
                    self.refresh_request.clone(),
                    Arc::clone(&self.redirect),
                    guard,
                ));
                wait_for_refresh(rx).await?
            }
        }

        // Replayed once. A second 401 is returned to the caller as-is.
        self.transport.send(request).await
    }

    fn claim(&self, epoch: u64) -> Claim {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return Claim::Replay;
        }
        if state.failed_epoch == Some(epoch) {
            return Claim::Failed("session already signed out".into());
        }
        if let Some(in_flight) = state.in_flight.as_ref().filter(|f| f.epoch == epoch) {
            return Claim::Wait(in_flight.rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        state.in_flight = Some(InFlight {
            epoch,
            rx: rx.clone(),
        });
        Claim::Refresh(
            RefreshGuard {
                state: Arc::clone(&self.state),
                epoch,
                tx: Some(tx),
            },
            rx,
        )
    }
}

async fn run_refresh<T: Transport>(
    transport: Arc<T>,
    refresh_request: ApiRequest,
    redirect: Arc<dyn SignInRedirect>,
    guard: RefreshGuard,
) {
    info!("[session] access credential rejected; refreshing session");
    let outcome = match transport.send(&refresh_request).await {
        Ok(resp) if resp.is_success() => RefreshOutcome::Refreshed,
        Ok(resp) => RefreshOutcome::Failed(format!("refresh rejected ({})", resp.status)),
        Err(e) => RefreshOutcome::Failed(e.to_string()),
    };

    let current = guard.settle(&outcome);
    match &outcome {
        RefreshOutcome::Refreshed => info!("[session] session refreshed"),
        RefreshOutcome::Failed(reason) if current => {
            warn!("[session] session refresh failed: {}", reason);
            redirect.redirect_to_sign_in();
        }
        RefreshOutcome::Failed(reason) => {
            warn!("[session] refresh from before the last sign-in failed: {}", reason)
        }
    }
    guard.publish(outcome);
}

async fn wait_for_refresh(mut rx: OutcomeRx) -> Result<(), ClientError> {
    let outcome = rx
        .wait_for(Option::is_some)
        .await
        .map_err(|_| ClientError::Cancelled)?
        .clone();
    match outcome {
        Some(RefreshOutcome::Refreshed) => Ok(()),
        Some(RefreshOutcome::Failed(reason)) => Err(ClientError::AuthRefresh(reason)),
        None => Err(ClientError::Cancelled),
    }
}

/// A `SessionClient` is itself a transport, so it drops in wherever the
/// underlying one was used.
#[async_trait]
impl<T: Transport + 'static> Transport for SessionClient<T> {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        self.request(request).await
    }
}
