//! Network-switch coordination.
//!
//! A switch walks `Idle → Resolving → Disabling → Enabling → AwaitingBind`
//! and ends in `Bound` or `Failed`. The availability callbacks of the
//! platform arrive as a [`NetworkRequest`] subscription that the
//! `AwaitingBind` step awaits; the caller's continuation runs at most once,
//! right after a successful bind.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::NetworkCatalog;
use crate::error::SwitchError;
use crate::network::{
    Connectivity, NetworkCapabilities, NetworkHandle, NetworkRequest, NetworkSignal,
};
use crate::reporter::StatusReporter;

/// What to do with a `switch_to` call while another switch is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReentrancyPolicy {
    /// Refuse the new switch with [`SwitchError::AlreadySwitching`]
    #[default]
    Reject,
    /// End the pending switch as [`SwitchOutcome::Superseded`] and start the new one
    Cancel,
}

#[derive(Debug, Clone)]
pub struct SwitchSettings {
    /// `None` waits for availability until the request is torn down
    pub bind_timeout: Option<Duration>,
    pub reentrancy: ReentrancyPolicy,
    pub make_preferred: bool,
}

impl Default for SwitchSettings {
    fn default() -> Self {
        Self {
            bind_timeout: None,
            reentrancy: ReentrancyPolicy::Reject,
            make_preferred: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchRequest {
    target_name: String,
}

impl SwitchRequest {
    pub fn new(target_name: impl Into<String>) -> Result<Self, SwitchError> {
        let target_name = target_name.into();
        if target_name.trim().is_empty() {
            return Err(SwitchError::InvalidRequest("target network name is empty"));
        }
        Ok(Self { target_name })
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }
}

/// Terminal result of one switch attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "network", rename_all = "snake_case")]
pub enum SwitchOutcome {
    Bound(NetworkHandle),
    ProfileNotFound,
    EnableFailed,
    LostDuringWait,
    Superseded,
}

impl SwitchOutcome {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Idle,
    Resolving,
    Disabling,
    Enabling,
    AwaitingBind,
    Bound,
    Failed,
}

enum Wait {
    Available(NetworkHandle),
    TimedOut,
    Closed,
    Cancelled,
}

struct InFlight {
    id: u64,
    cancel: Option<oneshot::Sender<()>>,
}

/// Clears the in-flight slot when its switch ends, however it ends
struct InFlightGuard<'a> {
    slot: &'a Mutex<Option<InFlight>>,
    id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut slot = lock(self.slot);
        if slot.as_ref().is_some_and(|f| f.id == self.id) {
            *slot = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SwitchCoordinator<P> {
    platform: Arc<P>,
    catalog: NetworkCatalog<P>,
    reporter: StatusReporter,
    settings: SwitchSettings,
    state: watch::Sender<SwitchState>,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
    /// Post-bind subscription, kept to report later losses
    bound_watch: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Connectivity> SwitchCoordinator<P> {
    pub fn new(platform: Arc<P>, reporter: StatusReporter, settings: SwitchSettings) -> Self {
        let (state, _) = watch::channel(SwitchState::Idle);
        Self {
            catalog: NetworkCatalog::new(platform.clone()),
            platform,
            reporter,
            settings,
            state,
            in_flight: Mutex::new(None),
            next_id: AtomicU64::new(1),
            bound_watch: Mutex::new(None),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SwitchState> {
        self.state.subscribe()
    }

    /// Switch to the saved network named in `request`.
    ///
    /// `on_bound` runs once, after process traffic has been bound to the new
    /// network, and never for any other outcome.
    pub async fn switch_to<F>(
        &self,
        request: SwitchRequest,
        on_bound: F,
    ) -> Result<SwitchOutcome, SwitchError>
    where
        F: FnOnce(&NetworkHandle) + Send,
    {
        let (id, cancelled) = self.begin()?;
        let _guard = InFlightGuard {
            slot: &self.in_flight,
            id,
        };
        info!("Switch #{} to '{}' started", id, request.target_name());

        let result = self.run(id, &request, cancelled, on_bound).await;
        match &result {
            Ok(outcome) => info!("Switch #{} finished: {:?}", id, outcome),
            Err(e) => {
                warn!("Switch #{} failed: {}", id, e);
                self.set_state(id, SwitchState::Failed);
            }
        }
        result
    }

    /// Stop reporting on the last bound network and cancel any pending switch
    pub fn shutdown(&self) {
        if let Some(task) = lock(&self.bound_watch).take() {
            task.abort();
        }
        if let Some(pending) = lock(&self.in_flight).as_mut() {
            if let Some(cancel) = pending.cancel.take() {
                let _ = cancel.send(());
            }
        }
    }

    fn begin(&self) -> Result<(u64, oneshot::Receiver<()>), SwitchError> {
        let mut slot = lock(&self.in_flight);
        if let Some(pending) = slot.as_mut() {
            match self.settings.reentrancy {
                ReentrancyPolicy::Reject => return Err(SwitchError::AlreadySwitching),
                ReentrancyPolicy::Cancel => {
                    info!("Superseding pending switch #{}", pending.id);
                    if let Some(cancel) = pending.cancel.take() {
                        let _ = cancel.send(());
                    }
                }
            }
        }

        if let Some(task) = lock(&self.bound_watch).take() {
            task.abort();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();
        *slot = Some(InFlight {
            id,
            cancel: Some(cancel),
        });
        Ok((id, cancelled))
    }

    /// Only the switch owning the in-flight slot may move the state
    fn set_state(&self, id: u64, state: SwitchState) {
        let slot = lock(&self.in_flight);
        if slot.as_ref().is_some_and(|f| f.id == id) {
            debug!("Switch #{} -> {:?}", id, state);
            self.state.send_replace(state);
        }
    }

    fn fail(&self, id: u64, outcome: SwitchOutcome) -> SwitchOutcome {
        self.set_state(id, SwitchState::Failed);
        outcome
    }

    async fn run<F>(
        &self,
        id: u64,
        request: &SwitchRequest,
        mut cancelled: oneshot::Receiver<()>,
        on_bound: F,
    ) -> Result<SwitchOutcome, SwitchError>
    where
        F: FnOnce(&NetworkHandle) + Send,
    {
        let name = request.target_name();
        let superseded = || -> Result<SwitchOutcome, SwitchError> {
            self.reporter.append(format!("Switch to {name} cancelled"));
            Ok(SwitchOutcome::Superseded)
        };

        self.set_state(id, SwitchState::Resolving);
        let Some(resolved) = unless_cancelled(&mut cancelled, self.catalog.resolve(name)).await
        else {
            return superseded();
        };
        let Some(profile) = resolved? else {
            self.reporter
                .append(format!("{name} has never been connected before"));
            return Ok(self.fail(id, SwitchOutcome::ProfileNotFound));
        };

        self.set_state(id, SwitchState::Disabling);
        if unless_cancelled(&mut cancelled, self.platform.disconnect_active())
            .await
            .is_none()
        {
            return superseded();
        }

        self.set_state(id, SwitchState::Enabling);
        let enable = self
            .platform
            .enable_network(&profile.handle, self.settings.make_preferred);
        match unless_cancelled(&mut cancelled, enable).await {
            None => return superseded(),
            Some(false) => {
                self.reporter.append(format!("Could not enable {name}"));
                return Ok(self.fail(id, SwitchOutcome::EnableFailed));
            }
            Some(true) => {}
        }
        if unless_cancelled(&mut cancelled, self.platform.reconnect())
            .await
            .is_none()
        {
            return superseded();
        }

        self.set_state(id, SwitchState::AwaitingBind);
        let opening = self
            .platform
            .request_network(NetworkCapabilities::unrestricted_wifi());
        let Some(network) = unless_cancelled(&mut cancelled, opening).await else {
            return superseded();
        };
        let mut network = network?;

        let handle = match self.await_available(&mut network, &mut cancelled).await {
            Wait::Available(handle) => handle,
            Wait::TimedOut => {
                self.reporter
                    .append(format!("Timed out waiting for {name} to become available"));
                return Ok(self.fail(id, SwitchOutcome::LostDuringWait));
            }
            Wait::Closed => {
                self.reporter
                    .append(format!("Network request for {name} ended before it became available"));
                return Ok(self.fail(id, SwitchOutcome::LostDuringWait));
            }
            Wait::Cancelled => return superseded(),
        };

        let bound = self.platform.bind_all_traffic_to(&handle);
        self.reporter
            .append(format!("Network available, bind succeeded: {bound} {handle}"));
        self.set_state(id, SwitchState::Bound);
        self.keep_watching(network);

        on_bound(&handle);
        Ok(SwitchOutcome::Bound(handle))
    }

    async fn await_available(
        &self,
        network: &mut NetworkRequest,
        cancelled: &mut oneshot::Receiver<()>,
    ) -> Wait {
        let available = async {
            loop {
                match network.next().await {
                    Some(NetworkSignal::Available(handle)) => return Wait::Available(handle),
                    Some(NetworkSignal::Lost(handle)) => {
                        debug!("Lost {} while awaiting bind", handle);
                        self.reporter.append("Connection lost");
                    }
                    None => return Wait::Closed,
                }
            }
        };
        let bounded = async {
            match self.settings.bind_timeout {
                Some(limit) => tokio::time::timeout(limit, available)
                    .await
                    .unwrap_or(Wait::TimedOut),
                None => available.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Wait::Cancelled,
            wait = bounded => wait,
        }
    }

    /// Report losses of the bound network until the next switch
    fn keep_watching(&self, mut network: NetworkRequest) {
        let reporter = self.reporter.clone();
        let task = tokio::spawn(async move {
            while let Some(signal) = network.next().await {
                match signal {
                    NetworkSignal::Lost(handle) => {
                        info!("Bound network {} lost", handle);
                        reporter.append("Connection lost");
                    }
                    NetworkSignal::Available(handle) => {
                        debug!("Ignoring repeated availability of {}", handle);
                    }
                }
            }
        });
        if let Some(previous) = lock(&self.bound_watch).replace(task) {
            previous.abort();
        }
    }
}

/// Run one platform step, or `None` once the switch has been cancelled.
/// A cancel that is already pending wins over starting the step.
async fn unless_cancelled<T>(
    cancelled: &mut oneshot::Receiver<()>,
    step: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancelled => None,
        value = step => Some(value),
    }
}

impl<P> Drop for SwitchCoordinator<P> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.bound_watch).take() {
            task.abort();
        }
    }
}
