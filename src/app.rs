use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{Permission, PermissionGate};
use crate::catalog::NetworkCatalog;
use crate::error::{HopResult, SwitchError};
use crate::network::{ConnectionStatus, Connectivity, NetworkProfile};
use crate::reporter::StatusReporter;
use crate::switch::{SwitchCoordinator, SwitchOutcome, SwitchRequest, SwitchSettings, SwitchState};
use crate::verify::{VerificationResult, VerificationRunner};

/// Result of one switch-and-verify attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub outcome: SwitchOutcome,
    /// Present only when the switch ended bound
    pub verification: Option<VerificationResult>,
    /// Status log at the end of the attempt, one line per entry
    pub log: String,
    pub finished_at: DateTime<Local>,
}

// ── Status refresh ────────────────────────────────────────────────────

/// Permission-gated status read that feeds the reporter
pub struct StatusRefresher<P, G> {
    catalog: Arc<NetworkCatalog<P>>,
    gate: Arc<G>,
    reporter: StatusReporter,
}

impl<P, G> Clone for StatusRefresher<P, G> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            gate: self.gate.clone(),
            reporter: self.reporter.clone(),
        }
    }
}

impl<P: Connectivity, G: PermissionGate> StatusRefresher<P, G> {
    /// Read and report the active connection. Silently does nothing when
    /// permission is denied or no connection is active.
    pub async fn refresh(&self) -> Option<ConnectionStatus> {
        if !self
            .gate
            .ensure_granted(Permission::ReadNetworkStatus)
            .await
            .is_granted()
        {
            debug!("Status read not permitted, skipping refresh");
            return None;
        }

        match self.catalog.current_status().await {
            Ok(Some(status)) => {
                self.reporter.append(format!(
                    "WIFI: {} {}",
                    status.ssid_label(),
                    status.detailed_state
                ));
                self.reporter.set_current_network(status.display_name());
                Some(status)
            }
            Ok(None) => {
                debug!("No active WiFi connection");
                None
            }
            Err(e) => {
                warn!("Failed to read connection status: {}", e);
                None
            }
        }
    }
}

/// Refreshes status on every connectivity change until dropped
pub struct StatusWatcher {
    task: JoinHandle<()>,
}

impl StatusWatcher {
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for StatusWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Application ───────────────────────────────────────────────────────

pub struct App<P, G> {
    platform: Arc<P>,
    reporter: StatusReporter,
    catalog: Arc<NetworkCatalog<P>>,
    status: StatusRefresher<P, G>,
    coordinator: SwitchCoordinator<P>,
    verifier: VerificationRunner,
}

impl<P: Connectivity, G: PermissionGate> App<P, G> {
    pub fn new(
        platform: Arc<P>,
        gate: Arc<G>,
        reporter: StatusReporter,
        settings: SwitchSettings,
        verifier: VerificationRunner,
    ) -> Self {
        let catalog = Arc::new(NetworkCatalog::new(platform.clone()));
        Self {
            status: StatusRefresher {
                catalog: catalog.clone(),
                gate,
                reporter: reporter.clone(),
            },
            coordinator: SwitchCoordinator::new(platform.clone(), reporter.clone(), settings),
            platform,
            reporter,
            catalog,
            verifier,
        }
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    pub fn subscribe_switch_state(&self) -> watch::Receiver<SwitchState> {
        self.coordinator.subscribe_state()
    }

    pub async fn known_networks(&self) -> HopResult<Vec<NetworkProfile>> {
        self.catalog.known_networks().await
    }

    pub async fn refresh_status(&self) -> Option<ConnectionStatus> {
        self.status.refresh().await
    }

    /// Refresh status whenever the platform reports a connectivity change
    pub async fn watch_connectivity(&self) -> HopResult<StatusWatcher> {
        let mut changes = self.platform.watch_connectivity().await?;
        let status = self.status.clone();
        let task = tokio::spawn(async move {
            while changes.next().await.is_some() {
                status.refresh().await;
            }
            debug!("Connectivity feed ended");
        });
        Ok(StatusWatcher { task })
    }

    /// Switch to `ssid`, then GET `url` over it.
    ///
    /// The log is cleared first; empty inputs and a denied
    /// `ControlNetwork` permission are reported and rejected before the
    /// platform is touched.
    pub async fn switch_and_verify(&self, ssid: &str, url: &str) -> Result<Attempt, SwitchError> {
        info!("Start switching to SSID {}", ssid);
        self.reporter.clear();

        if ssid.trim().is_empty() {
            self.reporter.append("Please enter an SSID");
            return Err(SwitchError::InvalidRequest("SSID is empty"));
        }
        if url.trim().is_empty() {
            self.reporter.append("Please enter a URL");
            return Err(SwitchError::InvalidRequest("verification URL is empty"));
        }
        let request = SwitchRequest::new(ssid)?;

        if !self
            .status
            .gate
            .ensure_granted(Permission::ControlNetwork)
            .await
            .is_granted()
        {
            self.reporter.append("Not allowed to control networks");
            return Err(SwitchError::PermissionDenied(Permission::ControlNetwork));
        }

        self.refresh_status().await;

        let (started_tx, started_rx) = oneshot::channel();
        let verifier = self.verifier.clone();
        let reporter = self.reporter.clone();
        let url = url.to_string();

        let result = self
            .coordinator
            .switch_to(request, move |_| {
                reporter.append("Wifi connected");
                let task =
                    tokio::task::spawn_blocking(move || verifier.run_and_report(&url, &reporter));
                let _ = started_tx.send(task);
            })
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.reporter.append(format!("Switch failed: {e}"));
                return Err(e);
            }
        };

        let verification = match started_rx.await {
            Ok(task) => match task.await {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!("Verification task failed: {}", e);
                    None
                }
            },
            Err(_) => None,
        };

        Ok(Attempt {
            outcome,
            verification,
            log: self.reporter.snapshot().await.text(),
            finished_at: Local::now(),
        })
    }

    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }
}
