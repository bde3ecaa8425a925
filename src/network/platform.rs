use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::HopResult;
use crate::network::types::*;

/// Receiving end of a platform-driven event feed.
///
/// Owns the background task producing the events, if any; dropping the
/// subscription (or calling [`Subscription::close`]) tears that task down.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    task: Option<AbortHandle>,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, task: Option<AbortHandle>) -> Self {
        Self { rx, task }
    }

    /// Next event, or `None` once the producer is gone
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Availability feed for one capability request
pub type NetworkRequest = Subscription<NetworkSignal>;

/// System-wide connectivity change feed
pub type ConnectivityWatch = Subscription<ConnectivityChange>;

/// Connectivity subsystem the switch workflow drives.
#[async_trait]
pub trait Connectivity: Send + Sync + 'static {
    /// Saved WiFi profiles, read fresh on every call
    async fn list_known_networks(&self) -> HopResult<Vec<NetworkProfile>>;

    /// Drop the current WiFi connection. Best effort; never fails.
    async fn disconnect_active(&self);

    /// Enable a saved profile, optionally making it the preferred one
    async fn enable_network(&self, profile: &ProfileHandle, make_preferred: bool) -> bool;

    async fn reconnect(&self);

    /// Ask the platform to surface networks matching `caps`
    async fn request_network(&self, caps: NetworkCapabilities) -> HopResult<NetworkRequest>;

    /// Route all subsequent process traffic over `handle`
    fn bind_all_traffic_to(&self, handle: &NetworkHandle) -> bool;

    /// `None` when there is no active WiFi connection
    async fn current_connection_status(&self) -> HopResult<Option<ConnectionStatus>>;

    async fn watch_connectivity(&self) -> HopResult<ConnectivityWatch>;
}
