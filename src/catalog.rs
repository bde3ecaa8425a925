use std::sync::Arc;

use tracing::debug;

use crate::error::HopResult;
use crate::network::{quote_ssid, ConnectionStatus, Connectivity, NetworkProfile};

/// Read-only view over the platform's saved WiFi profiles.
/// Nothing is cached; every call asks the platform again.
pub struct NetworkCatalog<P> {
    platform: Arc<P>,
}

impl<P: Connectivity> NetworkCatalog<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self { platform }
    }

    /// Find the saved profile whose quoted SSID matches `name`.
    /// `name` may be given with or without surrounding quotes.
    pub async fn resolve(&self, name: &str) -> HopResult<Option<NetworkProfile>> {
        let wanted = quote_ssid(name);
        let found = self
            .platform
            .list_known_networks()
            .await?
            .into_iter()
            .find(|profile| profile.normalized_id == wanted);
        debug!("Resolved {} -> {:?}", wanted, found.as_ref().map(|p| &p.handle));
        Ok(found)
    }

    pub async fn known_networks(&self) -> HopResult<Vec<NetworkProfile>> {
        self.platform.list_known_networks().await
    }

    /// `None` when there is no active connection, which is not the same as
    /// a connection in `DetailedState::Unknown`.
    pub async fn current_status(&self) -> HopResult<Option<ConnectionStatus>> {
        self.platform.current_connection_status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fake::FakePlatform;
    use crate::network::DetailedState;

    fn catalog(names: &[&str]) -> (Arc<FakePlatform>, NetworkCatalog<FakePlatform>) {
        let platform = Arc::new(FakePlatform::with_known(names));
        (platform.clone(), NetworkCatalog::new(platform))
    }

    #[tokio::test]
    async fn resolve_accepts_quoted_and_unquoted_names() {
        let (_, catalog) = catalog(&["Office", "HomeAP"]);

        let plain = catalog.resolve("HomeAP").await.unwrap().unwrap();
        let quoted = catalog.resolve("\"HomeAP\"").await.unwrap().unwrap();

        assert_eq!(plain, quoted);
        assert_eq!(plain.normalized_id, "\"HomeAP\"");
        assert_eq!(plain.display_name, "HomeAP");
    }

    #[tokio::test]
    async fn resolve_returns_first_match() {
        let (platform, catalog) = catalog(&["HomeAP", "HomeAP"]);
        let found = catalog.resolve("HomeAP").await.unwrap().unwrap();
        assert_eq!(found, platform.known()[0]);
    }

    #[tokio::test]
    async fn resolve_is_exact() {
        let (_, catalog) = catalog(&["HomeAP"]);
        assert!(catalog.resolve("GhostNet").await.unwrap().is_none());
        assert!(catalog.resolve("homeap").await.unwrap().is_none());
        assert!(catalog.resolve("Home").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_reads_fresh_every_time() {
        let (platform, catalog) = catalog(&[]);
        assert!(catalog.resolve("HomeAP").await.unwrap().is_none());
        platform.add_known("HomeAP");
        assert!(catalog.resolve("HomeAP").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn no_active_connection_differs_from_unknown_state() {
        let (platform, catalog) = catalog(&["HomeAP"]);
        assert_eq!(catalog.current_status().await.unwrap(), None);

        platform.set_status(Some(ConnectionStatus {
            active_id: "HomeAP".into(),
            detailed_state: DetailedState::Unknown,
            is_hidden: false,
        }));
        let status = catalog.current_status().await.unwrap().unwrap();
        assert_eq!(status.detailed_state, DetailedState::Unknown);
    }
}
