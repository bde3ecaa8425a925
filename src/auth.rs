use async_trait::async_trait;
use tracing::{debug, info, warn};
use zbus::Connection;

use crate::network::dbus_proxies::NetworkManagerProxy;

/// Capabilities the app asks for before touching the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Read the SSID and state of the active connection
    ReadNetworkStatus,
    /// Activate and deactivate connections
    ControlNetwork,
}

impl Permission {
    /// PolicyKit action NetworkManager reports for this permission
    pub fn nm_action(&self) -> &'static str {
        match self {
            // Property reads are not polkit-gated; wifi.scan is the only
            // read-side WiFi action NetworkManager reports per caller
            Self::ReadNetworkStatus => "org.freedesktop.NetworkManager.wifi.scan",
            Self::ControlNetwork => "org.freedesktop.NetworkManager.network-control",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Proceed,
    Denied,
}

impl PermissionDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Proceed)
    }

    /// Map a NetworkManager `GetPermissions` value
    pub fn from_nm(value: Option<&str>) -> Self {
        match value {
            Some("no") => Self::Denied,
            // "yes", "auth" (polkit will prompt), or an action this NM does not report
            _ => Self::Proceed,
        }
    }
}

#[async_trait]
pub trait PermissionGate: Send + Sync + 'static {
    async fn ensure_granted(&self, permission: Permission) -> PermissionDecision;
}

/// Permission gate backed by the effective uid and NetworkManager's PolicyKit results
pub struct NmPermissionGate {
    connection: Connection,
}

impl NmPermissionGate {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl PermissionGate for NmPermissionGate {
    async fn ensure_granted(&self, permission: Permission) -> PermissionDecision {
        if unsafe { libc::geteuid() } == 0 {
            debug!("Running as root, {:?} granted", permission);
            return PermissionDecision::Proceed;
        }

        let permissions = async {
            let proxy = NetworkManagerProxy::new(&self.connection).await?;
            proxy.get_permissions().await
        }
        .await;

        match permissions {
            Ok(map) => {
                let decision = PermissionDecision::from_nm(
                    map.get(permission.nm_action()).map(String::as_str),
                );
                if !decision.is_granted() {
                    info!("{:?} denied by PolicyKit", permission);
                }
                decision
            }
            Err(e) => {
                let err_str = e.to_string();
                if err_str.contains("org.freedesktop.DBus.Error.AccessDenied") {
                    warn!("Permission denied: {:?} unavailable", permission);
                } else {
                    warn!("Error checking permissions: {}", e);
                }
                PermissionDecision::Denied
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_map_to_nm_actions() {
        assert_eq!(
            Permission::ReadNetworkStatus.nm_action(),
            "org.freedesktop.NetworkManager.wifi.scan"
        );
        assert_eq!(
            Permission::ControlNetwork.nm_action(),
            "org.freedesktop.NetworkManager.network-control"
        );
    }

    #[test]
    fn nm_permission_values() {
        assert_eq!(PermissionDecision::from_nm(Some("yes")), PermissionDecision::Proceed);
        assert_eq!(PermissionDecision::from_nm(Some("auth")), PermissionDecision::Proceed);
        assert_eq!(PermissionDecision::from_nm(Some("no")), PermissionDecision::Denied);
        assert_eq!(PermissionDecision::from_nm(None), PermissionDecision::Proceed);
    }
}
