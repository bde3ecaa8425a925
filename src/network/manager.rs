use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::Connection;

use crate::error::{HopError, HopResult};
use crate::network::binding::ProcessBinding;
use crate::network::dbus_proxies::*;
use crate::network::platform::{Connectivity, ConnectivityWatch, NetworkRequest, Subscription};
use crate::network::signals;
use crate::network::types::*;
use crate::network::wifi::{SavedWifi, WifiManager};

/// Profile recorded by `enable_network`, activated by `reconnect`
#[derive(Debug, Clone)]
struct PendingProfile {
    path: OwnedObjectPath,
    preferred: bool,
}

/// High-level facade over NetworkManager's D-Bus API.
/// Implements the connectivity contract the switch workflow drives.
pub struct NetworkManager {
    connection: Connection,
    interface: Option<String>,
    binding: ProcessBinding,
    pending: Mutex<Option<PendingProfile>>,
}

impl NetworkManager {
    /// Connect to the system D-Bus and create the NetworkManager facade
    pub async fn new(interface: Option<String>, binding: ProcessBinding) -> HopResult<Self> {
        let connection = Connection::system().await?;
        Ok(Self {
            connection,
            interface,
            binding,
            pending: Mutex::new(None),
        })
    }

    /// Shared D-Bus connection, e.g. for the permission gate
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Check if NetworkManager is running
    pub async fn is_running(&self) -> bool {
        let proxy = match NetworkManagerProxy::new(&self.connection).await {
            Ok(p) => p,
            Err(_) => return false,
        };
        proxy.version().await.is_ok()
    }

    /// Get NM version string
    pub async fn version(&self) -> HopResult<String> {
        let proxy = NetworkManagerProxy::new(&self.connection).await?;
        Ok(proxy.version().await?)
    }

    async fn find_device(&self) -> HopResult<Option<OwnedObjectPath>> {
        WifiManager::new(&self.connection)
            .find_wifi_device(self.interface.as_deref())
            .await
    }

    async fn wifi_device(&self) -> HopResult<OwnedObjectPath> {
        self.find_device().await?.ok_or_else(|| {
            HopError::DeviceNotFound(
                self.interface
                    .clone()
                    .unwrap_or_else(|| "no WiFi device".into()),
            )
        })
    }

    fn pending(&self) -> Option<PendingProfile> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Activate a saved connection on a specific device
    async fn activate(
        &self,
        conn_path: &OwnedObjectPath,
        device_path: &OwnedObjectPath,
    ) -> HopResult<OwnedObjectPath> {
        let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
        let root = ObjectPath::from_static_str_unchecked("/");
        let active = nm_proxy
            .activate_connection(&conn_path.as_ref(), &device_path.as_ref(), &root)
            .await?;
        info!("Activated connection {} on {}", conn_path, device_path);
        Ok(active)
    }

    /// SSID bytes of the access point the device is associated with
    async fn active_ap_ssid(&self, device: &OwnedObjectPath) -> Option<Vec<u8>> {
        let wireless = WirelessProxy::builder(&self.connection)
            .path(device.clone())
            .ok()?
            .build()
            .await
            .ok()?;
        let ap_path = wireless.active_access_point().await.ok()?;
        if ap_path.as_str() == "/" {
            return None;
        }
        let ap = AccessPointProxy::builder(&self.connection)
            .path(ap_path)
            .ok()?
            .build()
            .await
            .ok()?;
        ap.ssid().await.ok()
    }

    /// Saved profile behind an active connection
    async fn active_profile(&self, active: &OwnedObjectPath) -> Option<(String, Option<SavedWifi>)> {
        let proxy = ActiveConnectionProxy::builder(&self.connection)
            .path(active.clone())
            .ok()?
            .build()
            .await
            .ok()?;
        let id = proxy.id().await.unwrap_or_default();
        let saved = match proxy.connection().await {
            Ok(path) => WifiManager::new(&self.connection)
                .saved_network(&path)
                .await
                .ok()
                .flatten(),
            Err(_) => None,
        };
        Some((id, saved))
    }
}

#[async_trait]
impl Connectivity for NetworkManager {
    async fn list_known_networks(&self) -> HopResult<Vec<NetworkProfile>> {
        let saved = WifiManager::new(&self.connection).saved_networks().await?;
        Ok(saved
            .into_iter()
            .map(|wifi| NetworkProfile::new(wifi.ssid, ProfileHandle::new(wifi.path.as_str())))
            .collect())
    }

    async fn disconnect_active(&self) {
        // The old address goes away with the link
        self.binding.clear();

        let device = match self.find_device().await {
            Ok(Some(device)) => device,
            Ok(None) => {
                debug!("No WiFi device to disconnect");
                return;
            }
            Err(e) => {
                warn!("Failed to look up WiFi device: {}", e);
                return;
            }
        };

        let result = async {
            let proxy = DeviceProxy::builder(&self.connection)
                .path(device.clone())?
                .build()
                .await?;
            proxy.disconnect().await
        }
        .await;

        match result {
            Ok(()) => info!("Disconnected device: {}", device),
            // NM refuses to disconnect an inactive device; nothing to do then
            Err(e) => debug!("Disconnect of {} skipped: {}", device, e),
        }
    }

    async fn enable_network(&self, profile: &ProfileHandle, make_preferred: bool) -> bool {
        let path = match ObjectPath::try_from(profile.as_str()) {
            Ok(p) => OwnedObjectPath::from(p),
            Err(e) => {
                warn!("Invalid profile handle {}: {}", profile, e);
                return false;
            }
        };

        match WifiManager::new(&self.connection).saved_network(&path).await {
            Ok(Some(wifi)) => {
                info!(
                    "Enabled profile '{}' ({}), preferred: {}",
                    wifi.ssid, path, make_preferred
                );
                *self.pending.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(PendingProfile {
                        path,
                        preferred: make_preferred,
                    });
                true
            }
            Ok(None) => {
                warn!("Profile {} is not a WiFi connection", path);
                false
            }
            Err(e) => {
                warn!("Failed to read profile {}: {}", path, e);
                false
            }
        }
    }

    async fn reconnect(&self) {
        let Some(pending) = self.pending() else {
            debug!("Reconnect requested with no enabled profile");
            return;
        };
        let device = match self.wifi_device().await {
            Ok(device) => device,
            Err(e) => {
                warn!("Cannot reconnect: {}", e);
                return;
            }
        };
        if let Err(e) = self.activate(&pending.path, &device).await {
            warn!("Failed to activate {}: {}", pending.path, e);
        }
    }

    async fn request_network(&self, caps: NetworkCapabilities) -> HopResult<NetworkRequest> {
        let device = match caps.transport {
            Transport::Wifi => self.wifi_device().await?,
        };
        let expected = self.pending().filter(|p| p.preferred).map(|p| p.path);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(signals::watch_availability(
            self.connection.clone(),
            device,
            expected,
            caps,
            tx,
        ));
        Ok(Subscription::new(rx, Some(task.abort_handle())))
    }

    fn bind_all_traffic_to(&self, handle: &NetworkHandle) -> bool {
        self.binding.bind(handle)
    }

    async fn current_connection_status(&self) -> HopResult<Option<ConnectionStatus>> {
        let Some(device) = self.find_device().await? else {
            return Ok(None);
        };
        let dev_proxy = DeviceProxy::builder(&self.connection)
            .path(device.clone())?
            .build()
            .await?;

        let active = match dev_proxy.active_connection().await {
            Ok(p) if p.as_str() != "/" => p,
            _ => return Ok(None),
        };

        let detailed_state = DetailedState::from_nm(dev_proxy.state().await.unwrap_or(0));
        let ap_ssid = self.active_ap_ssid(&device).await;
        let (active_name, saved) = self.active_profile(&active).await.unwrap_or_default();

        let broadcast_hidden = ap_ssid.as_ref().is_some_and(|bytes| bytes.is_empty());
        let is_hidden = broadcast_hidden || saved.as_ref().is_some_and(|s| s.hidden);

        let active_id = match (saved, ap_ssid) {
            (Some(saved), _) => saved.ssid,
            (None, Some(bytes)) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).to_string(),
            _ => active_name,
        };

        Ok(Some(ConnectionStatus {
            active_id,
            detailed_state,
            is_hidden,
        }))
    }

    async fn watch_connectivity(&self) -> HopResult<ConnectivityWatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(signals::watch_connectivity(self.connection.clone(), tx));
        Ok(Subscription::new(rx, Some(task.abort_handle())))
    }
}

/// Build a bindable handle for a device
pub(crate) async fn device_handle(
    connection: &Connection,
    device: &OwnedObjectPath,
) -> HopResult<NetworkHandle> {
    let dev_proxy = DeviceProxy::builder(connection)
        .path(device.clone())?
        .build()
        .await?;

    let interface = dev_proxy.interface().await.unwrap_or_default();
    let address = device_ip4_address(connection, &dev_proxy).await;

    Ok(NetworkHandle {
        interface,
        device: device.as_str().to_string(),
        address,
    })
}

async fn device_ip4_address(connection: &Connection, dev_proxy: &DeviceProxy<'_>) -> Option<IpAddr> {
    let ip4_path = match dev_proxy.ip4_config().await {
        Ok(p) if p.as_str() != "/" => p,
        _ => return None,
    };

    let ip4_proxy = IP4ConfigProxy::builder(connection)
        .path(ip4_path)
        .ok()?
        .build()
        .await
        .ok()?;

    ip4_proxy.address_data().await.ok().and_then(|addrs| {
        addrs
            .first()
            .and_then(|a| a.get("address").and_then(ov_to_string))
            .and_then(|s| s.parse().ok())
    })
}

// ── Safe OwnedValue extraction via pattern matching ───────────────────
// OwnedValue derefs to Value<'static>, so &**v gives &Value to match on.

pub fn ov_to_string(v: &OwnedValue) -> Option<String> {
    match &**v {
        Value::Str(s) => Some(s.to_string()),
        _ => None,
    }
}

pub fn ov_to_bool(v: &OwnedValue) -> Option<bool> {
    match &**v {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

pub fn ov_to_bytes(v: &OwnedValue) -> Option<Vec<u8>> {
    match &**v {
        Value::Array(arr) => {
            let mut bytes = Vec::new();
            for item in arr.iter() {
                match item {
                    Value::U8(b) => bytes.push(*b),
                    _ => return None,
                }
            }
            Some(bytes)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ssid_bytes() {
        let value: OwnedValue = Value::from(b"HomeAP".to_vec()).try_into().unwrap();
        assert_eq!(ov_to_bytes(&value), Some(b"HomeAP".to_vec()));
        assert_eq!(ov_to_string(&value), None);
    }

    #[test]
    fn extracts_scalars() {
        let s: OwnedValue = Value::from("802-11-wireless").try_into().unwrap();
        let b: OwnedValue = Value::from(true).try_into().unwrap();
        assert_eq!(ov_to_string(&s).as_deref(), Some("802-11-wireless"));
        assert_eq!(ov_to_bool(&b), Some(true));
        assert_eq!(ov_to_bool(&s), None);
    }
}
