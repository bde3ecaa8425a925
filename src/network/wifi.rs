use std::collections::HashMap;

use zbus::zvariant::{OwnedObjectPath, OwnedValue};
use zbus::Connection;

use crate::error::HopResult;
use crate::network::dbus_proxies::*;
use crate::network::manager::{ov_to_bool, ov_to_bytes, ov_to_string};

/// NM_DEVICE_TYPE_WIFI
const DEVICE_TYPE_WIFI: u32 = 2;

const WIRELESS_SETTING: &str = "802-11-wireless";

/// The WiFi part of a saved connection profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedWifi {
    pub path: OwnedObjectPath,
    pub ssid: String,
    pub hidden: bool,
}

/// WiFi-specific helper operations
pub struct WifiManager<'a> {
    connection: &'a Connection,
}

impl<'a> WifiManager<'a> {
    pub fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    /// Find the WiFi device path, optionally restricted to one interface name
    pub async fn find_wifi_device(
        &self,
        interface: Option<&str>,
    ) -> HopResult<Option<OwnedObjectPath>> {
        let nm_proxy = NetworkManagerProxy::new(self.connection).await?;
        let devices = nm_proxy.get_devices().await?;

        for path in devices {
            let dev_proxy = DeviceProxy::builder(self.connection)
                .path(path.clone())?
                .build()
                .await?;

            if dev_proxy.device_type().await.unwrap_or(0) != DEVICE_TYPE_WIFI {
                continue;
            }
            match interface {
                Some(name) if dev_proxy.interface().await.unwrap_or_default() != name => {}
                _ => return Ok(Some(path)),
            }
        }

        Ok(None)
    }

    /// All saved connection profiles of type 802-11-wireless, in NM's order
    pub async fn saved_networks(&self) -> HopResult<Vec<SavedWifi>> {
        let settings_proxy = SettingsProxy::new(self.connection).await?;
        let connections = settings_proxy.list_connections().await?;
        let mut saved = Vec::new();

        for conn_path in connections {
            if let Some(wifi) = self.saved_network(&conn_path).await? {
                saved.push(wifi);
            }
        }

        Ok(saved)
    }

    /// Read one settings connection; `None` if it is not a WiFi profile
    pub async fn saved_network(&self, conn_path: &OwnedObjectPath) -> HopResult<Option<SavedWifi>> {
        let conn_proxy = ConnectionSettingsProxy::builder(self.connection)
            .path(conn_path.clone())?
            .build()
            .await?;

        let settings = match conn_proxy.get_settings().await {
            Ok(s) => s,
            Err(_) => return Ok(None),
        };

        Ok(wifi_from_settings(conn_path, &settings))
    }
}

fn wifi_from_settings(
    path: &OwnedObjectPath,
    settings: &HashMap<String, HashMap<String, OwnedValue>>,
) -> Option<SavedWifi> {
    let conn_type = settings
        .get("connection")
        .and_then(|c| c.get("type"))
        .and_then(ov_to_string);
    if conn_type.as_deref() != Some(WIRELESS_SETTING) {
        return None;
    }

    let wifi = settings.get(WIRELESS_SETTING)?;
    let bytes = wifi.get("ssid").and_then(ov_to_bytes)?;
    let hidden = wifi.get("hidden").and_then(ov_to_bool).unwrap_or(false);

    Some(SavedWifi {
        path: path.clone(),
        ssid: String::from_utf8_lossy(&bytes).to_string(),
        hidden,
    })
}
