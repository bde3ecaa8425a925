// D-Bus proxy trait definitions for the NetworkManager interfaces the switch
// workflow touches. zbus's #[proxy] macro generates typed async clients,
// including `receive_<property>_changed` streams for every property.

use std::collections::HashMap;
use zbus::proxy;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue};

// ── NetworkManager Main Interface ─────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
pub trait NetworkManager {
    /// Get all network devices
    fn get_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;

    /// Activate a saved connection on a device
    fn activate_connection(
        &self,
        connection: &ObjectPath<'_>,
        device: &ObjectPath<'_>,
        specific_object: &ObjectPath<'_>,
    ) -> zbus::Result<OwnedObjectPath>;

    /// PolicyKit results for the caller ("yes", "no" or "auth" per permission)
    fn get_permissions(&self) -> zbus::Result<HashMap<String, String>>;

    /// NetworkManager version
    #[zbus(property)]
    fn version(&self) -> zbus::Result<String>;

    /// Overall NM state
    #[zbus(property)]
    fn state(&self) -> zbus::Result<u32>;

    /// The primary connection
    #[zbus(property)]
    fn primary_connection(&self) -> zbus::Result<OwnedObjectPath>;
}

// ── Device Interface ──────────────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.Device",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait Device {
    /// Disconnect this device
    fn disconnect(&self) -> zbus::Result<()>;

    /// Device interface name (e.g., "wlan0")
    #[zbus(property)]
    fn interface(&self) -> zbus::Result<String>;

    /// Device type
    #[zbus(property)]
    fn device_type(&self) -> zbus::Result<u32>;

    /// Current device state
    #[zbus(property)]
    fn state(&self) -> zbus::Result<u32>;

    /// IP4Config object path
    #[zbus(property)]
    fn ip4_config(&self) -> zbus::Result<OwnedObjectPath>;

    /// Active connection path
    #[zbus(property)]
    fn active_connection(&self) -> zbus::Result<OwnedObjectPath>;

    /// Whether the device is managed by NM
    #[zbus(property)]
    fn managed(&self) -> zbus::Result<bool>;
}

// ── Wireless Device Interface ─────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.Device.Wireless",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait Wireless {
    /// Active access point
    #[zbus(property)]
    fn active_access_point(&self) -> zbus::Result<OwnedObjectPath>;
}

// ── Access Point Interface ────────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.AccessPoint",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait AccessPoint {
    /// SSID as bytes
    #[zbus(property)]
    fn ssid(&self) -> zbus::Result<Vec<u8>>;
}

// ── IP4Config Interface ───────────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.IP4Config",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait IP4Config {
    /// Address data: array of dicts with "address" (string) and "prefix" (u32)
    #[zbus(property)]
    fn address_data(&self) -> zbus::Result<Vec<HashMap<String, OwnedValue>>>;
}

// ── Active Connection Interface ───────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.Connection.Active",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait ActiveConnection {
    /// Human-readable connection ID
    #[zbus(property)]
    fn id(&self) -> zbus::Result<String>;

    /// The settings connection path
    #[zbus(property)]
    fn connection(&self) -> zbus::Result<OwnedObjectPath>;
}

// ── Settings Interface ────────────────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.Settings",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager/Settings"
)]
pub trait Settings {
    /// List all saved connection profiles
    fn list_connections(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

// ── Connection Settings Interface ─────────────────────────────────────

#[proxy(
    interface = "org.freedesktop.NetworkManager.Settings.Connection",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait ConnectionSettings {
    /// Get all settings for this connection
    fn get_settings(&self) -> zbus::Result<HashMap<String, HashMap<String, OwnedValue>>>;
}
