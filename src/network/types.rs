use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

/// Opaque reference to a saved profile in the platform's configuration store
/// (a NetworkManager settings object path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ProfileHandle(String);

impl ProfileHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wrap an SSID in double quotes unless the caller already did.
///
/// This is the matching key between user input and saved profiles, so
/// `HomeAP` and `"HomeAP"` resolve to the same profile.
pub fn quote_ssid(ssid: &str) -> String {
    if ssid.starts_with('"') {
        ssid.to_string()
    } else {
        format!("\"{}\"", ssid)
    }
}

/// A previously provisioned WiFi network known to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkProfile {
    pub display_name: String,
    pub normalized_id: String,
    pub handle: ProfileHandle,
}

impl NetworkProfile {
    pub fn new(display_name: impl Into<String>, handle: ProfileHandle) -> Self {
        let display_name = display_name.into();
        let normalized_id = quote_ssid(&display_name);
        Self {
            display_name,
            normalized_id,
            handle,
        }
    }
}

/// Fine-grained phase of the WiFi link, as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetailedState {
    Connecting,
    Connected,
    ObtainingAddress,
    Disconnecting,
    Disconnected,
    Failed,
    Unknown,
}

impl DetailedState {
    /// Map an `NMDeviceState` value
    pub fn from_nm(val: u32) -> Self {
        match val {
            30 => Self::Disconnected,
            40 | 50 | 60 => Self::Connecting,
            70 | 80 | 90 => Self::ObtainingAddress,
            100 => Self::Connected,
            110 => Self::Disconnecting,
            120 => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for DetailedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::ObtainingAddress => write!(f, "OBTAINING_IPADDR"),
            Self::Disconnecting => write!(f, "DISCONNECTING"),
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Snapshot of the active WiFi connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub active_id: String,
    pub detailed_state: DetailedState,
    pub is_hidden: bool,
}

impl ConnectionStatus {
    /// SSID as shown in the status log line
    pub fn ssid_label(&self) -> &str {
        match self.detailed_state {
            DetailedState::Connected | DetailedState::ObtainingAddress => &self.active_id,
            DetailedState::Disconnected => "",
            _ => "?",
        }
    }

    /// Value for the single-line "current network" display
    pub fn display_name(&self) -> &str {
        if self.is_hidden {
            "<hidden>"
        } else {
            self.ssid_label()
        }
    }
}

/// An active network the process can bind its traffic to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkHandle {
    /// Kernel interface name (e.g., "wlan0")
    pub interface: String,
    /// D-Bus path of the device carrying the network
    pub device: String,
    pub address: Option<IpAddr>,
}

impl fmt::Display for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(addr) => write!(f, "{} ({})", self.interface, addr),
            None => write!(f, "{}", self.interface),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Wifi,
}

/// Constraints a requested network has to satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCapabilities {
    pub transport: Transport,
    /// Only surface networks the platform fully manages
    pub not_restricted: bool,
}

impl NetworkCapabilities {
    pub fn unrestricted_wifi() -> Self {
        Self {
            transport: Transport::Wifi,
            not_restricted: true,
        }
    }
}

/// Availability signals delivered for a network request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkSignal {
    Available(NetworkHandle),
    Lost(NetworkHandle),
}

/// A system-wide connectivity change was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityChange;
