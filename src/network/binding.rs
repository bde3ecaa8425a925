use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::network::types::NetworkHandle;

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Process-wide choice of the network outgoing traffic should use.
///
/// Cloning yields another view of the same binding.
#[derive(Debug, Clone, Default)]
pub struct ProcessBinding {
    current: Arc<RwLock<Option<NetworkHandle>>>,
}

impl ProcessBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to `handle`. Succeeds only if the interface exists and carries an address.
    pub fn bind(&self, handle: &NetworkHandle) -> bool {
        if !interface_exists(&handle.interface) {
            debug!("Interface {} not present, refusing bind", handle.interface);
            return false;
        }
        if handle.address.is_none() {
            debug!("Interface {} has no address yet", handle.interface);
            return false;
        }
        self.set(handle.clone());
        true
    }

    pub fn set(&self, handle: NetworkHandle) {
        info!("Process traffic bound to {}", handle);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn current(&self) -> Option<NetworkHandle> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Source address outgoing sockets should bind to
    pub fn local_address(&self) -> Option<IpAddr> {
        self.current().and_then(|h| h.address)
    }

    /// Device outgoing sockets should be pinned to, so they leave through
    /// the bound network whatever the routing table prefers
    pub fn interface(&self) -> Option<String> {
        self.current().map(|h| h.interface)
    }
}

fn interface_exists(iface: &str) -> bool {
    !iface.is_empty() && Path::new(SYS_CLASS_NET).join(iface).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn handle(iface: &str, address: Option<IpAddr>) -> NetworkHandle {
        NetworkHandle {
            interface: iface.into(),
            device: "/org/freedesktop/NetworkManager/Devices/3".into(),
            address,
        }
    }

    #[test]
    fn bind_rejects_missing_interface() {
        let binding = ProcessBinding::new();
        let addr = Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        assert!(!binding.bind(&handle("nexus-does-not-exist0", addr)));
        assert!(binding.current().is_none());
    }

    #[test]
    fn clones_share_the_binding() {
        let binding = ProcessBinding::new();
        let view = binding.clone();
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        binding.set(handle("wlan0", Some(addr)));
        assert_eq!(view.local_address(), Some(addr));
        assert_eq!(view.interface().as_deref(), Some("wlan0"));
        view.clear();
        assert_eq!(binding.interface(), None);
        assert!(binding.current().is_none());
    }
}
