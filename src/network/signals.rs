use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

use crate::error::HopResult;
use crate::network::dbus_proxies::{ActiveConnectionProxy, DeviceProxy, NetworkManagerProxy};
use crate::network::manager::device_handle;
use crate::network::types::{ConnectivityChange, NetworkCapabilities, NetworkHandle, NetworkSignal};

/// NM_DEVICE_STATE_ACTIVATED
const DEVICE_STATE_ACTIVATED: u32 = 100;

/// What a device state change means for a pending network request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Acquire,
    Release,
    None,
}

pub(crate) fn transition(holding: bool, device_state: u32) -> Transition {
    match (holding, device_state == DEVICE_STATE_ACTIVATED) {
        (false, true) => Transition::Acquire,
        (true, false) => Transition::Release,
        _ => Transition::None,
    }
}

/// Watch the WiFi device's `State` property and forward availability signals.
/// Runs as a background tokio task until the receiver is dropped or aborted.
pub async fn watch_availability(
    conn: Connection,
    device: OwnedObjectPath,
    expected: Option<OwnedObjectPath>,
    caps: NetworkCapabilities,
    tx: mpsc::UnboundedSender<NetworkSignal>,
) {
    debug!("Starting availability watcher on {}", device);
    if let Err(e) = run_availability(&conn, &device, expected.as_ref(), caps, &tx).await {
        warn!("Availability watcher on {} stopped: {}", device, e);
    }
}

async fn run_availability(
    conn: &Connection,
    device: &OwnedObjectPath,
    expected: Option<&OwnedObjectPath>,
    caps: NetworkCapabilities,
    tx: &mpsc::UnboundedSender<NetworkSignal>,
) -> HopResult<()> {
    let proxy = DeviceProxy::builder(conn)
        .path(device.clone())?
        .build()
        .await?;

    if caps.not_restricted && !proxy.managed().await.unwrap_or(false) {
        warn!("Device {} is not managed by NetworkManager", device);
        return Ok(());
    }

    let mut changes = proxy.receive_state_changed().await;
    let mut current: Option<NetworkHandle> = None;

    let initial = proxy.state().await.unwrap_or(0);
    if !on_device_state(conn, &proxy, device, expected, initial, &mut current, tx).await? {
        return Ok(());
    }

    while let Some(change) = changes.next().await {
        let state = change.get().await?;
        if !on_device_state(conn, &proxy, device, expected, state, &mut current, tx).await? {
            break;
        }
    }

    Ok(())
}

/// Returns `false` once nobody is listening anymore
async fn on_device_state(
    conn: &Connection,
    proxy: &DeviceProxy<'_>,
    device: &OwnedObjectPath,
    expected: Option<&OwnedObjectPath>,
    state: u32,
    current: &mut Option<NetworkHandle>,
    tx: &mpsc::UnboundedSender<NetworkSignal>,
) -> HopResult<bool> {
    let signal = match transition(current.is_some(), state) {
        Transition::Acquire => {
            if !carries_expected_profile(conn, proxy, expected).await {
                debug!("Device {} activated on another profile, still waiting", device);
                return Ok(true);
            }
            let handle = device_handle(conn, device).await?;
            *current = Some(handle.clone());
            NetworkSignal::Available(handle)
        }
        Transition::Release => match current.take() {
            Some(handle) => NetworkSignal::Lost(handle),
            None => return Ok(true),
        },
        Transition::None => return Ok(true),
    };

    debug!("Device {} state {} -> {:?}", device, state, signal);
    Ok(tx.send(signal).is_ok())
}

async fn carries_expected_profile(
    conn: &Connection,
    proxy: &DeviceProxy<'_>,
    expected: Option<&OwnedObjectPath>,
) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let active = match proxy.active_connection().await {
        Ok(p) if p.as_str() != "/" => p,
        _ => return false,
    };
    let settings = async {
        let proxy = ActiveConnectionProxy::builder(conn)
            .path(active)?
            .build()
            .await?;
        proxy.connection().await
    }
    .await;
    matches!(settings, Ok(path) if &path == expected)
}

/// Forward NetworkManager `State` and `PrimaryConnection` changes as
/// connectivity change events.
pub async fn watch_connectivity(conn: Connection, tx: mpsc::UnboundedSender<ConnectivityChange>) {
    debug!("Starting NetworkManager connectivity listener");
    let proxy = match NetworkManagerProxy::new(&conn).await {
        Ok(p) => p,
        Err(e) => {
            warn!("Connectivity listener unavailable: {}", e);
            return;
        }
    };

    let states = proxy.receive_state_changed().await.map(|_| ());
    let primary = proxy.receive_primary_connection_changed().await.map(|_| ());
    let mut changes = Box::pin(futures::stream::select(states, primary));

    while changes.next().await.is_some() {
        if tx.send(ConnectivityChange).is_err() {
            break;
        }
    }
    debug!("Connectivity listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_acquires_once() {
        assert_eq!(transition(false, 100), Transition::Acquire);
        assert_eq!(transition(true, 100), Transition::None);
    }

    #[test]
    fn leaving_activated_releases() {
        assert_eq!(transition(true, 110), Transition::Release);
        assert_eq!(transition(true, 30), Transition::Release);
        assert_eq!(transition(false, 30), Transition::None);
        assert_eq!(transition(false, 70), Transition::None);
    }
}
