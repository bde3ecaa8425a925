//! In-memory connectivity platform for tests.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::error::HopResult;
use crate::network::platform::{Connectivity, ConnectivityWatch, NetworkRequest, Subscription};
use crate::network::types::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListKnown,
    Disconnect,
    Enable(ProfileHandle, bool),
    Reconnect,
    RequestNetwork(NetworkCapabilities),
    Bind(NetworkHandle),
    CurrentStatus,
    WatchConnectivity,
}

pub fn wifi_handle(interface: &str) -> NetworkHandle {
    NetworkHandle {
        interface: interface.into(),
        device: "/org/freedesktop/NetworkManager/Devices/3".into(),
        address: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))),
    }
}

pub struct FakePlatform {
    known: Mutex<Vec<NetworkProfile>>,
    status: Mutex<Option<ConnectionStatus>>,
    enable_result: AtomicBool,
    enable_held: AtomicBool,
    enable_entered: Notify,
    enable_released: Notify,
    bind_result: AtomicBool,
    calls: Mutex<Vec<Call>>,
    scripted: Mutex<Vec<NetworkSignal>>,
    request_tx: Mutex<Option<mpsc::UnboundedSender<NetworkSignal>>>,
    request_opened: Notify,
    watch_tx: Mutex<Option<mpsc::UnboundedSender<ConnectivityChange>>>,
}

impl FakePlatform {
    pub fn with_known(names: &[&str]) -> Self {
        let platform = Self {
            known: Mutex::new(Vec::new()),
            status: Mutex::new(None),
            enable_result: AtomicBool::new(true),
            enable_held: AtomicBool::new(false),
            enable_entered: Notify::new(),
            enable_released: Notify::new(),
            bind_result: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(Vec::new()),
            request_tx: Mutex::new(None),
            request_opened: Notify::new(),
            watch_tx: Mutex::new(None),
        };
        for name in names {
            platform.add_known(name);
        }
        platform
    }

    pub fn add_known(&self, name: &str) {
        let mut known = self.known.lock().unwrap();
        let handle = ProfileHandle::new(format!(
            "/org/freedesktop/NetworkManager/Settings/{}",
            known.len() + 1
        ));
        known.push(NetworkProfile::new(name, handle));
    }

    pub fn known(&self) -> Vec<NetworkProfile> {
        self.known.lock().unwrap().clone()
    }

    pub fn set_status(&self, status: Option<ConnectionStatus>) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_enable_result(&self, ok: bool) {
        self.enable_result.store(ok, Ordering::SeqCst);
    }

    /// Park the next `enable_network` call until `release_enable`
    pub fn hold_next_enable(&self) {
        self.enable_held.store(true, Ordering::SeqCst);
    }

    /// Wait until a held `enable_network` call has been entered
    pub async fn enable_entered(&self) {
        self.enable_entered.notified().await;
    }

    pub fn release_enable(&self) {
        self.enable_released.notify_one();
    }

    pub fn set_bind_result(&self, ok: bool) {
        self.bind_result.store(ok, Ordering::SeqCst);
    }

    /// Signals delivered as soon as the next network request opens
    pub fn script(&self, signals: Vec<NetworkSignal>) {
        *self.scripted.lock().unwrap() = signals;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    /// Wait until `nth` network requests have been opened and return the
    /// signal sender of the latest one
    pub async fn wait_for_request(&self, nth: usize) -> mpsc::UnboundedSender<NetworkSignal> {
        loop {
            let notified = self.request_opened.notified();
            if self.count(|c| matches!(c, Call::RequestNetwork(_))) >= nth {
                if let Some(tx) = self.request_tx.lock().unwrap().clone() {
                    return tx;
                }
            }
            notified.await;
        }
    }

    /// Drop the platform side of the open network request
    pub fn close_request(&self) {
        self.request_tx.lock().unwrap().take();
    }

    pub fn emit_connectivity(&self) -> bool {
        match self.watch_tx.lock().unwrap().as_ref() {
            Some(tx) => tx.send(ConnectivityChange).is_ok(),
            None => false,
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Connectivity for FakePlatform {
    async fn list_known_networks(&self) -> HopResult<Vec<NetworkProfile>> {
        self.record(Call::ListKnown);
        Ok(self.known())
    }

    async fn disconnect_active(&self) {
        self.record(Call::Disconnect);
    }

    async fn enable_network(&self, profile: &ProfileHandle, make_preferred: bool) -> bool {
        if self.enable_held.swap(false, Ordering::SeqCst) {
            self.enable_entered.notify_one();
            self.enable_released.notified().await;
        }
        self.record(Call::Enable(profile.clone(), make_preferred));
        self.enable_result.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) {
        self.record(Call::Reconnect);
    }

    async fn request_network(&self, caps: NetworkCapabilities) -> HopResult<NetworkRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        for signal in self.scripted.lock().unwrap().drain(..) {
            let _ = tx.send(signal);
        }
        // Publish the sender before the call so waiters never see a stale one
        *self.request_tx.lock().unwrap() = Some(tx);
        self.record(Call::RequestNetwork(caps));
        self.request_opened.notify_one();
        Ok(Subscription::new(rx, None))
    }

    fn bind_all_traffic_to(&self, handle: &NetworkHandle) -> bool {
        self.record(Call::Bind(handle.clone()));
        self.bind_result.load(Ordering::SeqCst)
    }

    async fn current_connection_status(&self) -> HopResult<Option<ConnectionStatus>> {
        self.record(Call::CurrentStatus);
        Ok(self.status.lock().unwrap().clone())
    }

    async fn watch_connectivity(&self) -> HopResult<ConnectivityWatch> {
        self.record(Call::WatchConnectivity);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.watch_tx.lock().unwrap() = Some(tx);
        Ok(Subscription::new(rx, None))
    }
}
