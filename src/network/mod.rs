pub mod binding;
pub mod dbus_proxies;
pub mod manager;
pub mod platform;
pub mod signals;
pub mod types;
pub mod wifi;

#[cfg(test)]
pub mod fake;

pub use manager::NetworkManager;
pub use platform::{Connectivity, NetworkRequest};
pub use types::*;
