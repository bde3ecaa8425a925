use thiserror::Error;

use crate::auth::Permission;

/// Unified error type for nexus-hop
#[derive(Error, Debug)]
pub enum HopError {
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

pub type HopResult<T> = Result<T, HopError>;

/// Reasons a switch attempt is refused or aborted before it yields an outcome
#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("invalid switch request: {0}")]
    InvalidRequest(&'static str),

    #[error("another switch is already in progress")]
    AlreadySwitching,

    #[error("permission denied: {0:?}")]
    PermissionDenied(Permission),

    #[error(transparent)]
    Platform(#[from] HopError),
}
