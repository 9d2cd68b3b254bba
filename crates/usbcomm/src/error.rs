//! Error types

use crate::registry::HandleId;
use thiserror::Error;

/// Lifecycle errors reported by the session, registry and monitor.
#[derive(Debug, Error)]
pub enum Error {
    /// The libusb context could not be initialized. Fatal; surfaced at
    /// construction.
    #[error("USB context initialization failed: {0}")]
    Init(#[source] rusb::Error),

    /// This platform's libusb build lacks hotplug support. The caller may
    /// proceed without hotplug monitoring.
    #[error("hotplug is not supported by this platform's libusb")]
    Unsupported,

    /// Registering a hotplug callback with the stack failed.
    #[error("failed to register hotplug callback: {0}")]
    Hotplug(#[source] rusb::Error),

    /// The stack could not produce the current device list.
    #[error("device list unavailable: {0}")]
    Enumerate(#[source] rusb::Error),

    /// The operation was given a handle the registry does not track.
    /// Rejected without side effects.
    #[error("unknown device handle {0:?}")]
    UnknownHandle(HandleId),

    /// `open_matching` was called with no vendor/product criteria.
    #[error("no vendor/product criteria supplied")]
    EmptyCriteria,

    /// No attached device matched the supplied criteria.
    #[error("no attached device matched the supplied criteria")]
    NoMatch,

    /// Activating a configuration or alternate setting failed.
    #[error("failed to activate configuration/alt-setting {value}: {source}")]
    Config {
        value: u8,
        #[source]
        source: rusb::Error,
    },

    /// Detaching the kernel-resident driver from an interface failed.
    #[error("failed to detach kernel driver from interface {interface}: {source}")]
    Detach {
        interface: u8,
        #[source]
        source: rusb::Error,
    },

    /// Claiming an interface failed.
    #[error("failed to claim interface {interface}: {source}")]
    Claim {
        interface: u8,
        #[source]
        source: rusb::Error,
    },

    /// An alternate setting was requested on an interface that has not been
    /// claimed on this handle.
    #[error("interface {0} is not claimed")]
    NotClaimed(u8),

    /// The reset invalidated the handle (device re-enumerated). The stale
    /// handle has been purged; re-discover the device via `open_matching`.
    #[error("device reset invalidated the handle; re-open the device")]
    ResetInvalidated,

    /// The reset failed but the handle may still be usable.
    #[error("device reset failed: {0}")]
    ResetFailed(#[source] rusb::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Normalized transfer errors.
///
/// Mirrors the libusb error family so that callers interoperating with raw
/// status codes can use [`TransferError::code`]. Timeout never reaches the
/// caller as an error: the transfer gateway reports it as a successful short
/// count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The transfer was given a handle the registry does not track.
    #[error("transfer on a handle the registry does not track")]
    UnknownHandle,
    #[error("input/output error")]
    Io,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("access denied")]
    Access,
    #[error("device has been disconnected")]
    NoDevice,
    #[error("entity not found")]
    NotFound,
    #[error("resource busy")]
    Busy,
    #[error("transfer timed out")]
    Timeout,
    #[error("overflow")]
    Overflow,
    /// Endpoint stall. The gateway clears the halt condition before
    /// returning this, so the endpoint stays usable.
    #[error("endpoint stalled")]
    Stall,
    #[error("system call interrupted")]
    Interrupted,
    #[error("insufficient memory")]
    NoMem,
    #[error("operation not supported")]
    NotSupported,
    #[error("USB stack error")]
    Other,
}

impl TransferError {
    /// libusb-style negative status code for this error.
    pub fn code(self) -> i32 {
        match self {
            TransferError::Io => -1,
            TransferError::InvalidParam => -2,
            TransferError::Access => -3,
            TransferError::NoDevice => -4,
            TransferError::NotFound | TransferError::UnknownHandle => -5,
            TransferError::Busy => -6,
            TransferError::Timeout => -7,
            TransferError::Overflow => -8,
            TransferError::Stall => -9,
            TransferError::Interrupted => -10,
            TransferError::NoMem => -11,
            TransferError::NotSupported => -12,
            TransferError::Other => -99,
        }
    }
}

impl From<rusb::Error> for TransferError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Io => TransferError::Io,
            rusb::Error::InvalidParam => TransferError::InvalidParam,
            rusb::Error::Access => TransferError::Access,
            rusb::Error::NoDevice => TransferError::NoDevice,
            rusb::Error::NotFound => TransferError::NotFound,
            rusb::Error::Busy => TransferError::Busy,
            rusb::Error::Timeout => TransferError::Timeout,
            rusb::Error::Overflow => TransferError::Overflow,
            rusb::Error::Pipe => TransferError::Stall,
            rusb::Error::Interrupted => TransferError::Interrupted,
            rusb::Error::NoMem => TransferError::NoMem,
            rusb::Error::NotSupported => TransferError::NotSupported,
            _ => TransferError::Other,
        }
    }
}
