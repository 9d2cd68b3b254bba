//! libusb session ownership
//!
//! A [`Session`] owns the libusb context all other components operate on.
//! rusb contexts are reference counted, so each dependent component holds
//! its own clone; the underlying `libusb_exit` only runs once the session
//! and every component derived from it have been dropped.

use crate::error::{Error, Result};
use rusb::{Context, LogLevel, UsbContext};
use tracing::debug;

/// Owner of the underlying libusb context.
///
/// One per independent subsystem instance. Create a [`Session`], then derive
/// a [`crate::DeviceRegistry`] and/or [`crate::HotplugMonitor`] from it.
pub struct Session {
    context: Context,
}

impl Session {
    /// Initialize the USB stack.
    ///
    /// Clamps libusb's own log output to warnings to suppress debug noise;
    /// this library's logging goes through `tracing` instead.
    pub fn open() -> Result<Self> {
        let mut context = Context::new().map_err(Error::Init)?;
        context.set_log_level(LogLevel::Warning);
        debug!("libusb context initialized");
        Ok(Self { context })
    }

    /// Clone of the underlying context for a dependent component.
    pub(crate) fn context(&self) -> Context {
        self.context.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_open() {
        // Context creation can fail in restricted environments; tolerate it.
        match Session::open() {
            Ok(session) => {
                let a = session.context();
                let b = session.context();
                // Clones refer to the same underlying context.
                drop(a);
                drop(b);
            }
            Err(e) => eprintln!("session open failed (expected without libusb): {e}"),
        }
    }
}
