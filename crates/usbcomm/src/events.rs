//! Event pump thread
//!
//! libusb only delivers hotplug callbacks (and, on callback-driven stacks,
//! transfer completions) while someone services its pending events. The
//! [`EventPump`] runs that servicing on a dedicated thread with a bounded
//! poll timeout: a blocking `handle_events(None)` wait cannot be forcibly
//! terminated reliably on the target platforms, so the loop returns control
//! every poll interval to check the stop flag. `stop()` therefore always
//! completes within roughly one poll interval.

use crate::session::Session;
use rusb::{Context, UsbContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Poll timeout for one `handle_events` pass.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Background worker servicing pending libusb events.
///
/// At most one pump may exist per session context; libusb guards its event
/// entry point internally, but concurrent pumps would contend for it.
pub struct EventPump {
    context: Context,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EventPump {
    pub fn new(session: &Session) -> Self {
        Self {
            context: session.context(),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub(crate) fn from_context(context: Context) -> Self {
        Self {
            context,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Start the worker. No-op if it is already running.
    pub fn start(&mut self) {
        if let Some(worker) = self.worker.take() {
            if !worker.is_finished() {
                debug!("event pump already running");
                self.worker = Some(worker);
                return;
            }
            // Previous run already exited; reap it before restarting.
            let _ = worker.join();
        }

        self.stop.store(false, Ordering::SeqCst);
        let context = self.context.clone();
        let stop = Arc::clone(&self.stop);

        let worker = std::thread::Builder::new()
            .name("usb-event-pump".to_string())
            .spawn(move || {
                debug!("USB event pump started");
                while !stop.load(Ordering::SeqCst) {
                    match context.handle_events(Some(POLL_TIMEOUT)) {
                        Ok(()) => {}
                        Err(rusb::Error::Interrupted) => {
                            debug!("USB event handling interrupted");
                        }
                        Err(e) => {
                            // Transient; back off one interval and retry
                            // rather than killing the pump.
                            warn!("error handling USB events: {e}");
                            std::thread::sleep(POLL_TIMEOUT);
                        }
                    }
                }
                debug!("USB event pump stopped");
            })
            .expect("Failed to spawn USB event pump thread");

        self.worker = Some(worker);
    }

    /// Set the stop flag and join the worker.
    ///
    /// When this returns, no further callback will fire from the pump.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("USB event pump thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| !worker.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_idempotent() {
        let session = match Session::open() {
            Ok(s) => s,
            Err(e) => {
                eprintln!("no usb context available: {e}");
                return;
            }
        };

        let mut pump = EventPump::new(&session);
        assert!(!pump.is_running());

        pump.start();
        assert!(pump.is_running());
        // Second start is a no-op.
        pump.start();
        assert!(pump.is_running());

        pump.stop();
        assert!(!pump.is_running());
        // Stopping a stopped pump is fine.
        pump.stop();

        // The pump may be restarted after a stop.
        pump.start();
        assert!(pump.is_running());
        pump.stop();
    }
}
