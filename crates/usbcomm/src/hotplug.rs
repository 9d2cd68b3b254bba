//! Hotplug monitoring
//!
//! Registers filtered attach/detach callbacks against the session context
//! and republishes them as [`HotplugEvent`]s. The native callback runs on
//! the event pump thread and does the minimum possible work: extract device
//! identity, push one event onto the channel, return. It never blocks,
//! never fails outward and never calls back into the registry.

use crate::error::{Error, Result};
use crate::events::EventPump;
use crate::session::Session;
use async_channel::{Receiver, Sender};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration};
use tracing::{debug, info, warn};

/// One physical arrival or departure.
///
/// Identity fields degrade to [`HotplugEvent::UNKNOWN`] when the descriptor
/// read fails during the callback; the event is still delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotplugEvent {
    /// `true` for arrival, `false` for departure.
    pub attached: bool,
    pub vendor_id: i32,
    pub product_id: i32,
    pub port: i32,
}

impl HotplugEvent {
    /// Sentinel for an identity field that could not be read.
    pub const UNKNOWN: i32 = -1;
}

/// Filter criteria for a hotplug registration. Each field defaults to
/// match-any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HotplugFilter {
    pub device_class: Option<u8>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl HotplugFilter {
    /// Match every device.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn vendor(mut self, vendor_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self
    }

    pub fn product(mut self, product_id: u16) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn class(mut self, device_class: u8) -> Self {
        self.device_class = Some(device_class);
        self
    }
}

/// Token for one hotplug registration, usable for selective deregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken(u32);

/// Owner of hotplug registrations and the event pump that drives them.
///
/// Events are consumed through the receiver returned by
/// [`HotplugMonitor::events`]; delivery preserves arrival order and works
/// from both blocking (`recv_blocking`) and async (`recv`) consumers.
pub struct HotplugMonitor {
    context: Context,
    pump: EventPump,
    registrations: Vec<(RegistrationToken, Registration<Context>)>,
    next_token: u32,
    event_tx: Sender<HotplugEvent>,
    event_rx: Receiver<HotplugEvent>,
}

impl HotplugMonitor {
    pub fn new(session: &Session) -> Self {
        let (event_tx, event_rx) = async_channel::unbounded();
        let context = session.context();
        Self {
            pump: EventPump::from_context(context.clone()),
            context,
            registrations: Vec::new(),
            next_token: 1,
            event_tx,
            event_rx,
        }
    }

    /// Receiver for hotplug notifications. May be cloned; each event is
    /// delivered to one receiver.
    pub fn events(&self) -> Receiver<HotplugEvent> {
        self.event_rx.clone()
    }

    /// Register an arrival+departure callback for devices matching `filter`
    /// and start the event pump if it is not already running.
    ///
    /// Fails with [`Error::Unsupported`] when this platform's libusb lacks
    /// hotplug capability. Multiple registrations with overlapping filters
    /// may coexist; each is independently revocable.
    pub fn register(&mut self, filter: HotplugFilter) -> Result<RegistrationToken> {
        if !rusb::has_hotplug() {
            return Err(Error::Unsupported);
        }

        let hook = ForwardingHook {
            event_tx: self.event_tx.clone(),
        };

        let mut builder = HotplugBuilder::new();
        builder.enumerate(false);
        if let Some(device_class) = filter.device_class {
            builder.class(device_class);
        }
        if let Some(vendor_id) = filter.vendor_id {
            builder.vendor_id(vendor_id);
        }
        if let Some(product_id) = filter.product_id {
            builder.product_id(product_id);
        }

        let registration = builder
            .register(&self.context, Box::new(hook))
            .map_err(Error::Hotplug)?;

        let token = RegistrationToken(self.next_token);
        self.next_token += 1;
        self.registrations.push((token, registration));

        // Callbacks only fire while events are being serviced.
        self.pump.start();

        info!("hotplug registration {token:?} active ({filter:?})");
        Ok(token)
    }

    /// Remove one registration. Unknown tokens are ignored.
    ///
    /// When the last registration goes away the event pump is stopped and
    /// joined, so no callback fires after this returns.
    pub fn deregister(&mut self, token: RegistrationToken) {
        let before = self.registrations.len();
        // Dropping the rusb registration removes the callback.
        self.registrations.retain(|(t, _)| *t != token);
        if self.registrations.len() < before {
            debug!("hotplug registration {token:?} removed");
        }
        self.stop_pump_if_idle();
    }

    /// Remove every registration, stop the pump and join its worker.
    pub fn deregister_all(&mut self) {
        if !self.registrations.is_empty() {
            debug!("removing {} hotplug registrations", self.registrations.len());
        }
        self.registrations.clear();
        self.stop_pump_if_idle();
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_pumping(&self) -> bool {
        self.pump.is_running()
    }

    fn stop_pump_if_idle(&mut self) {
        if self.registrations.is_empty() {
            self.pump.stop();
        }
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.deregister_all();
    }
}

/// The `Hotplug` impl handed to the stack. Runs on the event pump thread.
struct ForwardingHook {
    event_tx: Sender<HotplugEvent>,
}

impl ForwardingHook {
    fn forward(&self, device: &Device<Context>, attached: bool) {
        let port = i32::from(device.port_number());
        let (vendor_id, product_id) = match device.device_descriptor() {
            Ok(descriptor) => (
                i32::from(descriptor.vendor_id()),
                i32::from(descriptor.product_id()),
            ),
            // Identity degrades to unknown; the event is still delivered.
            Err(_) => (HotplugEvent::UNKNOWN, HotplugEvent::UNKNOWN),
        };

        let event = HotplugEvent {
            attached,
            vendor_id,
            product_id,
            port,
        };

        // Unbounded channel: try_send never blocks the pump thread and only
        // fails once every receiver is gone.
        if self.event_tx.try_send(event).is_err() {
            warn!("dropping hotplug event, no consumer: {event:?}");
        }
    }
}

impl Hotplug<Context> for ForwardingHook {
    fn device_arrived(&mut self, device: Device<Context>) {
        self.forward(&device, true);
    }

    fn device_left(&mut self, device: Device<Context>) {
        self.forward(&device, false);
    }
}
