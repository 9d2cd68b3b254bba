//! Host-side USB application-layer communication library.
//!
//! Wraps libusb (through `rusb`) into a small set of components:
//!
//! - [`Session`] owns the libusb context shared by everything else
//! - [`DeviceRegistry`] tracks open device handles and per-handle interface
//!   claims, and is the single authority for handle validity
//! - [`EventPump`] services pending libusb events on a dedicated thread with
//!   a bounded poll so it can always be stopped promptly
//! - [`HotplugMonitor`] registers filtered attach/detach callbacks and
//!   republishes them as [`HotplugEvent`]s over a thread-safe channel
//! - [`transfer::bulk_transfer`] performs blocking bulk I/O with endpoint
//!   stall recovery and normalized error codes
//!
//! Teardown ordering (hotplug registrations before handles before the
//! context) is enforced by ownership: every component holds a clone of the
//! reference-counted context, registries close their handles on drop and
//! monitors deregister their callbacks and join the pump on drop, so the
//! context itself is torn down last.

pub mod descriptor;
pub mod error;
pub mod events;
pub mod hotplug;
pub mod logging;
pub mod registry;
pub mod session;
pub mod transfer;

pub use descriptor::{
    ConfigReport, DeviceReport, EndpointReport, InterfaceReport, Speed, TransferKind,
};
pub use error::{Error, Result, TransferError};
pub use events::EventPump;
pub use hotplug::{HotplugEvent, HotplugFilter, HotplugMonitor, RegistrationToken};
pub use registry::{DeviceRegistry, HandleId, MatchCriteria};
pub use session::Session;
pub use transfer::bulk_transfer;
