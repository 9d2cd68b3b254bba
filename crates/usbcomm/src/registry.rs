//! Device registry
//!
//! Tracks currently-opened device handles and the interface numbers claimed
//! on each of them. The registry is the only authority that issues a
//! [`HandleId`] or accepts one as valid input; every mutating operation
//! consults it first so that unknown or stale handles are rejected without
//! side effects.

use crate::descriptor::{self, DeviceReport};
use crate::error::{Error, Result};
use crate::session::Session;
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Opaque reference to one tracked open device.
///
/// Valid only between a successful `open_matching` and the matching `close`
/// (or an invalidating reset). Callers cannot construct one themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub(crate) u32);

/// Vendor-id → product-ids multimap used by [`DeviceRegistry::open_matching`].
///
/// One vendor id may map to several product ids.
#[derive(Debug, Clone, Default)]
pub struct MatchCriteria {
    entries: HashMap<u16, Vec<u16>>,
}

impl MatchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.add(vendor_id, product_id);
        self
    }

    pub fn add(&mut self, vendor_id: u16, product_id: u16) {
        let products = self.entries.entry(vendor_id).or_default();
        if !products.contains(&product_id) {
            products.push(product_id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.entries
            .get(&vendor_id)
            .map(|products| products.contains(&product_id))
            .unwrap_or(false)
    }
}

/// One tracked open device: the live device reference, its open handle and
/// the set of interfaces this process has claimed on it.
struct OpenDevice {
    device: Device<Context>,
    handle: DeviceHandle<Context>,
    claimed: BTreeSet<u8>,
}

impl OpenDevice {
    /// Release every claimed interface, reattaching kernel drivers
    /// best-effort so the device returns to kernel control.
    fn release_all(&mut self) {
        let claimed = std::mem::take(&mut self.claimed);
        for interface in claimed {
            if let Err(e) = self.handle.release_interface(interface) {
                warn!("failed to release interface {interface}: {e}");
            }
            if let Err(e) = self.handle.attach_kernel_driver(interface) {
                debug!("could not reattach kernel driver to interface {interface}: {e}");
            }
        }
    }
}

/// Registry of open device handles and their interface claims.
///
/// Mutated only from the caller's thread; hotplug callbacks never touch it.
pub struct DeviceRegistry {
    context: Context,
    devices: BTreeMap<HandleId, OpenDevice>,
    next_handle_id: u32,
}

impl DeviceRegistry {
    pub fn new(session: &Session) -> Self {
        Self {
            context: session.context(),
            devices: BTreeMap::new(),
            next_handle_id: 1,
        }
    }

    /// List every currently attached device with its full descriptor tree.
    ///
    /// Read-only, no side effects. Devices whose descriptors cannot be read
    /// are skipped. Re-enumerate for fresh data.
    pub fn enumerate(&self) -> Result<Vec<DeviceReport>> {
        let devices = self.context.devices().map_err(Error::Enumerate)?;

        let mut reports = Vec::new();
        for device in devices.iter() {
            match descriptor::describe(&device) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(
                        "skipping device bus={} addr={}: {e}",
                        device.bus_number(),
                        device.address()
                    );
                }
            }
        }

        debug!("enumerated {} devices", reports.len());
        Ok(reports)
    }

    /// Close everything currently held, then open every attached device
    /// whose (vendor id, product id) pair appears in `criteria`.
    ///
    /// A single device failing to open does not abort the operation; the
    /// handles that did open are returned. Fails only when `criteria` is
    /// empty or when no attached device matched at all.
    pub fn open_matching(&mut self, criteria: &MatchCriteria) -> Result<Vec<HandleId>> {
        if criteria.is_empty() {
            return Err(Error::EmptyCriteria);
        }

        self.close_all();

        let devices = self.context.devices().map_err(Error::Enumerate)?;
        let mut opened = Vec::new();
        let mut matched = 0usize;

        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    warn!(
                        "skipping unreadable device bus={} addr={}: {e}",
                        device.bus_number(),
                        device.address()
                    );
                    continue;
                }
            };

            if !criteria.matches(desc.vendor_id(), desc.product_id()) {
                continue;
            }
            matched += 1;

            match device.open() {
                Ok(handle) => {
                    let id = HandleId(self.next_handle_id);
                    self.next_handle_id += 1;

                    info!(
                        "opened device vid={:#06x} pid={:#06x} bus={} addr={} as {id:?}",
                        desc.vendor_id(),
                        desc.product_id(),
                        device.bus_number(),
                        device.address()
                    );

                    self.devices.insert(
                        id,
                        OpenDevice {
                            device,
                            handle,
                            claimed: BTreeSet::new(),
                        },
                    );
                    opened.push(id);
                }
                Err(e) => {
                    // Partial success is allowed; keep going.
                    warn!(
                        "failed to open matching device vid={:#06x} pid={:#06x}: {e}",
                        desc.vendor_id(),
                        desc.product_id()
                    );
                }
            }
        }

        if matched == 0 {
            return Err(Error::NoMatch);
        }
        Ok(opened)
    }

    /// Release all claims on `id`, close the handle and stop tracking it.
    /// No-op if the handle is unknown (already closed).
    pub fn close(&mut self, id: HandleId) {
        if let Some(mut open) = self.devices.remove(&id) {
            open.release_all();
            debug!("closed {id:?}");
        }
    }

    /// Close every tracked handle.
    pub fn close_all(&mut self) {
        let ids: Vec<HandleId> = self.devices.keys().copied().collect();
        for id in ids {
            self.close(id);
        }
    }

    /// Activate configuration `value` on the device.
    ///
    /// Idempotent when the configuration is already active (libusb performs
    /// a lightweight state reset in that case).
    pub fn set_configuration(&mut self, id: HandleId, value: u8) -> Result<()> {
        let open = self.devices.get_mut(&id).ok_or(Error::UnknownHandle(id))?;
        open.handle
            .set_active_configuration(value)
            .map_err(|source| Error::Config { value, source })?;
        debug!("activated configuration {value} on {id:?}");
        Ok(())
    }

    /// Claim an interface on the device, detaching a kernel-resident driver
    /// first when one owns it.
    ///
    /// Idempotent: claiming an interface already claimed on this handle
    /// succeeds without duplication.
    pub fn claim_interface(&mut self, id: HandleId, interface: u8) -> Result<()> {
        let open = self.devices.get_mut(&id).ok_or(Error::UnknownHandle(id))?;

        if open.claimed.contains(&interface) {
            debug!("interface {interface} already claimed on {id:?}");
            return Ok(());
        }

        if open.handle.kernel_driver_active(interface).unwrap_or(false) {
            debug!("detaching kernel driver from interface {interface} on {id:?}");
            open.handle
                .detach_kernel_driver(interface)
                .map_err(|source| Error::Detach { interface, source })?;
        }

        open.handle
            .claim_interface(interface)
            .map_err(|source| Error::Claim { interface, source })?;

        open.claimed.insert(interface);
        info!("claimed interface {interface} on {id:?}");
        Ok(())
    }

    /// Release one claimed interface.
    ///
    /// Silent no-op when the handle is unknown or the interface was never
    /// claimed on it.
    pub fn release_interface(&mut self, id: HandleId, interface: u8) {
        let open = match self.devices.get_mut(&id) {
            Some(open) => open,
            None => return,
        };
        if !open.claimed.remove(&interface) {
            return;
        }

        if let Err(e) = open.handle.release_interface(interface) {
            warn!("failed to release interface {interface} on {id:?}: {e}");
        }
        if let Err(e) = open.handle.attach_kernel_driver(interface) {
            debug!("could not reattach kernel driver to interface {interface}: {e}");
        }
        debug!("released interface {interface} on {id:?}");
    }

    /// Release every claimed interface on the handle and clear its claim
    /// set. Silent no-op when the handle is unknown.
    pub fn release_all_interfaces(&mut self, id: HandleId) {
        if let Some(open) = self.devices.get_mut(&id) {
            open.release_all();
            debug!("released all interfaces on {id:?}");
        }
    }

    /// Activate an alternate setting on an already-claimed interface.
    ///
    /// Blocks until the underlying control transfer completes.
    pub fn set_alt_setting(&mut self, id: HandleId, interface: u8, alt_setting: u8) -> Result<()> {
        let open = self.devices.get_mut(&id).ok_or(Error::UnknownHandle(id))?;
        if !open.claimed.contains(&interface) {
            return Err(Error::NotClaimed(interface));
        }

        open.handle
            .set_alternate_setting(interface, alt_setting)
            .map_err(|source| Error::Config {
                value: alt_setting,
                source,
            })?;
        debug!("activated alt-setting {alt_setting} on interface {interface} of {id:?}");
        Ok(())
    }

    /// Reset the device. The stack restores the prior configuration and
    /// alt-settings best-effort.
    ///
    /// When the stack reports the handle as no longer valid (the device
    /// re-enumerated), the stale handle is purged from the registry and
    /// `Error::ResetInvalidated` is returned; re-discover the device via
    /// [`DeviceRegistry::open_matching`]. Any other failure returns
    /// `Error::ResetFailed` and keeps the handle tracked.
    pub fn reset(&mut self, id: HandleId) -> Result<()> {
        let open = self.devices.get_mut(&id).ok_or(Error::UnknownHandle(id))?;

        match open.handle.reset() {
            Ok(()) => {
                info!("reset {id:?}");
                Ok(())
            }
            Err(rusb::Error::NotFound) | Err(rusb::Error::NoDevice) => {
                // Device came back under a new handle; ours is dead. Purge
                // it so it can never be reused.
                warn!("reset invalidated {id:?}, purging stale handle");
                if let Some(mut open) = self.devices.remove(&id) {
                    open.claimed.clear();
                }
                Err(Error::ResetInvalidated)
            }
            Err(e) => {
                warn!("reset of {id:?} failed: {e}");
                Err(Error::ResetFailed(e))
            }
        }
    }

    /// Tracked handle at position `index`, in handle-issue order.
    pub fn handle_by_index(&self, index: usize) -> Option<HandleId> {
        self.devices.keys().nth(index).copied()
    }

    /// Scan tracked handles' live descriptors for a vendor/product match.
    /// With `port` set, the device's current port number must match too.
    pub fn handle_by_vid_pid(
        &self,
        vendor_id: u16,
        product_id: u16,
        port: Option<u8>,
    ) -> Option<HandleId> {
        for (id, open) in &self.devices {
            let desc = match open.device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };
            if desc.vendor_id() != vendor_id || desc.product_id() != product_id {
                continue;
            }
            if let Some(port) = port {
                if open.device.port_number() != port {
                    continue;
                }
            }
            return Some(*id);
        }
        None
    }

    /// Snapshot of every tracked handle, in handle-issue order.
    pub fn handles(&self) -> Vec<HandleId> {
        self.devices.keys().copied().collect()
    }

    /// Interface numbers currently claimed on the handle. Empty for an
    /// unknown handle.
    pub fn claimed_interfaces(&self, id: HandleId) -> Vec<u8> {
        self.devices
            .get(&id)
            .map(|open| open.claimed.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Open rusb handle for the transfer gateway. `None` when untracked.
    pub(crate) fn open_handle_mut(&mut self, id: HandleId) -> Option<&mut DeviceHandle<Context>> {
        self.devices.get_mut(&id).map(|open| &mut open.handle)
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;
    use crate::transfer::bulk_transfer;

    fn test_session() -> Option<Session> {
        match Session::open() {
            Ok(session) => Some(session),
            Err(e) => {
                eprintln!("no usb context available: {e}");
                None
            }
        }
    }

    #[test]
    fn test_criteria_multimap() {
        let criteria = MatchCriteria::new()
            .with(0x0483, 0x5748)
            .with(0x0483, 0x5749)
            .with(0x04b4, 0x00f1);

        assert!(criteria.matches(0x0483, 0x5748));
        assert!(criteria.matches(0x0483, 0x5749));
        assert!(criteria.matches(0x04b4, 0x00f1));

        assert!(!criteria.matches(0x0483, 0x00f1)); // wrong product
        assert!(!criteria.matches(0x04b4, 0x5748)); // wrong vendor
        assert!(!criteria.matches(0x0000, 0x0000));
    }

    #[test]
    fn test_criteria_duplicate_add() {
        let mut criteria = MatchCriteria::new();
        criteria.add(0x1234, 0x5678);
        criteria.add(0x1234, 0x5678);
        assert!(criteria.matches(0x1234, 0x5678));
        assert!(!criteria.is_empty());
    }

    #[test]
    fn test_empty_criteria_rejected() {
        let Some(session) = test_session() else { return };
        let mut registry = DeviceRegistry::new(&session);

        let err = registry.open_matching(&MatchCriteria::new()).unwrap_err();
        assert!(matches!(err, Error::EmptyCriteria));
    }

    #[test]
    fn test_no_match_rejected() {
        let Some(session) = test_session() else { return };
        let mut registry = DeviceRegistry::new(&session);

        // Vendor id 0x0000 is reserved; no real device carries it.
        let criteria = MatchCriteria::new().with(0x0000, 0x0000);
        let err = registry.open_matching(&criteria).unwrap_err();
        assert!(matches!(err, Error::NoMatch));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_handle_rejected_without_side_effects() {
        let Some(session) = test_session() else { return };
        let mut registry = DeviceRegistry::new(&session);
        let bogus = HandleId(42);

        assert!(matches!(
            registry.set_configuration(bogus, 1),
            Err(Error::UnknownHandle(_))
        ));
        assert!(matches!(
            registry.claim_interface(bogus, 0),
            Err(Error::UnknownHandle(_))
        ));
        assert!(matches!(
            registry.set_alt_setting(bogus, 0, 0),
            Err(Error::UnknownHandle(_))
        ));
        assert!(matches!(
            registry.reset(bogus),
            Err(Error::UnknownHandle(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_and_release_are_noops_on_unknown_handle() {
        let Some(session) = test_session() else { return };
        let mut registry = DeviceRegistry::new(&session);
        let bogus = HandleId(7);

        registry.close(bogus);
        registry.release_interface(bogus, 0);
        registry.release_all_interfaces(bogus);
        registry.close_all();

        assert!(registry.is_empty());
        assert!(registry.claimed_interfaces(bogus).is_empty());
    }

    #[test]
    fn test_lookups_miss_without_error() {
        let Some(session) = test_session() else { return };
        let registry = DeviceRegistry::new(&session);

        assert_eq!(registry.handle_by_index(0), None);
        assert_eq!(registry.handle_by_vid_pid(0x0483, 0x5748, None), None);
        assert_eq!(registry.handle_by_vid_pid(0x0483, 0x5748, Some(3)), None);
        assert!(registry.handles().is_empty());
    }

    #[test]
    fn test_enumerate_has_no_side_effects() {
        let Some(session) = test_session() else { return };
        let registry = DeviceRegistry::new(&session);

        let first = registry.enumerate().expect("enumerate");
        let second = registry.enumerate().expect("enumerate");
        assert_eq!(first.len(), second.len());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_transfer_on_unknown_handle() {
        let Some(session) = test_session() else { return };
        let mut registry = DeviceRegistry::new(&session);

        let mut buffer = *b"hello\n";
        let err = bulk_transfer(&mut registry, HandleId(9), 0x07, &mut buffer, 0).unwrap_err();
        assert_eq!(err, TransferError::UnknownHandle);
        assert_eq!(err.code(), -5);
    }
}
