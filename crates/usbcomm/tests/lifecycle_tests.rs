//! Lifecycle integration tests
//!
//! These run against whatever libusb context the host provides. They make
//! no assumption that a device is attached: assertions cover behavior that
//! must hold on an empty bus, and USB context creation failures (e.g. in a
//! sandbox without libusb access) are tolerated by skipping.

use usbcomm::{
    DeviceRegistry, Error, HotplugFilter, HotplugMonitor, MatchCriteria, Session,
};

fn test_session() -> Option<Session> {
    match Session::open() {
        Ok(session) => Some(session),
        Err(e) => {
            eprintln!("no usb context available, skipping: {e}");
            None
        }
    }
}

#[test]
fn open_matching_round_trip_is_stable() {
    usbcomm::logging::init("warn");
    let Some(session) = test_session() else { return };
    let mut registry = DeviceRegistry::new(&session);

    // Criteria built from the live bus: every open_matching over the same
    // criteria must yield a handle set of the same size.
    let reports = registry.enumerate().expect("enumerate");
    let mut criteria = MatchCriteria::new();
    for report in &reports {
        criteria.add(report.vendor_id, report.product_id);
    }
    if criteria.is_empty() {
        return; // empty bus
    }

    let first = match registry.open_matching(&criteria) {
        Ok(handles) => handles,
        Err(Error::NoMatch) => return,
        Err(e) => panic!("open_matching failed: {e}"),
    };

    // Every issued handle is visible through the lookup surface until closed.
    for (index, id) in first.iter().enumerate() {
        assert_eq!(registry.handle_by_index(index), Some(*id));
    }
    assert_eq!(registry.handles(), first);

    let second = registry.open_matching(&criteria).expect("re-open");
    assert_eq!(first.len(), second.len());

    registry.close_all();
    assert!(registry.is_empty());
}

#[test]
fn claim_is_idempotent_and_release_is_silent() {
    let Some(session) = test_session() else { return };
    let mut registry = DeviceRegistry::new(&session);

    let reports = registry.enumerate().expect("enumerate");
    let mut criteria = MatchCriteria::new();
    for report in &reports {
        criteria.add(report.vendor_id, report.product_id);
    }
    if criteria.is_empty() {
        return;
    }
    let handles = match registry.open_matching(&criteria) {
        Ok(handles) if !handles.is_empty() => handles,
        _ => return, // nothing opened (permissions); covered by unit tests
    };
    let id = handles[0];

    // Claiming may fail against a busy interface; idempotence only applies
    // once a claim succeeded.
    if registry.claim_interface(id, 0).is_ok() {
        registry.claim_interface(id, 0).expect("second claim is a no-op");
        assert_eq!(registry.claimed_interfaces(id), vec![0]);

        registry.release_interface(id, 0);
        assert!(registry.claimed_interfaces(id).is_empty());
    }

    // Releasing an interface that was never claimed is not an error.
    registry.release_interface(id, 200);
    registry.release_all_interfaces(id);

    registry.close(id);
    // Closing twice is a no-op.
    registry.close(id);
    assert!(!registry.handles().contains(&id));
}

#[test]
fn deregistered_monitor_stays_silent() {
    let Some(session) = test_session() else { return };
    let mut monitor = HotplugMonitor::new(&session);
    let events = monitor.events();

    match monitor.register(HotplugFilter::any()) {
        Ok(_) => {}
        Err(Error::Unsupported) => return,
        Err(e) => panic!("hotplug registration failed: {e}"),
    }
    assert!(monitor.is_pumping());

    monitor.deregister_all();
    assert_eq!(monitor.registration_count(), 0);
    assert!(!monitor.is_pumping());

    // Drain anything produced before deregistration completed. The pump has
    // been joined, so nothing further can be delivered after this point.
    while events.try_recv().is_ok() {}
    std::thread::sleep(std::time::Duration::from_millis(250));
    assert!(events.try_recv().is_err());
}

#[test]
fn components_outlive_session_drop_order() {
    let Some(session) = test_session() else { return };
    let registry = DeviceRegistry::new(&session);
    let monitor = HotplugMonitor::new(&session);

    // The context is reference counted: dropping the session first is safe,
    // dependent components keep the stack alive until they are gone.
    drop(session);
    registry.enumerate().expect("enumerate after session drop");
    drop(monitor);
    drop(registry);
}
