//! Descriptor introspection
//!
//! Read-only diagnostic view of an attached device: identity, negotiated
//! speed and the configuration → interface → altsetting → endpoint tree.

use rusb::{Context, Device};
use tracing::debug;

/// Negotiated device speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    /// Speed not known to the stack.
    Unknown,
    /// Low speed - 1.5 Mbps (USB 1.0)
    Low,
    /// Full speed - 12 Mbps (USB 1.1)
    Full,
    /// High speed - 480 Mbps (USB 2.0)
    High,
    /// SuperSpeed - 5 Gbps (USB 3.0)
    Super,
    /// SuperSpeed+ - 10 Gbps (USB 3.1)
    SuperPlus,
}

/// Endpoint transfer type bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint within an altsetting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointReport {
    /// Endpoint address, direction bit included.
    pub address: u8,
    pub transfer_kind: TransferKind,
}

/// One altsetting of an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceReport {
    pub interface_number: u8,
    pub alt_setting: u8,
    pub interface_class: u8,
    pub endpoints: Vec<EndpointReport>,
}

/// One configuration of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReport {
    /// bConfigurationValue, as passed to `set_configuration`.
    pub configuration_value: u8,
    pub interfaces: Vec<InterfaceReport>,
}

/// Everything `enumerate` knows about one attached device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub bus_number: u8,
    pub device_address: u8,
    pub port_number: u8,
    pub speed: Speed,
    pub device_class: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Manufacturer string, when the device could be opened to read it.
    pub manufacturer: Option<String>,
    /// Product string, when the device could be opened to read it.
    pub product: Option<String>,
    /// Serial number string, when the device could be opened to read it.
    pub serial_number: Option<String>,
    pub configurations: Vec<ConfigReport>,
}

/// Build a full report for one device.
///
/// Fails only if the device descriptor itself cannot be read; individual
/// configuration descriptors and string descriptors degrade gracefully.
pub(crate) fn describe(device: &Device<Context>) -> Result<DeviceReport, rusb::Error> {
    let descriptor = device.device_descriptor()?;

    let mut configurations = Vec::with_capacity(descriptor.num_configurations() as usize);
    for index in 0..descriptor.num_configurations() {
        let config = match device.config_descriptor(index) {
            Ok(config) => config,
            Err(e) => {
                debug!(
                    "skipping config descriptor {index} on bus={} addr={}: {e}",
                    device.bus_number(),
                    device.address()
                );
                continue;
            }
        };

        let mut interfaces = Vec::new();
        for interface in config.interfaces() {
            for alt in interface.descriptors() {
                let endpoints = alt
                    .endpoint_descriptors()
                    .map(|endpoint| EndpointReport {
                        address: endpoint.address(),
                        transfer_kind: map_transfer_kind(endpoint.transfer_type()),
                    })
                    .collect();

                interfaces.push(InterfaceReport {
                    interface_number: alt.interface_number(),
                    alt_setting: alt.setting_number(),
                    interface_class: alt.class_code(),
                    endpoints,
                });
            }
        }

        configurations.push(ConfigReport {
            configuration_value: config.number(),
            interfaces,
        });
    }

    let (manufacturer, product, serial_number) = read_strings(device, &descriptor);

    Ok(DeviceReport {
        bus_number: device.bus_number(),
        device_address: device.address(),
        port_number: device.port_number(),
        speed: map_speed(device.speed()),
        device_class: descriptor.class_code(),
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        manufacturer,
        product,
        serial_number,
        configurations,
    })
}

/// Best-effort string descriptors; requires opening the device, which may
/// fail for permission reasons.
fn read_strings(
    device: &Device<Context>,
    descriptor: &rusb::DeviceDescriptor,
) -> (Option<String>, Option<String>, Option<String>) {
    let handle = match device.open() {
        Ok(handle) => handle,
        Err(_) => return (None, None, None),
    };

    let manufacturer = descriptor
        .manufacturer_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
    let product = descriptor
        .product_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
    let serial_number = descriptor
        .serial_number_string_index()
        .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());

    (manufacturer, product, serial_number)
}

pub(crate) fn map_speed(speed: rusb::Speed) -> Speed {
    match speed {
        rusb::Speed::Low => Speed::Low,
        rusb::Speed::Full => Speed::Full,
        rusb::Speed::High => Speed::High,
        rusb::Speed::Super => Speed::Super,
        rusb::Speed::SuperPlus => Speed::SuperPlus,
        _ => Speed::Unknown,
    }
}

fn map_transfer_kind(kind: rusb::TransferType) -> TransferKind {
    match kind {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}
