//! Bulk transfer gateway
//!
//! Thin blocking pass-through from a registry-tracked handle to the bulk
//! endpoint, with the two pieces of policy the registry itself does not
//! carry: normalizing stack error codes and clearing an endpoint stall so a
//! later transfer on the same endpoint is not permanently blocked.

use crate::error::TransferError;
use crate::registry::{DeviceRegistry, HandleId};
use std::time::Duration;
use tracing::{debug, warn};

/// Perform a blocking bulk transfer on a tracked handle.
///
/// The direction comes from bit 7 of `endpoint`: IN endpoints read into
/// `buffer`, OUT endpoints write from it. `timeout_ms == 0` means no
/// timeout. Blocks the calling thread only.
///
/// Returns the actual number of bytes moved. A timeout is not an error: it
/// is reported as a successful short count (the synchronous rusb binding
/// does not expose the partial count, so a timed-out transfer reports 0).
/// On an endpoint stall, the halt condition is cleared before
/// [`TransferError::Stall`] is returned. An untracked handle fails with
/// [`TransferError::UnknownHandle`] and no side effects.
pub fn bulk_transfer(
    registry: &mut DeviceRegistry,
    id: HandleId,
    endpoint: u8,
    buffer: &mut [u8],
    timeout_ms: u32,
) -> Result<usize, TransferError> {
    let handle = registry
        .open_handle_mut(id)
        .ok_or(TransferError::UnknownHandle)?;

    let is_in = (endpoint & 0x80) != 0;
    // libusb treats a zero timeout as "wait forever".
    let timeout = Duration::from_millis(u64::from(timeout_ms));

    debug!(
        "bulk transfer: {id:?} endpoint={endpoint:#04x} len={} timeout={timeout_ms}ms is_in={is_in}",
        buffer.len()
    );

    let result = if is_in {
        handle.read_bulk(endpoint, buffer, timeout)
    } else {
        handle.write_bulk(endpoint, buffer, timeout)
    };

    match result {
        Ok(len) => {
            debug!("bulk transfer moved {len} bytes on endpoint {endpoint:#04x}");
            Ok(len)
        }
        Err(rusb::Error::Timeout) => {
            debug!("bulk transfer on endpoint {endpoint:#04x} timed out");
            Ok(0)
        }
        Err(rusb::Error::Pipe) => {
            warn!("endpoint {endpoint:#04x} stalled, clearing halt");
            if let Err(e) = handle.clear_halt(endpoint) {
                warn!("failed to clear halt on endpoint {endpoint:#04x}: {e}");
            }
            Err(TransferError::Stall)
        }
        Err(e) => {
            warn!("bulk transfer on endpoint {endpoint:#04x} failed: {e}");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_endpoint_direction_bit() {
        // Bit 7 set means IN (device to host).
        assert!((0x81u8 & 0x80) != 0);
        assert!((0x87u8 & 0x80) != 0);
        // Bit 7 clear means OUT (host to device).
        assert!((0x01u8 & 0x80) == 0);
        assert!((0x07u8 & 0x80) == 0);
    }
}
