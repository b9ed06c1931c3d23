//! USB HID transport for native Ledger communication.
//!
//! This module provides [`Transport`] and [`DeviceHub`] implementations on
//! top of `hidapi`, which works on macOS, Linux, and Windows.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use ledger_signer_core::SignerConfig;
//! use ledger_signer_core::ledger::{DeviceSession, HidHub};
//!
//! let hub = HidHub::new()?;
//! let session = DeviceSession::connect(&hub, SignerConfig::default())?;
//! println!("{}", session.app_info()?.name);
//! ```

use std::ffi::CString;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use hidapi::{HidApi, HidDevice, HidError};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::framing::DEFAULT_PACKET_SIZE;
use super::{DeviceDescriptor, DeviceHub, LEDGER_VENDOR_ID, Transport};
use crate::error::{Error, Result};

/// HID usage page of the Ledger APDU interface.
const LEDGER_USAGE_PAGE: u16 = 0xffa0;

/// Longest single blocking read; `close` is noticed between slices.
const READ_SLICE: Duration = Duration::from_millis(100);

/// Enumerates Ledger devices on the USB bus.
pub struct HidHub {
    api: Arc<Mutex<HidApi>>,
    packet_size: usize,
}

impl std::fmt::Debug for HidHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidHub")
            .field("packet_size", &self.packet_size)
            .finish_non_exhaustive()
    }
}

impl HidHub {
    /// Initializes the HID library.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportLost`] if the HID backend cannot start.
    pub fn new() -> Result<Self> {
        let api = HidApi::new().map_err(|e| lost("failed to initialize HID", &e))?;
        Ok(Self {
            api: Arc::new(Mutex::new(api)),
            packet_size: DEFAULT_PACKET_SIZE,
        })
    }

    /// Sets the report size of the transports this hub creates.
    #[must_use]
    pub const fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }
}

impl DeviceHub for HidHub {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut api = self.api.lock();
        api.refresh_devices()
            .map_err(|e| lost("failed to enumerate HID devices", &e))?;

        Ok(api
            .device_list()
            .filter(|info| info.vendor_id() == LEDGER_VENDOR_ID)
            .filter(|info| info.usage_page() == LEDGER_USAGE_PAGE || info.interface_number() == 0)
            .map(|info| DeviceDescriptor {
                path: info.path().to_string_lossy().into_owned(),
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                product: info.product_string().map(str::to_owned),
                serial: info.serial_number().map(str::to_owned),
            })
            .collect())
    }

    fn transport(&self, device: &DeviceDescriptor) -> Result<Arc<dyn Transport>> {
        let path = CString::new(device.path.as_bytes())
            .map_err(|_| Error::DeviceNotFound)?;
        Ok(Arc::new(HidTransport {
            api: self.api.clone(),
            path,
            packet_size: self.packet_size,
            device: Mutex::new(None),
            closed: AtomicBool::new(true),
        }))
    }
}

/// A HID link to one Ledger device.
pub struct HidTransport {
    api: Arc<Mutex<HidApi>>,
    path: CString,
    packet_size: usize,
    device: Mutex<Option<HidDevice>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for HidTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidTransport")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Transport for HidTransport {
    /// Opens the device.
    ///
    /// `hidapi` reports every open failure as text, so the error is
    /// classified by its message: exclusive access held by another process
    /// becomes [`Error::DeviceBusy`], anything else
    /// [`Error::PermissionDenied`].
    fn open(&self) -> Result<()> {
        let device = self
            .api
            .lock()
            .open_path(&self.path)
            .map_err(|e| open_error(&e.to_string()))?;
        *self.device.lock() = Some(device);
        self.closed.store(false, Ordering::SeqCst);
        debug!(path = ?self.path, "HID device opened");
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.device.lock().take().is_some() {
            debug!(path = ?self.path, "HID device closed");
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn write(&self, report: &[u8]) -> Result<()> {
        let guard = self.device.lock();
        let device = guard
            .as_ref()
            .ok_or_else(|| Error::TransportLost("transport is closed".to_string()))?;

        // Report id 0 precedes every report on the wire.
        let mut buf = Vec::with_capacity(report.len() + 1);
        buf.push(0x00);
        buf.extend_from_slice(report);
        device
            .write(&buf)
            .map_err(|e| lost("HID write failed", &e))?;
        trace!(len = report.len(), "HID report written");
        Ok(())
    }

    fn read(&self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; self.packet_size];

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(timeout.as_millis() as u64));
            }
            let slice = remaining.min(READ_SLICE);

            let read = {
                let guard = self.device.lock();
                let Some(device) = guard.as_ref() else {
                    return Err(Error::Cancelled);
                };
                device
                    .read_timeout(&mut buf, i32::try_from(slice.as_millis()).unwrap_or(i32::MAX))
                    .map_err(|e| lost("HID read failed", &e))?
            };

            if read > 0 {
                trace!(len = read, "HID report read");
                buf.truncate(read);
                return Ok(buf);
            }
        }
    }
}

fn lost(context: &str, err: &HidError) -> Error {
    Error::TransportLost(format!("{context}: {err}"))
}

/// Classifies an `open_path` failure message.
fn open_error(message: &str) -> Error {
    const HELD_ELSEWHERE: [&str; 4] = ["busy", "exclusive", "in use", "sharing violation"];

    let lower = message.to_lowercase();
    if HELD_ELSEWHERE.iter().any(|needle| lower.contains(needle)) {
        debug!(%message, "HID device held by another process");
        Error::DeviceBusy
    } else {
        Error::PermissionDenied(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_error_classification() {
        assert!(matches!(
            open_error("hidapi error: Device or resource busy"),
            Error::DeviceBusy
        ));
        assert!(matches!(
            open_error("IOHIDDeviceOpen failed: (0xE00002C5) exclusive access and device already open"),
            Error::DeviceBusy
        ));
        assert!(matches!(
            open_error("The process cannot access the file because it is being used by another process. Sharing violation"),
            Error::DeviceBusy
        ));
        assert!(matches!(
            open_error("Failed opening hid device: Permission denied"),
            Error::PermissionDenied(ref m) if m.contains("Permission denied")
        ));
    }
}

