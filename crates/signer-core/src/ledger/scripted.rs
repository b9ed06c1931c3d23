//! A scripted in-memory device.
//!
//! [`ScriptedDevice`] implements [`Transport`] by decoding the frames the
//! host writes back into APDUs and answering each complete command with
//! the next queued [`Reply`]. It records every command it receives, so
//! tests can assert on exactly what crossed the wire. [`ScriptedHub`]
//! exposes a set of scripted devices through the [`DeviceHub`] interface.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use ledger_signer_core::ledger::scripted::{Reply, ScriptedDevice};
//! use ledger_signer_core::ledger::{ApduCommand, ApduResponse, FrameCodec, Transport};
//!
//! let device = ScriptedDevice::new();
//! device.open().unwrap();
//! device.push(Reply::Respond(ApduResponse::status(0x6985)));
//!
//! let command = ApduCommand::new(0xB0, 0x01, 0x00, 0x00, vec![]).unwrap();
//! for frame in FrameCodec::default().encode_command(&command).unwrap() {
//!     device.write(&frame).unwrap();
//! }
//! assert_eq!(device.commands(), vec![command]);
//! assert!(device.read(Duration::from_secs(1)).is_ok());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::apdu::{ApduCommand, ApduResponse};
use super::framing::{Decoded, FrameCodec, Reassembler};
use super::{DeviceDescriptor, DeviceHub, LEDGER_VENDOR_ID, Transport};
use crate::error::{Error, Result};

/// How the device answers the next complete command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Answer immediately.
    Respond(ApduResponse),

    /// Answer after a delay, as a user pressing a button would.
    Delayed(Duration, ApduResponse),

    /// Answer with raw reports instead of a framed response.
    Raw(Vec<Vec<u8>>),

    /// Simulate a pulled cable: pending and later reads fail.
    Disconnect,

    /// Never answer.
    Hang,
}

#[derive(Debug)]
struct Inner {
    open: bool,
    lost: bool,
    held_elsewhere: bool,
    decoder: Reassembler,
    replies: VecDeque<Reply>,
    outbox: VecDeque<Vec<u8>>,
    delayed: Option<(Instant, Vec<Vec<u8>>)>,
    commands: Vec<ApduCommand>,
    reports_written: usize,
}

/// An in-memory device answering from a script.
pub struct ScriptedDevice {
    codec: FrameCodec,
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl fmt::Debug for ScriptedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ScriptedDevice")
            .field("open", &inner.open)
            .field("pending_replies", &inner.replies.len())
            .field("commands", &inner.commands.len())
            .finish_non_exhaustive()
    }
}

impl Default for ScriptedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDevice {
    /// Creates a device with the default frame format and an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(FrameCodec::default())
    }

    /// Creates a device speaking a custom frame format.
    #[must_use]
    pub fn with_codec(codec: FrameCodec) -> Self {
        Self {
            codec,
            inner: Mutex::new(Inner {
                open: false,
                lost: false,
                held_elsewhere: false,
                decoder: codec.decoder(),
                replies: VecDeque::new(),
                outbox: VecDeque::new(),
                delayed: None,
                commands: Vec::new(),
                reports_written: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Builds the body of an app-info response.
    #[must_use]
    pub fn app_info_payload(name: &str, version: &str) -> Vec<u8> {
        let mut payload = vec![0x01, name.len() as u8];
        payload.extend_from_slice(name.as_bytes());
        payload.push(version.len() as u8);
        payload.extend_from_slice(version.as_bytes());
        payload.extend_from_slice(&[0x01, 0x00]);
        payload
    }

    /// Queues a reply.
    pub fn push(&self, reply: Reply) {
        self.inner.lock().replies.push_back(reply);
    }

    /// Queues an immediate response.
    pub fn respond(&self, response: ApduResponse) {
        self.push(Reply::Respond(response));
    }

    /// Makes [`open`](Transport::open) fail with [`Error::DeviceBusy`], as
    /// when another process holds the device.
    pub fn set_held_elsewhere(&self, held: bool) {
        self.inner.lock().held_elsewhere = held;
    }

    /// Returns the commands received so far.
    #[must_use]
    pub fn commands(&self) -> Vec<ApduCommand> {
        self.inner.lock().commands.clone()
    }

    /// Returns the number of reports written by the host.
    #[must_use]
    pub fn reports_written(&self) -> usize {
        self.inner.lock().reports_written
    }

    /// Returns the number of replies not yet consumed.
    #[must_use]
    pub fn pending_replies(&self) -> usize {
        self.inner.lock().replies.len()
    }

    fn answer(&self, inner: &mut Inner) -> Result<()> {
        match inner.replies.pop_front() {
            Some(Reply::Respond(response)) => {
                inner.outbox.extend(self.codec.encode_response(&response)?);
            }
            Some(Reply::Delayed(delay, response)) => {
                let frames = self.codec.encode_response(&response)?;
                inner.delayed = Some((Instant::now() + delay, frames));
            }
            Some(Reply::Raw(reports)) => inner.outbox.extend(reports),
            Some(Reply::Disconnect) => inner.lost = true,
            Some(Reply::Hang) | None => {}
        }
        Ok(())
    }
}

impl Transport for ScriptedDevice {
    fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.held_elsewhere {
            return Err(Error::DeviceBusy);
        }
        inner.open = true;
        inner.lost = false;
        inner.decoder.reset();
        inner.outbox.clear();
        inner.delayed = None;
        Ok(())
    }

    fn close(&self) {
        self.inner.lock().open = false;
        self.ready.notify_all();
    }

    fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn write(&self, report: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.open || inner.lost {
            return Err(Error::TransportLost("device disconnected".to_string()));
        }
        inner.reports_written += 1;

        if let Decoded::Complete(command) = inner.decoder.push_command(report)? {
            trace!(ins = command.ins(), len = command.data().len(), "scripted device got command");
            inner.commands.push(command);
            self.answer(&mut inner)?;
            self.ready.notify_all();
        }
        Ok(())
    }

    fn read(&self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(Error::TransportLost("transport is closed".to_string()));
        }

        loop {
            if !inner.open {
                return Err(Error::Cancelled);
            }
            if inner.lost {
                return Err(Error::TransportLost("device disconnected".to_string()));
            }

            let now = Instant::now();
            if inner.delayed.as_ref().is_some_and(|(at, _)| *at <= now)
                && let Some((_, frames)) = inner.delayed.take()
            {
                inner.outbox.extend(frames);
            }
            if let Some(report) = inner.outbox.pop_front() {
                return Ok(report);
            }
            if now >= deadline {
                return Err(Error::Timeout(timeout.as_millis() as u64));
            }

            let wake = match &inner.delayed {
                Some((at, _)) => (*at).min(deadline),
                None => deadline,
            };
            self.ready.wait_until(&mut inner, wake);
        }
    }
}

/// A hub of scripted devices.
#[derive(Debug, Default)]
pub struct ScriptedHub {
    devices: Mutex<Vec<(DeviceDescriptor, Arc<ScriptedDevice>)>>,
}

impl ScriptedHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new Ledger device at `path` and returns it for scripting.
    pub fn attach(&self, path: &str) -> Arc<ScriptedDevice> {
        let device = Arc::new(ScriptedDevice::new());
        let descriptor = DeviceDescriptor {
            path: path.to_string(),
            vendor_id: LEDGER_VENDOR_ID,
            product_id: 0x1011,
            product: Some("Nano S".to_string()),
            serial: None,
        };
        self.devices.lock().push((descriptor, device.clone()));
        device
    }

    /// Detaches the device at `path`, closing any transport to it.
    pub fn detach(&self, path: &str) {
        self.devices.lock().retain(|(descriptor, device)| {
            if descriptor.path == path {
                device.push(Reply::Disconnect);
                device.close();
                false
            } else {
                true
            }
        });
    }
}

impl DeviceHub for ScriptedHub {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self
            .devices
            .lock()
            .iter()
            .map(|(descriptor, _)| descriptor.clone())
            .collect())
    }

    fn transport(&self, device: &DeviceDescriptor) -> Result<Arc<dyn Transport>> {
        self.devices
            .lock()
            .iter()
            .find(|(descriptor, _)| descriptor.path == device.path)
            .map(|(_, transport)| transport.clone() as Arc<dyn Transport>)
            .ok_or(Error::DeviceNotFound)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn send(device: &ScriptedDevice, command: &ApduCommand) {
        for frame in FrameCodec::default().encode_command(command).unwrap() {
            device.write(&frame).unwrap();
        }
    }

    fn receive(device: &ScriptedDevice, timeout: Duration) -> Result<ApduResponse> {
        let mut decoder = FrameCodec::default().decoder();
        loop {
            if let Decoded::Complete(response) = decoder.push_response(&device.read(timeout)?)? {
                return Ok(response);
            }
        }
    }

    #[test]
    fn answers_in_order() {
        let device = ScriptedDevice::new();
        device.open().unwrap();
        device.respond(ApduResponse::success(vec![1]));
        device.respond(ApduResponse::status(0x6985));

        let command = ApduCommand::new(0xE0, 0x02, 0, 0, vec![0; 100]).unwrap();
        send(&device, &command);
        assert_eq!(
            receive(&device, Duration::from_secs(1)).unwrap(),
            ApduResponse::success(vec![1])
        );
        send(&device, &command);
        assert_eq!(
            receive(&device, Duration::from_secs(1)).unwrap().status_word(),
            0x6985
        );

        assert_eq!(device.commands(), vec![command.clone(), command]);
        assert_eq!(device.reports_written(), 4);
    }

    #[test]
    fn times_out_without_reply() {
        let device = ScriptedDevice::new();
        device.open().unwrap();

        send(&device, &ApduCommand::new(0xB0, 0x01, 0, 0, vec![]).unwrap());
        assert!(matches!(
            device.read(Duration::from_millis(10)),
            Err(Error::Timeout(10))
        ));
    }

    #[test]
    fn delayed_reply_arrives() {
        let device = ScriptedDevice::new();
        device.open().unwrap();
        device.push(Reply::Delayed(
            Duration::from_millis(20),
            ApduResponse::success(vec![]),
        ));

        send(&device, &ApduCommand::new(0xB0, 0x01, 0, 0, vec![]).unwrap());
        assert!(receive(&device, Duration::from_secs(2)).unwrap().is_success());
    }

    #[test]
    fn close_cancels_pending_read() {
        let device = Arc::new(ScriptedDevice::new());
        device.open().unwrap();
        device.push(Reply::Hang);
        send(&device, &ApduCommand::new(0xE0, 0x04, 0x80, 0, vec![1]).unwrap());

        let closer = {
            let device = device.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                device.close();
            })
        };
        let result = device.read(Duration::from_secs(10));
        closer.join().unwrap();

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn disconnect_fails_reads_and_writes() {
        let device = ScriptedDevice::new();
        device.open().unwrap();
        device.push(Reply::Disconnect);

        let command = ApduCommand::new(0xB0, 0x01, 0, 0, vec![]).unwrap();
        send(&device, &command);
        assert!(matches!(
            device.read(Duration::from_secs(1)),
            Err(Error::TransportLost(_))
        ));
        assert!(device.write(&[0; 64]).is_err());

        device.open().unwrap();
        device.respond(ApduResponse::success(vec![]));
        send(&device, &command);
        assert!(receive(&device, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn held_elsewhere_is_busy() {
        let device = ScriptedDevice::new();
        device.set_held_elsewhere(true);
        assert!(matches!(device.open(), Err(Error::DeviceBusy)));
    }

    #[test]
    fn hub_lists_and_detaches() {
        let hub = ScriptedHub::new();
        hub.attach("a");
        hub.attach("b");

        let devices = hub.devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(DeviceDescriptor::is_ledger));
        assert!(hub.transport(&devices[0]).is_ok());

        hub.detach("a");
        assert_eq!(hub.devices().unwrap().len(), 1);
        assert!(matches!(hub.transport(&devices[0]), Err(Error::DeviceNotFound)));
    }
}
