//! Background device-state monitor.
//!
//! A wallet front end wants to know, continuously, whether it can talk to
//! the device: is one plugged in, may we open it, and is the right
//! application running. [`DeviceMonitor`] answers that by probing on a
//! dedicated thread every interval and sending a [`DeviceState`] whenever
//! the answer changes.
//!
//! Each probe opens a short-lived session, reads the application info and
//! closes it again. Pause the monitor while another session owns the device.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ledger_signer_core::SignerConfig;
//! use ledger_signer_core::ledger::scripted::ScriptedHub;
//! use ledger_signer_core::monitor::{DeviceMonitor, DeviceState};
//!
//! let hub = Arc::new(ScriptedHub::new());
//! let (monitor, states) =
//!     DeviceMonitor::spawn(hub, SignerConfig::default(), Duration::from_millis(10)).unwrap();
//!
//! assert_eq!(states.recv_timeout(Duration::from_secs(5)).unwrap(), DeviceState::Disconnected);
//! monitor.stop();
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::SignerConfig;
use crate::error::{Error, ErrorCategory, Result};
use crate::ledger::{DeviceHub, DeviceSession};

/// What the host can currently do with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceState {
    /// No device is attached.
    Disconnected,
    /// A device is attached but the expected application is not running.
    AppNotOpened,
    /// A device is attached but cannot be opened.
    PermissionError,
    /// The expected application is running.
    AppOpened,
}

impl DeviceState {
    /// Checks if signing and key requests can be sent.
    #[must_use]
    pub const fn can_interact(self) -> bool {
        matches!(self, Self::AppOpened)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Disconnected => "disconnected",
            Self::AppNotOpened => "application not opened",
            Self::PermissionError => "permission error",
            Self::AppOpened => "application opened",
        };
        f.write_str(text)
    }
}

/// Probes the device once.
#[must_use]
pub fn probe(hub: &dyn DeviceHub, config: &SignerConfig) -> DeviceState {
    let session = match DeviceSession::connect(hub, config.clone()) {
        Ok(session) => session,
        Err(Error::PermissionDenied(_) | Error::DeviceBusy) => return DeviceState::PermissionError,
        Err(_) => return DeviceState::Disconnected,
    };

    let state = match session.app_info() {
        Ok(info) if info.name == config.app.name => DeviceState::AppOpened,
        Ok(_) => DeviceState::AppNotOpened,
        Err(err) if err.category() == ErrorCategory::Device => DeviceState::AppNotOpened,
        Err(err) => {
            debug!(error = %err, "probe failed");
            DeviceState::Disconnected
        }
    };
    session.close();
    state
}

#[derive(Debug, Default)]
struct Control {
    paused: bool,
    stopped: bool,
}

#[derive(Debug, Default)]
struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
}

/// Polls the device on a background thread.
///
/// Dropping the monitor stops the thread and waits for it.
pub struct DeviceMonitor {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for DeviceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMonitor")
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

impl DeviceMonitor {
    /// Starts polling `hub` every `interval`.
    ///
    /// The first probe runs immediately, so the receiver always gets an
    /// initial state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the thread cannot be spawned.
    pub fn spawn(
        hub: Arc<dyn DeviceHub>,
        config: SignerConfig,
        interval: Duration,
    ) -> Result<(Self, Receiver<DeviceState>)> {
        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(Shared::default());

        let handle = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("ledger-monitor".into())
                .spawn(move || run(&shared, hub.as_ref(), &config, interval, &sender))?
        };
        info!(interval_ms = interval.as_millis() as u64, "device monitor started");

        Ok((
            Self {
                shared,
                handle: Some(handle),
            },
            receiver,
        ))
    }

    /// Skips probing until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.shared.control.lock().paused = true;
        debug!("device monitor paused");
    }

    /// Resumes probing and probes immediately.
    pub fn resume(&self) {
        self.shared.control.lock().paused = false;
        self.shared.wake.notify_all();
        debug!("device monitor resumed");
    }

    /// Checks if probing is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.control.lock().paused
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.control.lock().stopped = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!("device monitor stopped");
        }
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    shared: &Shared,
    hub: &dyn DeviceHub,
    config: &SignerConfig,
    interval: Duration,
    sender: &Sender<DeviceState>,
) {
    let mut last = None;

    loop {
        let paused = {
            let control = shared.control.lock();
            if control.stopped {
                return;
            }
            control.paused
        };

        if !paused {
            let state = probe(hub, config);
            if last != Some(state) {
                info!(%state, "device state changed");
                if sender.send(state).is_err() {
                    // Receiver gone.
                    return;
                }
                last = Some(state);
            }
        }

        let deadline = Instant::now() + interval;
        let mut control = shared.control.lock();
        while !control.stopped && Instant::now() < deadline {
            let resumed = control.paused;
            shared.wake.wait_until(&mut control, deadline);
            if resumed && !control.paused {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ApduResponse, Transport};
    use crate::ledger::scripted::{ScriptedDevice, ScriptedHub};

    fn fast_config() -> SignerConfig {
        SignerConfig {
            exchange_timeout_ms: 50,
            ..SignerConfig::default()
        }
    }

    #[test]
    fn probe_states() {
        let hub = ScriptedHub::new();
        assert_eq!(probe(&hub, &fast_config()), DeviceState::Disconnected);

        let device = hub.attach("scripted-0");
        device.respond(ApduResponse::success(ScriptedDevice::app_info_payload(
            "Minter", "1.0.0",
        )));
        assert_eq!(probe(&hub, &fast_config()), DeviceState::AppOpened);

        device.respond(ApduResponse::success(ScriptedDevice::app_info_payload(
            "BOLOS", "2.1.0",
        )));
        assert_eq!(probe(&hub, &fast_config()), DeviceState::AppNotOpened);

        device.respond(ApduResponse::status(0x6e00));
        assert_eq!(probe(&hub, &fast_config()), DeviceState::AppNotOpened);

        device.set_held_elsewhere(true);
        assert_eq!(probe(&hub, &fast_config()), DeviceState::PermissionError);
        assert!(!device.is_open());
    }

    #[test]
    fn only_interactive_when_app_opened() {
        assert!(DeviceState::AppOpened.can_interact());
        assert!(!DeviceState::AppNotOpened.can_interact());
        assert!(!DeviceState::PermissionError.can_interact());
        assert!(!DeviceState::Disconnected.can_interact());
    }

    #[test]
    fn monitor_reports_changes_only() {
        let hub = Arc::new(ScriptedHub::new());
        let (monitor, states) =
            DeviceMonitor::spawn(hub.clone(), fast_config(), Duration::from_millis(5)).unwrap();
        let timeout = Duration::from_secs(5);

        assert_eq!(states.recv_timeout(timeout).unwrap(), DeviceState::Disconnected);

        let device = hub.attach("scripted-0");
        for _ in 0..3 {
            device.respond(ApduResponse::success(ScriptedDevice::app_info_payload(
                "Minter", "1.0.0",
            )));
        }
        assert_eq!(states.recv_timeout(timeout).unwrap(), DeviceState::AppOpened);

        hub.detach("scripted-0");
        assert_eq!(states.recv_timeout(timeout).unwrap(), DeviceState::Disconnected);

        monitor.stop();
        assert!(states.recv().is_err());
    }

    #[test]
    fn paused_monitor_does_not_probe() {
        let hub = Arc::new(ScriptedHub::new());
        let device = hub.attach("scripted-0");
        let (monitor, states) =
            DeviceMonitor::spawn(hub, fast_config(), Duration::from_millis(5)).unwrap();

        // No reply queued: the first probe times out.
        assert_eq!(
            states.recv_timeout(Duration::from_secs(5)).unwrap(),
            DeviceState::Disconnected
        );
        monitor.pause();
        assert!(monitor.is_paused());
        thread::sleep(Duration::from_millis(100));
        let probes = device.commands().len();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(device.commands().len(), probes);

        device.respond(ApduResponse::success(ScriptedDevice::app_info_payload(
            "Minter", "1.0.0",
        )));
        monitor.resume();
        assert_eq!(
            states.recv_timeout(Duration::from_secs(5)).unwrap(),
            DeviceState::AppOpened
        );
    }
}
