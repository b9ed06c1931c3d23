//! Installer bridge for the device application.
//!
//! Installing or removing the on-device application is done by the vendor
//! loader (`ledgerblue`), run as a separate Python process. This module
//! only builds its command line, runs it, and turns the exit status into
//! a [`Result`].
//!
//! # Example
//!
//! ```
//! use ledger_signer_core::installer::InstallParams;
//!
//! let params = InstallParams::new("Minter", "1.0.0", "bin/app.hex")
//!     .with_icon("0100000000ffffff00");
//! let args = params.install_args();
//! assert!(args.windows(2).any(|w| w == ["--appName", "Minter"]));
//! ```

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ledger::Curve;

/// Target identifier of the Nano S.
pub const NANO_S_TARGET_ID: u32 = 0x3110_0004;

/// Default application flags.
pub const DEFAULT_APP_FLAGS: u32 = 0x40;

/// Parameters of an application install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallParams {
    /// Application name shown on the device.
    pub app_name: String,
    /// Application version.
    pub version: String,
    /// Application flags.
    pub flags: u32,
    /// Derivation path prefix the application may use.
    pub path_prefix: String,
    /// Curve the application derives keys on.
    pub curve: Curve,
    /// Target identifier of the device model.
    pub target_id: u32,
    /// Intel hex image of the application.
    pub image: PathBuf,
    /// Size of the application's data segment in bytes.
    pub data_size: u32,
    /// Icon bitmap as hex.
    pub icon: String,
    /// Removes an installed copy first.
    pub delete_existing: bool,
}

impl InstallParams {
    /// Creates parameters with the default flags, path prefix, curve and
    /// target.
    #[must_use]
    pub fn new(app_name: impl Into<String>, version: impl Into<String>, image: impl Into<PathBuf>) -> Self {
        Self {
            app_name: app_name.into(),
            version: version.into(),
            flags: DEFAULT_APP_FLAGS,
            path_prefix: "44'/60'".to_string(),
            curve: Curve::Secp256k1,
            target_id: NANO_S_TARGET_ID,
            image: image.into(),
            data_size: 0,
            icon: String::new(),
            delete_existing: true,
        }
    }

    /// Sets the icon bitmap.
    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    /// Sets the data segment size.
    #[must_use]
    pub const fn with_data_size(mut self, data_size: u32) -> Self {
        self.data_size = data_size;
        self
    }

    /// Sets the target identifier.
    #[must_use]
    pub const fn with_target_id(mut self, target_id: u32) -> Self {
        self.target_id = target_id;
        self
    }

    /// Arguments for `python` that install the application.
    #[must_use]
    pub fn install_args(&self) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            "ledgerblue.loadApp".to_string(),
            "--apdu".to_string(),
            "--appFlags".to_string(),
            format!("{:#x}", self.flags),
            "--path".to_string(),
            self.path_prefix.clone(),
            "--curve".to_string(),
            self.curve.loader_name().to_string(),
            "--tlv".to_string(),
            "--targetId".to_string(),
            format!("{:#x}", self.target_id),
        ];
        if self.delete_existing {
            args.push("--delete".to_string());
        }
        args.extend([
            "--fileName".to_string(),
            self.image.display().to_string(),
            "--appName".to_string(),
            self.app_name.clone(),
            "--appVersion".to_string(),
            self.version.clone(),
            "--dataSize".to_string(),
            self.data_size.to_string(),
        ]);
        if !self.icon.is_empty() {
            args.extend(["--icon".to_string(), self.icon.clone()]);
        }
        args
    }
}

/// Arguments for `python` that remove `app_name`.
#[must_use]
pub fn uninstall_args(app_name: &str, target_id: u32) -> Vec<String> {
    vec![
        "-m".to_string(),
        "ledgerblue.deleteApp".to_string(),
        "--targetId".to_string(),
        format!("{target_id:#x}"),
        "--appName".to_string(),
        app_name.to_string(),
    ]
}

/// Runs the vendor loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installer {
    python: PathBuf,
}

impl Default for Installer {
    fn default() -> Self {
        Self::new("python3")
    }
}

impl Installer {
    /// Creates an installer that runs the loader with `python`.
    #[must_use]
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    /// Installs the application. The device asks the user to confirm.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the loader cannot be started
    /// - [`Error::InstallerFailed`] if it exits unsuccessfully
    pub fn install(&self, params: &InstallParams) -> Result<()> {
        info!(app = %params.app_name, version = %params.version, "installing application");
        self.run(&params.install_args())
    }

    /// Removes the application.
    ///
    /// # Errors
    ///
    /// As [`install`](Self::install).
    pub fn uninstall(&self, app_name: &str, target_id: u32) -> Result<()> {
        info!(app = %app_name, "removing application");
        self.run(&uninstall_args(app_name, target_id))
    }

    fn run(&self, args: &[String]) -> Result<()> {
        debug!(python = %self.python.display(), ?args, "starting loader");
        let mut child = Command::new(&self.python)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child.stderr.take().map(|err| thread::spawn(move || forward(err)));
        let mut output = child.stdout.take().map(forward).unwrap_or_default();
        if let Some(stderr) = stderr {
            output.extend(stderr.join().unwrap_or_default());
        }

        let status = child.wait()?;
        if status.success() {
            info!("loader finished");
            Ok(())
        } else {
            warn!(status = ?status.code(), "loader failed");
            Err(Error::InstallerFailed {
                status: status.code(),
                output: output.join("\n"),
            })
        }
    }
}

/// Logs every line of `stream` and collects them.
fn forward(stream: impl Read) -> Vec<String> {
    BufReader::new(stream)
        .lines()
        .map_while(core::result::Result::ok)
        .inspect(|line| info!(target: "ledger_signer_core::installer::loader", "{line}"))
        .collect()
}
