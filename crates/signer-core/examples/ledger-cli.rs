//! Ledger Signer CLI Example
//!
//! This example demonstrates how to use the Ledger signer library with the
//! native USB HID transport on macOS, Linux, and Windows.
//!
//! # Prerequisites
//!
//! - A Ledger Nano S (or compatible) unlocked with its PIN
//! - The Minter application installed (see `install`)
//! - On Linux, the Ledger udev rules for non-root access
//!
//! # Quick Start
//!
//! ```bash
//! cargo run --example ledger-cli -p ledger-signer-core --features hid -- devices
//! cargo run --example ledger-cli -p ledger-signer-core --features hid -- address
//! RUST_LOG=ledger_signer_core=debug \
//!   cargo run --example ledger-cli -p ledger-signer-core --features hid -- sign 0xf8...
//! ```
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `devices` | List attached Ledger devices |
//! | `info` | Show the running application and device state |
//! | `pubkey [path]` | Get the public key at a path |
//! | `address [path]` | Get the Minter address at a path |
//! | `sign <hex> [path]` | Sign a raw transaction |
//! | `open [name]` | Ask the dashboard to launch an application |
//! | `install <hex> <version> [icon]` | Install the application with `ledgerblue` |
//! | `uninstall` | Remove the application with `ledgerblue` |
//!
//! An optional `LEDGER_SIGNER_CONFIG` environment variable points to a TOML
//! configuration file.

#![expect(unused_crate_dependencies, reason = "needed for CLI example")]

use std::env;

use ledger_signer_core::installer::NANO_S_TARGET_ID;
use ledger_signer_core::ledger::{
    Curve, DerivationPath, DeviceHub, DeviceSession, HidHub, Signer, SigningRequest,
};
use ledger_signer_core::monitor::probe;
use ledger_signer_core::{Error, InstallParams, Installer, SignerConfig};
use tracing_subscriber::EnvFilter;

const DEFAULT_PATH: &str = "m/44'/60'/0'/0/0";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return;
    }

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return;
        }
    };

    match args[1].as_str() {
        "devices" => cmd_devices(),
        "info" => cmd_info(&config),
        "pubkey" => cmd_pubkey(&config, &args[2..]),
        "address" => cmd_address(&config, &args[2..]),
        "sign" => cmd_sign(&config, &args[2..]),
        "open" => cmd_open(&config, &args[2..]),
        "install" => cmd_install(&config, &args[2..]),
        "uninstall" => cmd_uninstall(&config),
        "--help" | "-h" | "help" => print_help(),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_help();
        }
    }
}

fn print_help() {
    println!(
        r#"Ledger Signer CLI

USAGE:
    ledger-cli <COMMAND>

COMMANDS:
    devices                      List attached Ledger devices
    info                         Show the running application and device state
    pubkey [path]                Get the public key (default {DEFAULT_PATH})
    address [path]               Get the Minter address (default {DEFAULT_PATH})
    sign <hex> [path]            Sign a raw transaction
    open [name]                  Launch an application from the dashboard
    install <hex> <ver> [icon]   Install the application (needs ledgerblue)
    uninstall                    Remove the application (needs ledgerblue)
    help                         Show this help message

EXAMPLES:
    cargo run --example ledger-cli --features hid -- devices
    cargo run --example ledger-cli --features hid -- address "m/44'/60'/0'/0/1"
    cargo run --example ledger-cli --features hid -- sign 0xf8a3...
"#
    );
}

fn load_config() -> ledger_signer_core::Result<SignerConfig> {
    match env::var("LEDGER_SIGNER_CONFIG") {
        Ok(path) => SignerConfig::load(path),
        Err(_) => Ok(SignerConfig::default()),
    }
}

fn report(e: &Error) {
    eprintln!("Error: {e}");
    if let Some(hint) = e.user_hint() {
        eprintln!("  {hint}");
    }
}

fn connect(config: &SignerConfig) -> Option<DeviceSession> {
    let hub = match HidHub::new() {
        Ok(hub) => hub.with_packet_size(config.packet_size),
        Err(e) => {
            report(&e);
            return None;
        }
    };

    match DeviceSession::connect(&hub, config.clone()) {
        Ok(session) => Some(session),
        Err(e) => {
            report(&e);
            None
        }
    }
}

fn parse_path(args: &[String]) -> Option<DerivationPath> {
    let raw = args.first().map_or(DEFAULT_PATH, String::as_str);
    match raw.parse() {
        Ok(path) => Some(path),
        Err(e) => {
            eprintln!("Invalid path {raw:?}: {e}");
            None
        }
    }
}

fn cmd_devices() {
    println!("Searching for Ledger devices...\n");

    let devices = HidHub::new().and_then(|hub| hub.devices());
    match devices {
        Ok(devices) if devices.is_empty() => {
            println!("No Ledger devices found.");
            println!("\nMake sure:");
            println!("  - Your Ledger is plugged in and unlocked");
            println!("  - On Linux, the Ledger udev rules are installed");
        }
        Ok(devices) => {
            println!("Found {} Ledger device(s):\n", devices.len());
            for (i, device) in devices.iter().enumerate() {
                println!(
                    "  [{}] {} ({:04x}:{:04x}) {}",
                    i + 1,
                    device.product.as_deref().unwrap_or("unknown"),
                    device.vendor_id,
                    device.product_id,
                    device.path
                );
            }
        }
        Err(e) => report(&e),
    }
}

fn cmd_info(config: &SignerConfig) {
    match HidHub::new() {
        Ok(hub) => {
            let hub = hub.with_packet_size(config.packet_size);
            println!("Device state: {}", probe(&hub, config));
        }
        Err(e) => {
            report(&e);
            return;
        }
    }

    let Some(session) = connect(config) else {
        return;
    };
    match session.app_info() {
        Ok(info) => {
            println!("Application: {} {}", info.name, info.version);
            if info.is_dashboard() {
                match session.target_info() {
                    Ok(target) => {
                        println!("Target id:   {:#010x}", target.target_id);
                        println!("OS version:  {}", target.os_version);
                    }
                    Err(e) => report(&e),
                }
            }
        }
        Err(e) => report(&e),
    }
}

fn cmd_pubkey(config: &SignerConfig, args: &[String]) {
    let Some(path) = parse_path(args) else {
        return;
    };
    let Some(session) = connect(config) else {
        return;
    };

    match session.public_key(&path, Curve::Secp256k1) {
        Ok(key) => {
            println!("Path: {path}");
            println!("Public Key (uncompressed):");
            println!("  {}", key.to_hex());
        }
        Err(e) => report(&e),
    }
}

fn cmd_address(config: &SignerConfig, args: &[String]) {
    let Some(path) = parse_path(args) else {
        return;
    };
    let Some(session) = connect(config) else {
        return;
    };

    match session.address(&path) {
        Ok((key, address)) => {
            println!("Path: {path}");
            println!("Public Key: {}", key.to_hex());
            println!();
            println!("Minter Address:");
            println!("  {address}");
        }
        Err(e) => report(&e),
    }
}

fn cmd_sign(config: &SignerConfig, args: &[String]) {
    let Some(raw) = args.first() else {
        eprintln!("Usage: sign <raw-transaction-hex> [path]");
        return;
    };
    let payload = match hex::decode(raw.strip_prefix("0x").unwrap_or(raw)) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Invalid hex: {e}");
            return;
        }
    };
    let Some(path) = parse_path(&args[1..]) else {
        return;
    };
    let Some(session) = connect(config) else {
        return;
    };

    println!("Signing {} bytes at {path}...", payload.len());
    println!("Review the transaction on your device.\n");

    let request = SigningRequest::new(path, payload, Curve::Secp256k1);
    match Signer::new(&session).sign(&request) {
        Ok(signature) => {
            println!("Signature:");
            println!("  r: 0x{}", hex::encode(signature.r()));
            println!("  s: 0x{}", hex::encode(signature.s()));
            if let Some(v) = signature.v() {
                println!("  v: {v}");
            }
            println!("  {}", signature.to_hex());
        }
        Err(e) => report(&e),
    }
}

fn cmd_open(config: &SignerConfig, args: &[String]) {
    let name = args.first().map_or(config.app.name.as_str(), String::as_str);
    let Some(session) = connect(config) else {
        return;
    };

    println!("Confirm launching {name} on your device...");
    match session.open_app(name) {
        Ok(()) => println!("{name} is running. Reconnect to use it."),
        Err(e) => report(&e),
    }
}

fn cmd_install(config: &SignerConfig, args: &[String]) {
    let [image, version, rest @ ..] = args else {
        eprintln!("Usage: install <app.hex> <version> [icon-hex]");
        return;
    };

    let mut params = InstallParams::new(config.app.name.clone(), version.clone(), image);
    if let Some(icon) = rest.first() {
        params = params.with_icon(icon.clone());
    }

    println!("Installing {} {}...", params.app_name, params.version);
    println!("Confirm the installation on your device.\n");
    match Installer::default().install(&params) {
        Ok(()) => println!("Installed."),
        Err(e) => report(&e),
    }
}

fn cmd_uninstall(config: &SignerConfig) {
    println!("Removing {}...", config.app.name);
    match Installer::default().uninstall(&config.app.name, NANO_S_TARGET_ID) {
        Ok(()) => println!("Removed."),
        Err(e) => report(&e),
    }
}
