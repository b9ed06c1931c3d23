//! End-to-end signing flows against a scripted device.
//!
//! Every test drives the public API only: a session over a
//! [`ScriptedDevice`], the signer, and the errors they surface.

// Silence unused crate dependency warnings for test binary
use alloy_primitives as _;
use ed25519_dalek as _;
use hex as _;
#[cfg(feature = "hid")]
use hidapi as _;
use k256 as _;
use p256 as _;
use parking_lot as _;
use semver as _;
use serde as _;
use serde_json as _;
use thiserror as _;
use toml as _;
use tracing as _;
use tracing_subscriber as _;
use tracing_test as _;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ledger_signer_core::ledger::scripted::{Reply, ScriptedDevice, ScriptedHub};
use ledger_signer_core::ledger::{
    ApduResponse, Curve, DerivationPath, DeviceSession, FrameCodec, OperationKind, SessionState,
    Signer, SigningRequest,
};
use ledger_signer_core::{Error, ErrorCategory, SignerConfig};
use proptest::prelude::*;

fn signature_bytes() -> Vec<u8> {
    let mut bytes = vec![0x11; 32];
    bytes.extend_from_slice(&[0x22; 32]);
    bytes
}

fn minter() -> ApduResponse {
    ApduResponse::success(ScriptedDevice::app_info_payload("Minter", "1.0.0"))
}

fn ack() -> ApduResponse {
    ApduResponse::success(vec![])
}

fn request(len: usize) -> SigningRequest {
    SigningRequest::new(
        "m/44'/60'".parse().unwrap(),
        (0..len).map(|i| (i % 251) as u8).collect(),
        Curve::Secp256k1,
    )
}

fn config(chunk_size: usize) -> SignerConfig {
    SignerConfig {
        chunk_size,
        exchange_timeout_ms: 500,
        approval_timeout_ms: 5_000,
        ..SignerConfig::default()
    }
}

/// Length of the encoded `m/44'/60'` path plus the curve byte.
const PREFIX_LEN: usize = 10;

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn two_hundred_bytes_in_sixty_four_byte_chunks() {
    let device = Arc::new(ScriptedDevice::new());
    device.respond(minter());
    for _ in 0..3 {
        device.respond(ack());
    }
    device.respond(ApduResponse::success(signature_bytes()));
    let session = DeviceSession::new(device.clone(), config(64)).unwrap();

    let signature = Signer::new(&session).sign(&request(200)).unwrap();
    assert_eq!(signature.to_bytes(), signature_bytes());
    assert_eq!(signature.v(), None);

    let sent = device.commands();
    let sign: Vec<_> = sent.iter().filter(|c| c.ins() == 0x04).collect();
    assert_eq!(sign.len(), 4);
    assert_eq!(sign[0].p1(), 0x00);
    assert_eq!(&sign[0].data()[..9], &[0x02, 0x80, 0, 0, 44, 0x80, 0, 0, 60]);
    assert_eq!(sign[0].data()[9], 0x00);
    assert_eq!(sign[0].data().len(), PREFIX_LEN + 64);

    let lengths: Vec<usize> = sign[1..].iter().map(|c| c.data().len()).collect();
    assert_eq!(lengths, [64, 64, 8]);
    assert!(sign[1..].iter().all(|c| c.p1() == 0x80));

    let streamed: Vec<u8> = sign[0].data()[PREFIX_LEN..]
        .iter()
        .copied()
        .chain(sign[1..].iter().flat_map(|c| c.data().to_vec()))
        .collect();
    assert_eq!(streamed, request(200).payload);
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn payload_within_one_chunk_waits_for_approval() {
    let device = Arc::new(ScriptedDevice::new());
    device.respond(minter());
    device.push(Reply::Delayed(
        Duration::from_millis(200),
        ApduResponse::success(signature_bytes()),
    ));
    let session = DeviceSession::new(
        device.clone(),
        SignerConfig {
            chunk_size: 64,
            exchange_timeout_ms: 50,
            approval_timeout_ms: 5_000,
            ..SignerConfig::default()
        },
    )
    .unwrap();

    let signature = Signer::new(&session).sign(&request(64)).unwrap();
    assert_eq!(signature.to_bytes(), signature_bytes());

    let sign: Vec<_> = device.commands().into_iter().filter(|c| c.ins() == 0x04).collect();
    assert_eq!(sign.len(), 1);
    assert_eq!(sign[0].p1(), 0x00);
    assert_eq!(&sign[0].data()[PREFIX_LEN..], request(64).payload.as_slice());
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn recoverable_signature_keeps_parity() {
    let device = Arc::new(ScriptedDevice::new());
    device.respond(minter());
    let mut bytes = signature_bytes();
    bytes.push(1);
    device.respond(ApduResponse::success(bytes.clone()));
    let session = DeviceSession::new(device, config(255)).unwrap();

    let signature = Signer::new(&session).sign(&request(32)).unwrap();
    assert_eq!(signature.v(), Some(1));
    assert_eq!(signature.to_bytes(), bytes);
}

#[test]
fn rejection_on_device() {
    let device = Arc::new(ScriptedDevice::new());
    device.respond(minter());
    device.respond(ApduResponse::status(0x6985));
    let session = DeviceSession::new(device, config(255)).unwrap();

    let err = Signer::new(&session).sign(&request(32)).unwrap_err();
    assert!(matches!(err, Error::UserRejected));
    assert_eq!(err.category(), ErrorCategory::Device);
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn transport_loss_requires_reconnect() {
    let device = Arc::new(ScriptedDevice::new());
    device.respond(minter());
    device.push(Reply::Disconnect);
    let session = DeviceSession::new(device.clone(), config(255)).unwrap();

    let err = Signer::new(&session).sign(&request(32)).unwrap_err();
    assert!(matches!(err, Error::TransportLost(_)));
    assert_eq!(session.state(), SessionState::Disconnected);

    let written = device.reports_written();
    assert!(matches!(session.app_info(), Err(Error::SessionNotReady)));
    assert!(matches!(
        Signer::new(&session).sign(&request(32)),
        Err(Error::SessionNotReady)
    ));
    assert_eq!(device.reports_written(), written);

    session.reconnect().unwrap();
    device.respond(minter());
    assert_eq!(session.app_info().unwrap().name, "Minter");
}

#[test]
fn timeout_disconnects() {
    let device = Arc::new(ScriptedDevice::new());
    device.push(Reply::Hang);
    let session = DeviceSession::new(
        device,
        SignerConfig {
            exchange_timeout_ms: 20,
            ..SignerConfig::default()
        },
    )
    .unwrap();

    assert!(matches!(session.app_info(), Err(Error::Timeout(_))));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn concurrent_sign_is_rejected() {
    let device = Arc::new(ScriptedDevice::new());
    device.respond(minter());
    device.push(Reply::Delayed(
        Duration::from_millis(200),
        ApduResponse::success(signature_bytes()),
    ));
    let session = DeviceSession::new(device, config(255)).unwrap();

    thread::scope(|scope| {
        let first = scope.spawn(|| Signer::new(&session).sign(&request(32)));

        wait_for(|| session.state() == SessionState::Busy(OperationKind::Sign));
        let second = Signer::new(&session).sign(&request(32));
        assert!(matches!(second, Err(Error::DeviceBusy)));

        let signature = first.join().unwrap().unwrap();
        assert_eq!(signature.to_bytes(), signature_bytes());
    });
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn wrong_application_is_distinct() {
    let device = Arc::new(ScriptedDevice::new());
    device.respond(ApduResponse::success(ScriptedDevice::app_info_payload(
        "BOLOS", "2.1.0",
    )));
    let session = DeviceSession::new(device.clone(), config(255)).unwrap();

    let err = Signer::new(&session).sign(&request(32)).unwrap_err();
    assert!(matches!(err, Error::WrongApplication { .. }));
    assert!(err.user_hint().is_some());
    assert_eq!(device.commands().len(), 1);
}

#[test]
fn old_application_is_incompatible() {
    let device = Arc::new(ScriptedDevice::new());
    device.respond(ApduResponse::success(ScriptedDevice::app_info_payload(
        "Minter", "0.0.3",
    )));
    let session = DeviceSession::new(device.clone(), config(255)).unwrap();

    let err = Signer::new(&session).sign(&request(32)).unwrap_err();
    assert!(matches!(err, Error::IncompatibleApp { .. }));
    assert_eq!(device.commands().len(), 1);
}

#[test]
fn validation_errors_never_reach_the_device() {
    let device = Arc::new(ScriptedDevice::new());
    let session = DeviceSession::new(device.clone(), config(255)).unwrap();
    let signer = Signer::new(&session);

    let empty = SigningRequest::new("m/44'/60'".parse().unwrap(), vec![], Curve::Secp256k1);
    assert!(matches!(signer.sign(&empty), Err(Error::EmptyPayload)));

    let no_path = SigningRequest::new(DerivationPath::default(), vec![1, 2, 3], Curve::Secp256k1);
    assert!(matches!(signer.sign(&no_path), Err(Error::InvalidPath(_))));

    let deep: DerivationPath = "m/0/1/2/3/4/5/6/7/8/9/10".parse().unwrap();
    let too_deep = SigningRequest::new(deep, vec![1, 2, 3], Curve::Secp256k1);
    assert!(matches!(signer.sign(&too_deep), Err(Error::InvalidPath(_))));

    assert_eq!(device.reports_written(), 0);
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn close_cancels_approval_wait() {
    let device = Arc::new(ScriptedDevice::new());
    device.respond(minter());
    device.push(Reply::Hang);
    let session = DeviceSession::new(
        device.clone(),
        SignerConfig {
            approval_timeout_ms: 30_000,
            ..SignerConfig::default()
        },
    )
    .unwrap();

    thread::scope(|scope| {
        let signing = scope.spawn(|| Signer::new(&session).sign(&request(32)));

        wait_for(|| device.commands().len() == 2);
        thread::sleep(Duration::from_millis(20));
        session.close();

        let started = Instant::now();
        let err = signing.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled | Error::TransportLost(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    });
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn connect_through_hub() {
    let hub = ScriptedHub::new();
    assert!(matches!(
        DeviceSession::connect(&hub, config(255)),
        Err(Error::DeviceNotFound)
    ));

    let device = hub.attach("usb-1");
    device.set_held_elsewhere(true);
    assert!(matches!(
        DeviceSession::connect(&hub, config(255)),
        Err(Error::DeviceBusy)
    ));

    device.set_held_elsewhere(false);
    let session = DeviceSession::connect(&hub, config(255)).unwrap();
    assert_eq!(session.descriptor().map(|d| d.path.as_str()), Some("usb-1"));
    assert_eq!(session.state(), SessionState::Connected);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn frame_count_law(k in 0usize..20, extra in 0usize..2) {
        let codec = FrameCodec::default();
        let first = codec.first_frame_capacity();
        let next = codec.continuation_capacity();
        let len = if k == 0 { extra } else { first + (k - 1) * next + extra };
        let frames = codec.encode(&vec![0xAA; len]).unwrap();

        let expected = if k == 0 { 1 } else { k + extra };
        prop_assert_eq!(frames.len(), expected);
        prop_assert_eq!(frames.len(), codec.frame_count(len));
        prop_assert!(frames.iter().all(|f| f.len() == codec.packet_size()));
    }

    #[test]
    fn streamed_payload_matches_request(len in 1usize..600, chunk in 1usize..=255) {
        let device = Arc::new(ScriptedDevice::new());
        let session = DeviceSession::new(device.clone(), config(chunk)).unwrap();
        let signer = Signer::new(&session);
        let apdus = signer.apdu_count(len);

        device.respond(minter());
        for _ in 0..apdus - 1 {
            device.respond(ack());
        }
        device.respond(ApduResponse::success(signature_bytes()));

        let request = request(len);
        signer.sign(&request).unwrap();

        let sign: Vec<_> = device.commands().into_iter().filter(|c| c.ins() == 0x04).collect();
        prop_assert_eq!(sign.len(), apdus);
        prop_assert_eq!(sign[0].p1(), 0x00);
        prop_assert!(sign[0].data().len() <= PREFIX_LEN + chunk);
        prop_assert!(sign[1..].iter().all(|c| c.p1() == 0x80 && c.data().len() <= chunk));
        let streamed: Vec<u8> = sign[0].data()[PREFIX_LEN..]
            .iter()
            .copied()
            .chain(sign[1..].iter().flat_map(|c| c.data().to_vec()))
            .collect();
        prop_assert_eq!(streamed, request.payload);
    }
}
