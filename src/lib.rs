//! usb2ble: wired USB keyboards and mice in, BLE HID out.
//!
//! Everything that decides *what* the adapter does lives here and builds
//! on the host. The transports are reached only through [`usb::UsbHost`]
//! and [`ble::BleHid`], so the bridge engine can be driven by mocks in
//! tests and by the MAX3421E / SoftDevice drivers on target.
//!
//! Usage: `cargo test --lib --tests` on the host,
//! `cargo run --release --features embedded` on the board.

#![cfg_attr(not(test), no_std)]

pub mod battery;
pub mod ble;
pub mod bridge;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod hid;
pub mod recovery;
pub mod registry;
pub mod settings;
#[cfg(feature = "embedded")]
pub mod storage;
pub mod usb;

pub use bridge::{Bridge, BridgeOptions, PollStatus};
pub use error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════
// Crate-level tests
// ═══════════════════════════════════════════════════════════════════════════
