//! Unified error type for usb2ble.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (behind the `defmt` feature) for efficient
//! on-target logging.

use core::fmt;

/// Top-level error type used across the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // USB host
    /// The wired transport reported a failure.
    Usb(UsbError),

    // BLE
    /// The BLE HID collaborator rejected an operation.
    Ble(BleError),

    // Registry
    /// All device slots are occupied.
    RegistryFull,

    // Settings / storage
    /// A settings record failed validation.
    Settings(SettingsError),

    /// Flash read/write/erase failed.
    Storage,
}

/// Failures of a single USB host operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbError {
    /// Device had no data (interrupt endpoint idle). Not a fault.
    Nak,
    /// Endpoint stalled the request.
    Stall,
    /// No handshake within the transfer timeout.
    Timeout,
    /// Any other host result code (toggle error, CRC, babble, ...).
    Transaction(u8),
    /// Nothing attached at the addressed port.
    NotConnected,
    /// Descriptor fetch or configuration failed.
    Enumeration,
}

/// Failures reported by the BLE HID collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleError {
    /// Notification queue full; try again next cycle.
    Busy,
    /// No central is connected (or notifications are not enabled).
    NotConnected,
    /// Raw error code from the BLE stack.
    Raw(u32),
}

/// Reasons a settings record is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SettingsError {
    /// Record is shorter than the fixed layout.
    Length,
    /// Record was written by an incompatible firmware.
    Version(u8),
    /// Stored checksum does not match the contents.
    Checksum,
    /// Device name is empty, too long, or not UTF-8.
    Name,
}

pub type Result<T> = core::result::Result<T, Error>;

// Convenience conversions

impl From<UsbError> for Error {
    fn from(e: UsbError) -> Self {
        Error::Usb(e)
    }
}

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Error::Ble(e)
    }
}

impl From<SettingsError> for Error {
    fn from(e: SettingsError) -> Self {
        Error::Settings(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Usb(e) => write!(f, "usb: {:?}", e),
            Error::Ble(e) => write!(f, "ble: {:?}", e),
            Error::RegistryFull => write!(f, "device registry full"),
            Error::Settings(e) => write!(f, "settings: {:?}", e),
            Error::Storage => write!(f, "flash storage failure"),
        }
    }
}
