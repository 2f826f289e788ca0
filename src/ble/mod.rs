//! Interface to the BLE HID peripheral collaborator.
//!
//! The collaborator owns the GATT server and the link; the bridge only
//! hands it canonical reports. Neither send queues anything: a `Busy`
//! answer means the report was not taken and the caller decides
//! whether to retry.

#[cfg(feature = "embedded")]
pub mod server;

use crate::error::BleError;
use crate::hid::{KeyboardReport, MouseReport};

pub trait BleHid {
    fn send_keyboard(&mut self, report: &KeyboardReport) -> Result<(), BleError>;

    fn send_mouse(&mut self, report: &MouseReport) -> Result<(), BleError>;

    /// Drop the current link (no-op when nothing is connected).
    fn disconnect(&mut self);

    /// Make the peripheral connectable again. `Err` means it is not
    /// connectable yet (advertising failed or has not restarted).
    fn reconnect(&mut self) -> Result<(), BleError>;
}

/// Link callbacks delivered to the bridge by the collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleLinkEvent {
    Connected,
    Disconnected,
    /// Keyboard LED output report written by the central.
    LedOutput(u8),
}
