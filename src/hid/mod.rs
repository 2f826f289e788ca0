//! HID report types and the USB→BLE translation layer.
//!
//! Raw IN packets from wired devices come in several vendor dialects;
//! everything that leaves towards the BLE link is one of the two
//! canonical shapes in [`CanonicalReport`].

pub mod keyboard;
pub mod mouse;


use crate::registry::DeviceKind;
pub use keyboard::{KeyboardLeds, KeyboardReport, KEYBOARD_REPORT_SIZE};
pub use mouse::{MouseReport, MOUSE_REPORT_SIZE};

/// A normalised report ready for the BLE collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanonicalReport {
    Keyboard(KeyboardReport),
    Mouse(MouseReport),
}

impl CanonicalReport {
    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        match self {
            CanonicalReport::Keyboard(k) => k.serialize(buf),
            CanonicalReport::Mouse(m) => m.serialize(buf),
        }
    }
}

pub fn decode_keyboard(raw: &[u8]) -> KeyboardReport {
    KeyboardReport::decode(raw)
}

pub fn decode_mouse(raw: &[u8]) -> MouseReport {
    MouseReport::decode(raw)
}

/// Translate a raw packet according to the device kind it came from.
/// Kinds the bridge does not forward yield `None`.
pub fn translate(kind: DeviceKind, raw: &[u8]) -> Option<CanonicalReport> {
    match kind {
        DeviceKind::Keyboard => Some(CanonicalReport::Keyboard(decode_keyboard(raw))),
        DeviceKind::Mouse => Some(CanonicalReport::Mouse(decode_mouse(raw))),
        DeviceKind::Gamepad | DeviceKind::OtherHid | DeviceKind::Unknown => {
            #[cfg(feature = "defmt")]
            defmt::warn!("no translation for {} report ({} bytes)", kind.name(), raw.len());
            None
        }
    }
}

const fn concat<const N: usize>(a: &[u8], b: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let mut i = 0;
    while i < a.len() {
        out[i] = a[i];
        i += 1;
    }
    let mut j = 0;
    while j < b.len() {
        out[i + j] = b[j];
        j += 1;
    }
    out
}

/// Length of [`REPORT_MAP`].
pub const REPORT_MAP_LEN: usize =
    keyboard::KEYBOARD_REPORT_DESCRIPTOR.len() + mouse::MOUSE_REPORT_DESCRIPTOR.len();

/// Complete report map served by the BLE HID service: keyboard
/// (report ID 1) followed by mouse (report ID 2).
pub const REPORT_MAP: [u8; REPORT_MAP_LEN] = concat(
    keyboard::KEYBOARD_REPORT_DESCRIPTOR,
    mouse::MOUSE_REPORT_DESCRIPTOR,
);
