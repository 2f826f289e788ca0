//! Canonical keyboard report (boot protocol compatible) and the decoder
//! for the report shapes wired keyboards actually send.
//!
//! Layout (8 bytes):
//! ```text
//! Byte 0: Modifier keys (bitfield)
//!         Bit 0 = Left Ctrl,  Bit 1 = Left Shift,
//!         Bit 2 = Left Alt,   Bit 3 = Left GUI,
//!         Bit 4 = Right Ctrl, Bit 5 = Right Shift,
//!         Bit 6 = Right Alt,  Bit 7 = Right GUI
//! Byte 1: Reserved (0x00)
//! Byte 2-7: Up to 6 simultaneous key codes (USB HID usage codes)
//! ```

use crate::config::{KEYBOARD_REPORT_ID, NKRO_KEY_OFFSET};

/// Keyboard report size in bytes.
pub const KEYBOARD_REPORT_SIZE: usize = 8;

/// Standard HID boot-protocol keyboard report.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyboardReport {
    /// Modifier key bitfield.
    pub modifier: u8,
    /// Reserved byte (copied through unchanged for 8-byte input).
    pub reserved: u8,
    /// Up to 6 simultaneously pressed key codes.
    pub keycodes: [u8; 6],
}

impl KeyboardReport {
    /// Create an empty (all-keys-released) report.
    pub const fn empty() -> Self {
        Self {
            modifier: 0,
            reserved: 0,
            keycodes: [0; 6],
        }
    }

    /// Interpret exactly 8 bytes as a boot-protocol report.
    pub const fn from_bytes(data: &[u8; KEYBOARD_REPORT_SIZE]) -> Self {
        Self {
            modifier: data[0],
            reserved: data[1],
            keycodes: [data[2], data[3], data[4], data[5], data[6], data[7]],
        }
    }

    /// Normalise a raw IN packet from a wired keyboard.
    ///
    /// * 8 bytes: already boot-shaped, copied verbatim.
    /// * more than 8 bytes: NKRO bitmap. Byte 0 is the modifier mask and
    ///   every set bit from byte 2 onward is a key. Bit `b` of byte `i`
    ///   maps to usage `(i - 2) * 8 + b + 4`. Usages 0..=3 and 255 and
    ///   above are discarded. Only the first six keys in scan order fit;
    ///   the rest are dropped.
    /// * anything shorter: released-everything report.
    pub fn decode(raw: &[u8]) -> Self {
        if let Ok(boot) = <&[u8; KEYBOARD_REPORT_SIZE]>::try_from(raw) {
            return Self::from_bytes(boot);
        }
        if raw.len() < KEYBOARD_REPORT_SIZE {
            return Self::empty();
        }

        let mut report = Self {
            modifier: raw[0],
            ..Self::empty()
        };
        let mut filled = 0;

        'scan: for (i, &byte) in raw.iter().enumerate().skip(2) {
            let base = (i - 2) * 8 + usize::from(NKRO_KEY_OFFSET);
            if base >= 255 {
                break;
            }
            if byte == 0 {
                continue;
            }
            for bit in 0..8usize {
                if byte & (1 << bit) == 0 {
                    continue;
                }
                let usage = base + bit;
                if usage <= 3 || usage >= 255 {
                    continue;
                }
                report.keycodes[filled] = usage as u8;
                filled += 1;
                if filled == report.keycodes.len() {
                    break 'scan;
                }
            }
        }

        report
    }

    pub fn to_bytes(&self) -> [u8; KEYBOARD_REPORT_SIZE] {
        let mut buf = [0u8; KEYBOARD_REPORT_SIZE];
        self.serialize(&mut buf);
        buf
    }

    /// Serialise into a byte slice for BLE notification.
    /// Returns the number of bytes written (0 if `buf` is too small).
    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        if buf.len() < KEYBOARD_REPORT_SIZE {
            return 0;
        }
        buf[0] = self.modifier;
        buf[1] = self.reserved;
        buf[2..8].copy_from_slice(&self.keycodes);
        KEYBOARD_REPORT_SIZE
    }

    /// Returns `true` if no keys are pressed (release event).
    pub fn is_empty(&self) -> bool {
        self.modifier == 0 && self.keycodes.iter().all(|&k| k == 0)
    }

    /// Names of the held modifiers, in bit order.
    pub fn modifier_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        MODIFIER_NAMES
            .iter()
            .enumerate()
            .filter(move |(bit, _)| self.modifier & (1 << bit) != 0)
            .map(|(_, name)| *name)
    }
}

const MODIFIER_NAMES: [&str; 8] = [
    "L-Ctrl", "L-Shift", "L-Alt", "L-Win", "R-Ctrl", "R-Shift", "R-Alt", "R-Win",
];

/// Keyboard LED bits written by the BLE host (output report).
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyboardLeds(pub u8);

impl KeyboardLeds {
    pub const NUM_LOCK: u8 = 0x01;
    pub const CAPS_LOCK: u8 = 0x02;
    pub const SCROLL_LOCK: u8 = 0x04;

    pub fn caps_lock(self) -> bool {
        self.0 & Self::CAPS_LOCK != 0
    }
}

// HID report descriptor for the BLE keyboard collection

/// Report map fragment for the keyboard (report ID 1):
///   - 8 modifier key bits (input)
///   - 1 reserved byte
///   - 5 LED indicators (output)
///   - 6 key code bytes (input)
pub const KEYBOARD_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, KEYBOARD_REPORT_ID, //   Report ID (1)
    //
    //   - Modifier keys (8 bits) -
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0xE0, //   Usage Minimum (Left Control)
    0x29, 0xE7, //   Usage Maximum (Right GUI)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    //
    //   - Reserved byte -
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant) - padding
    //
    //   - LED output (5 bits + 3 padding) -
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (Num Lock)
    0x29, 0x05, //   Usage Maximum (Kana)
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x01, //   Output (Constant) - padding
    //
    //   - Key codes (6 bytes) -
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0xFF, //   Usage Maximum (255)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x00, //   Input (Data, Array)
    //
    0xC0, // End Collection
];
