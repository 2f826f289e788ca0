//! Canonical mouse report and the length-keyed decoder for the mouse
//! dialects found on wired devices.
//!
//! Layout (4 bytes):
//! ```text
//! Byte 0: Button bitfield
//!         Bit 0 = Left, Bit 1 = Right, Bit 2 = Middle
//! Byte 1: X displacement (signed, -127..127)
//! Byte 2: Y displacement (signed, -127..127)
//! Byte 3: Scroll wheel  (signed, -127..127)
//! ```

use crate::config::MOUSE_REPORT_ID;

/// Mouse report size in bytes.
pub const MOUSE_REPORT_SIZE: usize = 4;

/// Highest leading byte at length 4 that is read as a report ID rather
/// than a button mask.
const MAX_PREFIX_REPORT_ID: u8 = 5;

/// Standard HID boot-protocol mouse report.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MouseReport {
    /// Button bitfield (bit 0 = left, bit 1 = right, bit 2 = middle).
    pub buttons: u8,
    /// Relative X movement (signed).
    pub x: i8,
    /// Relative Y movement (signed).
    pub y: i8,
    /// Scroll wheel delta (signed).
    pub wheel: i8,
}

impl MouseReport {
    /// Create an idle (no movement, no buttons) report.
    pub const fn empty() -> Self {
        Self {
            buttons: 0,
            x: 0,
            y: 0,
            wheel: 0,
        }
    }

    const fn from_fields(buttons: u8, x: u8, y: u8, wheel: u8) -> Self {
        Self {
            buttons,
            x: x as i8,
            y: y as i8,
            wheel: wheel as i8,
        }
    }

    /// Normalise a raw IN packet from a wired mouse.
    ///
    /// Dispatch is purely on length:
    ///
    /// | len | mapping                                                   |
    /// |-----|-----------------------------------------------------------|
    /// | 3   | `raw[0..3]` = buttons, x, y; wheel 0                       |
    /// | 4   | `raw[0] <= 5`: report ID + `raw[1..4]`, wheel 0; else `raw[0..4]` |
    /// | 5   | report ID + `raw[1..5]`                                    |
    /// | 7+  | buttons `raw[1]`, x `raw[2]`, y `raw[4]`, wheel `raw[6]`  |
    /// | -   | idle report                                               |
    pub fn decode(raw: &[u8]) -> Self {
        match *raw {
            [b, x, y] => Self::from_fields(b, x, y, 0),
            [id, b, x, y] if id <= MAX_PREFIX_REPORT_ID => Self::from_fields(b, x, y, 0),
            [b, x, y, w] => Self::from_fields(b, x, y, w),
            [_, b, x, y, w] => Self::from_fields(b, x, y, w),
            [_, b, x, _, y, _, w, ..] => Self::from_fields(b, x, y, w),
            _ => Self::empty(),
        }
    }

    pub fn to_bytes(&self) -> [u8; MOUSE_REPORT_SIZE] {
        [self.buttons, self.x as u8, self.y as u8, self.wheel as u8]
    }

    /// Serialise into a byte slice for BLE notification.
    /// Returns the number of bytes written (0 if `buf` is too small).
    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        if buf.len() < MOUSE_REPORT_SIZE {
            return 0;
        }
        buf[..MOUSE_REPORT_SIZE].copy_from_slice(&self.to_bytes());
        MOUSE_REPORT_SIZE
    }

    /// Returns `true` when no buttons are pressed and there is no movement.
    pub fn is_idle(&self) -> bool {
        self.buttons == 0 && self.x == 0 && self.y == 0 && self.wheel == 0
    }
}

// HID report descriptor for the BLE mouse collection

/// Report map fragment for a 3-button mouse with scroll wheel (report ID 2).
pub const MOUSE_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x85, MOUSE_REPORT_ID, //   Report ID (2)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    //
    //   - Buttons (3 bits + 5 padding) -
    0x05, 0x09, //     Usage Page (Buttons)
    0x19, 0x01, //     Usage Minimum (Button 1)
    0x29, 0x03, //     Usage Maximum (Button 3)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x03, //     Report Count (3)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Variable, Absolute)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x05, //     Report Size (5)
    0x81, 0x01, //     Input (Constant) - padding
    //
    //   - X, Y displacement -
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x02, //     Report Count (2)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    //
    //   - Scroll wheel -
    0x09, 0x38, //     Usage (Wheel)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x01, //     Report Count (1)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    //
    0xC0, //   End Collection (Physical)
    0xC0, // End Collection (Application)
];
