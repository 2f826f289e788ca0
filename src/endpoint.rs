//! Endpoint number plus DATA0/DATA1 sequence bit, packed into one byte.
//!
//! ```text
//! Bit 7:    toggle expected on the *next* IN transaction (0 = DATA0, 1 = DATA1)
//! Bit 0-6:  endpoint number
//! ```
//!
//! The only legal mutation is [`EndpointToken::toggled`], applied once per
//! successful transaction.

const TOGGLE_BIT: u8 = 0x80;
const ADDRESS_MASK: u8 = 0x7F;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointToken(u8);

impl EndpointToken {
    /// Wrap a raw token byte as stored by the USB host driver.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Token for `endpoint` expecting DATA0. The direction bit of a USB
    /// endpoint address (0x80) is discarded, so 0x84 and 0x04 are the same.
    pub const fn new(endpoint: u8) -> Self {
        Self(endpoint & ADDRESS_MASK)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Endpoint number (bits 0-6).
    pub const fn address(self) -> u8 {
        self.0 & ADDRESS_MASK
    }

    /// `true` when the next transaction expects DATA1.
    pub const fn toggle_bit(self) -> bool {
        self.0 & TOGGLE_BIT != 0
    }

    /// Flip the sequence bit; the endpoint number is untouched.
    #[must_use]
    pub const fn toggled(self) -> Self {
        Self(self.0 ^ TOGGLE_BIT)
    }

    #[must_use]
    pub const fn with_toggle(self, data1: bool) -> Self {
        if data1 {
            Self(self.0 | TOGGLE_BIT)
        } else {
            Self(self.0 & ADDRESS_MASK)
        }
    }

    /// Endpoint 0 is the control pipe and never carries HID input.
    pub const fn is_valid(self) -> bool {
        self.address() != 0
    }
}
