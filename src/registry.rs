//! Fixed-capacity table of wired USB HID devices.
//!
//! Each slot remembers where the device lives (port), what it is, which
//! endpoint token to use for the next IN transaction and the last report
//! it produced. An empty slot is `None`; there is no "invalid but
//! populated" state.

use crate::config::MAX_USB_DEVICES;
use crate::endpoint::EndpointToken;
use crate::error::{Error, Result};
use heapless::Vec;

/// Largest report kept per slot (canonical keyboard size).
pub const LAST_REPORT_SIZE: usize = 8;

/// Device classes the bridge knows about. Numeric values match the
/// codes used in status dumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DeviceKind {
    Unknown = 0,
    Keyboard = 1,
    Mouse = 2,
    Gamepad = 3,
    OtherHid = 4,
}

impl DeviceKind {
    /// Kinds discovery searches for, in search order.
    pub const DISCOVERABLE: [DeviceKind; 2] = [DeviceKind::Keyboard, DeviceKind::Mouse];

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Keyboard,
            2 => Self::Mouse,
            3 => Self::Gamepad,
            4 => Self::OtherHid,
            _ => Self::Unknown,
        }
    }

    /// Name used in the registry status dump.
    pub fn name(self) -> &'static str {
        match self {
            Self::Keyboard => "KEYBOARD",
            Self::Mouse => "MOUSE",
            Self::Gamepad => "GAMEPAD",
            Self::OtherHid => "HID_OTHER",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Who owns the authoritative copy of a slot's endpoint token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointBinding {
    /// The host driver tracks this endpoint; toggles are written back to it.
    Driver,
    /// Non-standard endpoint the driver does not know about; only the
    /// registry copy exists and it is reset to DATA0 on re-enumeration.
    Forced,
}

/// One attached wired device.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsbDeviceSlot {
    /// Hub port or root index the device is reached through.
    pub port: u8,
    /// Interface the endpoint belongs to.
    pub interface: u8,
    pub kind: DeviceKind,
    pub endpoint: EndpointToken,
    pub binding: EndpointBinding,
    /// Last canonical report forwarded for this device.
    pub last_report: Vec<u8, LAST_REPORT_SIZE>,
    pub connected: bool,
}

impl UsbDeviceSlot {
    pub fn new(
        port: u8,
        interface: u8,
        kind: DeviceKind,
        endpoint: EndpointToken,
        binding: EndpointBinding,
    ) -> Self {
        Self {
            port,
            interface,
            kind,
            endpoint,
            binding,
            last_report: Vec::new(),
            connected: true,
        }
    }
}

pub struct DeviceRegistry {
    slots: [Option<UsbDeviceSlot>; MAX_USB_DEVICES],
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_USB_DEVICES],
        }
    }

    /// Place a device in the first free slot.
    ///
    /// Returns [`Error::RegistryFull`] when every slot is occupied; the
    /// caller retries on a later cycle once something is evicted.
    pub fn add(&mut self, slot: UsbDeviceSlot) -> Result<usize> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::RegistryFull)?;

        #[cfg(feature = "defmt")]
        defmt::info!(
            "registry: slot {} <- {} on port {} ep {}",
            index,
            slot.kind.name(),
            slot.port,
            slot.endpoint.address()
        );

        self.slots[index] = Some(slot);
        Ok(index)
    }

    /// Clear a slot. Out-of-range or already-empty indexes are ignored.
    pub fn remove(&mut self, index: usize) {
        if let Some(entry) = self.slots.get_mut(index) {
            if let Some(_slot) = entry.take() {
                #[cfg(feature = "defmt")]
                defmt::info!("registry: slot {} ({}) evicted", index, _slot.kind.name());
            }
        }
    }

    pub fn clear(&mut self) {
        for index in 0..MAX_USB_DEVICES {
            self.remove(index);
        }
    }

    pub fn get(&self, index: usize) -> Option<&UsbDeviceSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut UsbDeviceSlot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn find_by_type(&self, kind: DeviceKind) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.kind == kind))
    }

    /// Store the latest canonical report for a slot (truncated to 8 bytes).
    /// Ignored for empty or out-of-range indexes.
    pub fn update_report(&mut self, index: usize, bytes: &[u8]) {
        if let Some(slot) = self.get_mut(index) {
            let len = bytes.len().min(LAST_REPORT_SIZE);
            slot.last_report.clear();
            let _ = slot.last_report.extend_from_slice(&bytes[..len]);
        }
    }

    pub fn active_count(&self) -> u8 {
        self.slots.iter().filter(|s| s.is_some()).count() as u8
    }

    /// Indexes of occupied slots, in slot order.
    pub fn occupied(&self) -> Vec<usize, MAX_USB_DEVICES> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }

    /// Return every forced-endpoint token to DATA0.
    pub fn reset_forced_tokens(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            if slot.binding == EndpointBinding::Forced {
                slot.endpoint = slot.endpoint.with_toggle(false);
            }
        }
    }

    /// Dump the table to the log.
    pub fn log_status(&self) {
        #[cfg(feature = "defmt")]
        {
            defmt::info!("registry: {} active device(s)", self.active_count());
            for (i, slot) in self.slots.iter().enumerate() {
                if let Some(s) = slot {
                    defmt::info!(
                        "  [{}] port {} {} ep {} {}",
                        i,
                        s.port,
                        s.kind.name(),
                        s.endpoint.address(),
                        if s.endpoint.toggle_bit() { "DATA1" } else { "DATA0" }
                    );
                }
            }
        }
    }
}
