//! Persisted user settings.
//!
//! The record is a fixed 64-byte image so it can be exported, imported
//! and written to flash without `alloc`:
//!
//! ```text
//!  0      version (0x01)
//!  1      checksum: !(wrapping sum of every other byte)
//!  2..8   battery low / critical / full, mV, little endian
//!  8..18  battery calibration bytes
//! 18..26  connection min / max interval, latency, supervision timeout (u16 LE)
//! 26      device name length
//! 27..58  device name, UTF-8, zero padded
//! 58      debug: bits 0..=2 level, bit 3 BLE log, bit 4 USB log
//! 59..62  LED mode, blink interval (10 ms units), brightness (%)
//! 62      forced mouse endpoint, 0 = none
//! 63      watchdog feed policy
//! ```

use crate::error::SettingsError;
use crate::recovery::watchdog::FeedPolicy;
use heapless::String;

pub const SETTINGS_VERSION: u8 = 0x01;
pub const SETTINGS_RECORD_SIZE: usize = 64;
pub const DEVICE_NAME_MAX_LEN: usize = 31;
pub const DEFAULT_DEVICE_NAME: &str = "ENJOU BLE Adapter";

const CHECKSUM_OFFSET: usize = 1;
const NAME_LEN_OFFSET: usize = 26;
const NAME_OFFSET: usize = 27;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatterySettings {
    pub low_mv: u16,
    pub critical_mv: u16,
    pub full_mv: u16,
    pub calibration: [u8; 10],
}

impl Default for BatterySettings {
    fn default() -> Self {
        Self {
            low_mv: 3300,
            critical_mv: 3000,
            full_mv: 4200,
            calibration: [0; 10],
        }
    }
}

/// BLE connection parameters in SoftDevice units (1.25 ms intervals,
/// 10 ms supervision timeout).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionSettings {
    pub min_interval: u16,
    pub max_interval: u16,
    pub slave_latency: u16,
    pub supervision_timeout: u16,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            min_interval: 6,
            max_interval: 32,
            slave_latency: 0,
            supervision_timeout: 500,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DebugSettings {
    /// 0 = off .. 4 = verbose.
    pub level: u8,
    pub ble_log: bool,
    pub usb_log: bool,
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            level: 2,
            ble_log: true,
            usb_log: true,
        }
    }
}

impl DebugSettings {
    pub const MAX_LEVEL: u8 = 4;

    fn to_byte(self) -> u8 {
        (self.level.min(Self::MAX_LEVEL) & 0x07)
            | (u8::from(self.ble_log) << 3)
            | (u8::from(self.usb_log) << 4)
    }

    fn from_byte(byte: u8) -> Self {
        Self {
            level: (byte & 0x07).min(Self::MAX_LEVEL),
            ble_log: byte & 0x08 != 0,
            usb_log: byte & 0x10 != 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedMode {
    Off,
    On,
    #[default]
    Blink,
    Breathe,
}

impl LedMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Off,
            1 => Self::On,
            3 => Self::Breathe,
            _ => Self::Blink,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
            Self::Blink => 2,
            Self::Breathe => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LedSettings {
    pub mode: LedMode,
    /// Blink half-period in 10 ms units.
    pub blink_interval: u8,
    /// 0..=100 %.
    pub brightness: u8,
}

impl Default for LedSettings {
    fn default() -> Self {
        Self {
            mode: LedMode::Blink,
            blink_interval: 50,
            brightness: 50,
        }
    }
}

impl LedSettings {
    pub fn blink_interval_ms(&self) -> u32 {
        u32::from(self.blink_interval) * 10
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UserSettings {
    pub battery: BatterySettings,
    pub connection: ConnectionSettings,
    device_name: String<DEVICE_NAME_MAX_LEN>,
    pub debug: DebugSettings,
    pub led: LedSettings,
    /// Endpoint number used for the mouse instead of the driver's.
    pub forced_mouse_endpoint: Option<u8>,
    pub feed_policy: FeedPolicy,
}

impl Default for UserSettings {
    fn default() -> Self {
        let mut device_name = String::new();
        // Fits: the default name is shorter than the limit.
        let _ = device_name.push_str(DEFAULT_DEVICE_NAME);
        Self {
            battery: BatterySettings::default(),
            connection: ConnectionSettings::default(),
            device_name,
            debug: DebugSettings::default(),
            led: LedSettings::default(),
            forced_mouse_endpoint: None,
            feed_policy: FeedPolicy::default(),
        }
    }
}

impl UserSettings {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Replace the advertised name. Empty names and names longer than
    /// [`DEVICE_NAME_MAX_LEN`] bytes are rejected and leave it unchanged.
    pub fn set_device_name(&mut self, name: &str) -> Result<(), SettingsError> {
        if name.is_empty() {
            return Err(SettingsError::Name);
        }
        let mut next = String::new();
        next.push_str(name).map_err(|_| SettingsError::Name)?;
        self.device_name = next;
        Ok(())
    }

    pub fn restore_defaults(&mut self) {
        *self = Self::default();
    }

    /// Serialize into the 64-byte record, checksum included.
    pub fn encode(&self) -> [u8; SETTINGS_RECORD_SIZE] {
        let mut out = [0u8; SETTINGS_RECORD_SIZE];
        out[0] = SETTINGS_VERSION;

        out[2..4].copy_from_slice(&self.battery.low_mv.to_le_bytes());
        out[4..6].copy_from_slice(&self.battery.critical_mv.to_le_bytes());
        out[6..8].copy_from_slice(&self.battery.full_mv.to_le_bytes());
        out[8..18].copy_from_slice(&self.battery.calibration);

        out[18..20].copy_from_slice(&self.connection.min_interval.to_le_bytes());
        out[20..22].copy_from_slice(&self.connection.max_interval.to_le_bytes());
        out[22..24].copy_from_slice(&self.connection.slave_latency.to_le_bytes());
        out[24..26].copy_from_slice(&self.connection.supervision_timeout.to_le_bytes());

        let name = self.device_name.as_bytes();
        out[NAME_LEN_OFFSET] = name.len() as u8;
        out[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name);

        out[58] = self.debug.to_byte();
        out[59] = self.led.mode.as_u8();
        out[60] = self.led.blink_interval;
        out[61] = self.led.brightness.min(100);
        out[62] = self.forced_mouse_endpoint.unwrap_or(0);
        out[63] = self.feed_policy.as_u8();

        out[CHECKSUM_OFFSET] = checksum(&out);
        out
    }

    /// Parse and validate a record. Out-of-range option values are
    /// clamped; structural problems are errors.
    pub fn decode(data: &[u8]) -> Result<Self, SettingsError> {
        let data: &[u8; SETTINGS_RECORD_SIZE] = data
            .get(..SETTINGS_RECORD_SIZE)
            .and_then(|d| d.try_into().ok())
            .ok_or(SettingsError::Length)?;

        if data[0] != SETTINGS_VERSION {
            return Err(SettingsError::Version(data[0]));
        }
        if data[CHECKSUM_OFFSET] != checksum(data) {
            return Err(SettingsError::Checksum);
        }

        let u16_at = |i: usize| u16::from_le_bytes([data[i], data[i + 1]]);

        let name_len = usize::from(data[NAME_LEN_OFFSET]);
        if name_len == 0 || name_len > DEVICE_NAME_MAX_LEN {
            return Err(SettingsError::Name);
        }
        let name = core::str::from_utf8(&data[NAME_OFFSET..NAME_OFFSET + name_len])
            .map_err(|_| SettingsError::Name)?;
        let mut device_name = String::new();
        device_name.push_str(name).map_err(|_| SettingsError::Name)?;

        let mut calibration = [0u8; 10];
        calibration.copy_from_slice(&data[8..18]);

        Ok(Self {
            battery: BatterySettings {
                low_mv: u16_at(2),
                critical_mv: u16_at(4),
                full_mv: u16_at(6),
                calibration,
            },
            connection: ConnectionSettings {
                min_interval: u16_at(18),
                max_interval: u16_at(20),
                slave_latency: u16_at(22),
                supervision_timeout: u16_at(24),
            },
            device_name,
            debug: DebugSettings::from_byte(data[58]),
            led: LedSettings {
                mode: LedMode::from_u8(data[59]),
                blink_interval: data[60],
                brightness: data[61].min(100),
            },
            forced_mouse_endpoint: match data[62] {
                0 => None,
                ep => Some(ep),
            },
            feed_policy: FeedPolicy::from_u8(data[63]),
        })
    }

    /// Startup options for the bridge engine.
    pub fn bridge_options(&self) -> crate::bridge::BridgeOptions {
        crate::bridge::BridgeOptions {
            forced_mouse_endpoint: self.forced_mouse_endpoint,
            feed_policy: self.feed_policy,
        }
    }
}

/// Bitwise NOT of the wrapping sum of every byte except the checksum.
pub fn checksum(record: &[u8; SETTINGS_RECORD_SIZE]) -> u8 {
    let sum = record
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != CHECKSUM_OFFSET)
        .fold(0u8, |acc, (_, &b)| acc.wrapping_add(b));
    !sum
}
