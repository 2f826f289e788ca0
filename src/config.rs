//! Application-wide constants and compile-time configuration.
//!
//! Timing parameters, capacities, and protocol constants live here so
//! they can be tuned in one place. Values that can change at runtime
//! (device name, connection parameters, LED behaviour) are in
//! [`crate::settings`].

// Bridge

/// Number of wired devices the registry can track at once.
pub const MAX_USB_DEVICES: usize = 4;

/// Largest IN packet the bridge reads from a wired device (full-speed
/// interrupt endpoints top out at 64 bytes).
pub const MAX_PACKET_SIZE: usize = 64;

/// Offset added to NKRO bitmap positions to form a HID usage code.
/// Bit 0 of the first bitmap byte is usage 0x04 (`A`).
pub const NKRO_KEY_OFFSET: u16 = 4;

/// Hardware debounce after a hot-plug connect edge before the root
/// device is re-initialised (ms).
pub const NEW_DEVICE_SETTLE_MS: u16 = 200;

/// Interval the on-target driver calls the poll loop at (ms).
/// Backoff and watchdog timings assume ticks of at most 10 ms.
pub const BRIDGE_TICK_MS: u16 = 5;

// Recovery

/// Delay between a link-down trigger and the first reconnect attempt (ms).
pub const RECONNECT_INITIAL_DELAY_MS: u16 = 1000;

/// USB reconnect: attempts before giving up.
pub const USB_RECONNECT_MAX_RETRY: u8 = 3;
/// USB reconnect: delay between failed attempts (ms).
pub const USB_RECONNECT_BACKOFF_MS: u16 = 2000;
/// USB reconnect: time the re-initialised stack gets before the status check (ms).
pub const USB_RECONNECT_SETTLE_MS: u16 = 500;

/// BLE reconnect: attempts before giving up.
pub const BLE_RECONNECT_MAX_RETRY: u8 = 5;
/// BLE reconnect: delay between failed attempts (ms).
pub const BLE_RECONNECT_BACKOFF_MS: u16 = 3000;
/// BLE reconnect: gap between the disconnect and reconnect calls (ms).
pub const BLE_RECONNECT_SETTLE_MS: u16 = 100;

/// Watchdog threshold: accumulated unfed time that forces a full
/// transport re-initialisation (ms).
pub const WATCHDOG_TIMEOUT_MS: u32 = 10_000;

/// Period of the statistics report (ms of accumulated ticks).
pub const STATS_REPORT_INTERVAL_MS: u32 = 10_000;

// BLE

/// HID report IDs used in the BLE report map.
pub const KEYBOARD_REPORT_ID: u8 = 1;
pub const MOUSE_REPORT_ID: u8 = 2;

/// How often the battery level is sampled and notified (seconds).
pub const BATTERY_SAMPLE_INTERVAL_SECS: u64 = 60;

/// Bonds remembered by the peripheral; the oldest is dropped when full.
pub const BLE_MAX_BONDS: usize = 4;

/// Appearance advertised to centrals (HID keyboard).
pub const BLE_APPEARANCE: u16 = 0x03C1;

// GPIO pin assignments (nRF52840-DK + MAX3421E breakout)
//
//   MAX3421E SCK   → P0.13
//   MAX3421E MOSI  → P0.14
//   MAX3421E MISO  → P0.15
//   MAX3421E SS    → P0.16
//   MAX3421E RESET → P0.17
//   Status LED     → P0.06
//   Battery sense  → AIN0 (P0.02) through the cell divider

// Settings storage

/// Flash page index where settings storage starts (4 KB per page on nRF52840).
pub const STORAGE_FLASH_PAGE_START: u32 = 240;

/// Number of flash pages reserved for settings storage.
pub const STORAGE_FLASH_PAGE_COUNT: u32 = 4;
