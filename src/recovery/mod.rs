//! Fault recovery: one reconnect machine per link, the watchdog, and
//! the statistics they feed.
//!
//! [`Recovery::tick`] is the last step of every bridge cycle. It advances
//! both reconnect machines and the watchdog by the elapsed tick and
//! prints the statistics every [`STATS_REPORT_INTERVAL_MS`].

pub mod reconnect;
pub mod stats;
pub mod watchdog;

use crate::ble::BleHid;
use crate::config::STATS_REPORT_INTERVAL_MS;
use crate::usb::UsbHost;
use reconnect::{BleReconnect, ReconnectConfig, Reconnector, UsbReconnect};
use stats::{ErrorStats, StatEvent};
use watchdog::{FeedPolicy, Watchdog};

/// Coarse health of the whole bridge. Numeric codes are stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SystemState {
    Normal = 0,
    /// A link gave up reconnecting and waits for the next physical event.
    Error = 1,
    Recovering = 2,
}

/// What a recovery tick did that the bridge has to react to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// The USB host stack was re-initialised; registered devices are stale.
    pub usb_stack_reset: bool,
    /// The watchdog fired; the bridge must start over from a clean state.
    pub safe_recovery: bool,
    /// Periodic report interval elapsed.
    pub report_due: bool,
}

pub struct Recovery {
    pub usb: Reconnector,
    pub ble: Reconnector,
    pub watchdog: Watchdog,
    pub stats: ErrorStats,
    report_accum_ms: u32,
}

impl Recovery {
    pub const fn new(feed_policy: FeedPolicy) -> Self {
        Self {
            usb: Reconnector::new(ReconnectConfig::USB),
            ble: Reconnector::new(ReconnectConfig::BLE),
            watchdog: Watchdog::new(feed_policy),
            stats: ErrorStats::new(),
            report_accum_ms: 0,
        }
    }

    pub fn system_state(&self) -> SystemState {
        if self.usb.is_active() || self.ble.is_active() || self.watchdog.in_safe_mode() {
            SystemState::Recovering
        } else if self.usb.exhausted() || self.ble.exhausted() {
            SystemState::Error
        } else {
            SystemState::Normal
        }
    }

    pub fn tick<H: UsbHost, B: BleHid>(
        &mut self,
        tick_ms: u16,
        host: &mut H,
        ble: &mut B,
    ) -> TickOutcome {
        let mut usb_target = UsbReconnect::new(host);
        self.usb.poll(tick_ms, &mut usb_target, &mut self.stats);
        let usb_stack_reset = usb_target.stack_reset();

        self.ble.poll(tick_ms, &mut BleReconnect(ble), &mut self.stats);

        let mut outcome = self.tick_gated(tick_ms, host, ble);
        outcome.usb_stack_reset |= usb_stack_reset;
        outcome
    }

    /// Tick for a cycle held by the pending keyboard retry. Both
    /// reconnect machines stay frozen; only the watchdog and the report
    /// timer advance, so a BLE link that refuses forever still ends in
    /// safe recovery.
    pub fn tick_gated<H: UsbHost, B: BleHid>(
        &mut self,
        tick_ms: u16,
        host: &mut H,
        ble: &mut B,
    ) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        let mut reinit = Ok(());
        let mut readvertise = Ok(());
        let recovered = self.watchdog.poll(tick_ms, &mut self.stats, || {
            reinit = host.reinit_stack();
            ble.disconnect();
            readvertise = ble.reconnect();
        });
        if recovered {
            outcome.usb_stack_reset = true;
            outcome.safe_recovery = true;
            if reinit.is_err() {
                self.stats.record(StatEvent::UsbEnumFail);
            }
            if let Err(_e) = readvertise {
                #[cfg(feature = "defmt")]
                defmt::warn!("recovery: BLE restart refused: {}", _e);
                self.stats.record(StatEvent::BleReconnectRetry);
            }
        }

        self.report_accum_ms = self.report_accum_ms.saturating_add(u32::from(tick_ms));
        if self.report_accum_ms >= STATS_REPORT_INTERVAL_MS {
            self.report_accum_ms = 0;
            self.stats.log();
            outcome.report_due = true;
        }

        outcome
    }
}
