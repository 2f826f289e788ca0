//! Timed retry automaton for one link (USB or BLE).
//!
//! ```text
//!   start()          delay elapsed          attempt ok
//! Idle ──────► Waiting ──────────► Reconnecting ──────────► Idle
//!                 ▲                     │
//!                 └──── backoff ────────┤ attempt failed
//!                                       └─── retries exhausted ──► Idle
//! ```
//!
//! An attempt has two halves separated by a settle time. The first half
//! (re-init, or disconnect) runs when `Reconnecting` is entered; the
//! second half (status check, or reconnect) runs once the settle time has
//! been ticked away. Nothing blocks: each `poll` does at most one half.

use super::stats::{ErrorStats, StatEvent};
use crate::ble::BleHid;
use crate::config;
use crate::usb::UsbHost;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Link {
    Usb,
    Ble,
}

impl Link {
    fn connect_event(self) -> StatEvent {
        match self {
            Link::Usb => StatEvent::UsbConnect,
            Link::Ble => StatEvent::BleConnect,
        }
    }

    fn disconnect_event(self) -> StatEvent {
        match self {
            Link::Usb => StatEvent::UsbDisconnect,
            Link::Ble => StatEvent::BleDisconnect,
        }
    }

    fn retry_event(self) -> StatEvent {
        match self {
            Link::Usb => StatEvent::UsbReconnectRetry,
            Link::Ble => StatEvent::BleReconnectRetry,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReconnectConfig {
    pub link: Link,
    pub max_retry: u8,
    pub initial_delay_ms: u16,
    pub backoff_ms: u16,
    /// Gap between the two halves of an attempt.
    pub settle_ms: u16,
}

impl ReconnectConfig {
    pub const USB: Self = Self {
        link: Link::Usb,
        max_retry: config::USB_RECONNECT_MAX_RETRY,
        initial_delay_ms: config::RECONNECT_INITIAL_DELAY_MS,
        backoff_ms: config::USB_RECONNECT_BACKOFF_MS,
        settle_ms: config::USB_RECONNECT_SETTLE_MS,
    };

    pub const BLE: Self = Self {
        link: Link::Ble,
        max_retry: config::BLE_RECONNECT_MAX_RETRY,
        initial_delay_ms: config::RECONNECT_INITIAL_DELAY_MS,
        backoff_ms: config::BLE_RECONNECT_BACKOFF_MS,
        settle_ms: config::BLE_RECONNECT_SETTLE_MS,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReconnectState {
    Idle,
    Waiting,
    Reconnecting,
}

/// The link-specific action behind one reconnect attempt.
pub trait ReconnectTarget {
    /// First half. `false` fails the attempt straight away.
    fn begin_attempt(&mut self) -> bool;

    /// Second half, after the settle time. `true` means the link is back.
    fn finish_attempt(&mut self) -> bool;
}

/// USB: full stack re-init, then check the root device came back.
pub struct UsbReconnect<'a, H: UsbHost> {
    host: &'a mut H,
    stack_reset: bool,
}

impl<'a, H: UsbHost> UsbReconnect<'a, H> {
    pub fn new(host: &'a mut H) -> Self {
        Self {
            host,
            stack_reset: false,
        }
    }

    /// Whether an attempt re-initialised the host stack (every device
    /// address is stale afterwards).
    pub fn stack_reset(&self) -> bool {
        self.stack_reset
    }
}

impl<H: UsbHost> ReconnectTarget for UsbReconnect<'_, H> {
    fn begin_attempt(&mut self) -> bool {
        self.stack_reset = true;
        self.host.reinit_stack().is_ok()
    }

    fn finish_attempt(&mut self) -> bool {
        self.host.root_device_ready()
    }
}

/// BLE: drop whatever is left of the link, then become connectable again.
pub struct BleReconnect<'a, B: BleHid>(pub &'a mut B);

impl<B: BleHid> ReconnectTarget for BleReconnect<'_, B> {
    fn begin_attempt(&mut self) -> bool {
        self.0.disconnect();
        true
    }

    fn finish_attempt(&mut self) -> bool {
        self.0.reconnect().is_ok()
    }
}

pub struct Reconnector {
    config: ReconnectConfig,
    enabled: bool,
    state: ReconnectState,
    delay_remaining_ms: u16,
    /// `Some` while the second half of an attempt is pending.
    settle_remaining_ms: Option<u16>,
    retry_count: u8,
    /// Set when the last run ended by running out of retries.
    exhausted: bool,
}

impl Reconnector {
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            enabled: true,
            state: ReconnectState::Idle,
            delay_remaining_ms: 0,
            settle_remaining_ms: None,
            retry_count: 0,
            exhausted: false,
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != ReconnectState::Idle
    }

    pub fn delay_remaining_ms(&self) -> u16 {
        self.delay_remaining_ms
    }

    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    /// `true` from giving up until the next `start` or successful attempt.
    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The link came back without help (device re-plugged, central
    /// reconnected). Clears a previous give-up.
    pub fn link_restored(&mut self) {
        self.exhausted = false;
    }

    /// Disabling abandons any attempt in progress.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.reset();
        }
    }

    fn reset(&mut self) {
        self.state = ReconnectState::Idle;
        self.delay_remaining_ms = 0;
        self.settle_remaining_ms = None;
        self.retry_count = 0;
    }

    /// Arm the machine after a link-down event. Ignored while disabled or
    /// while a reconnect is already under way. Returns whether it armed.
    pub fn start(&mut self, stats: &mut ErrorStats) -> bool {
        if !self.enabled || self.state != ReconnectState::Idle {
            return false;
        }

        self.state = ReconnectState::Waiting;
        self.delay_remaining_ms = self.config.initial_delay_ms;
        self.retry_count = 0;
        self.exhausted = false;
        stats.record(self.config.link.disconnect_event());

        #[cfg(feature = "defmt")]
        defmt::info!(
            "{} reconnect armed, first attempt in {} ms",
            self.config.link,
            self.delay_remaining_ms
        );
        true
    }

    pub fn poll(&mut self, tick_ms: u16, target: &mut impl ReconnectTarget, stats: &mut ErrorStats) {
        match self.state {
            ReconnectState::Idle => {}
            ReconnectState::Waiting => {
                if self.delay_remaining_ms > tick_ms {
                    self.delay_remaining_ms -= tick_ms;
                } else {
                    self.delay_remaining_ms = 0;
                    self.state = ReconnectState::Reconnecting;
                }
            }
            ReconnectState::Reconnecting => match self.settle_remaining_ms {
                Some(remaining) if remaining > tick_ms => {
                    self.settle_remaining_ms = Some(remaining - tick_ms);
                }
                Some(_) => {
                    self.settle_remaining_ms = None;
                    self.complete(target, stats);
                }
                None => self.execute(target, stats),
            },
        }
    }

    /// Start one attempt. Only meaningful in `Reconnecting`.
    pub fn execute(&mut self, target: &mut impl ReconnectTarget, stats: &mut ErrorStats) {
        if self.state != ReconnectState::Reconnecting || self.settle_remaining_ms.is_some() {
            return;
        }
        if self.retry_count >= self.config.max_retry {
            self.give_up();
            return;
        }

        #[cfg(feature = "defmt")]
        defmt::info!(
            "{} reconnect attempt {}/{}",
            self.config.link,
            self.retry_count + 1,
            self.config.max_retry
        );

        if !target.begin_attempt() {
            self.fail(stats);
        } else if self.config.settle_ms == 0 {
            self.complete(target, stats);
        } else {
            self.settle_remaining_ms = Some(self.config.settle_ms);
        }
    }

    fn complete(&mut self, target: &mut impl ReconnectTarget, stats: &mut ErrorStats) {
        if target.finish_attempt() {
            #[cfg(feature = "defmt")]
            defmt::info!("{} reconnect succeeded", self.config.link);
            stats.record(self.config.link.connect_event());
            self.reset();
        } else {
            self.fail(stats);
        }
    }

    fn fail(&mut self, stats: &mut ErrorStats) {
        self.retry_count = self.retry_count.saturating_add(1);
        stats.record(self.config.link.retry_event());

        if self.retry_count >= self.config.max_retry {
            self.give_up();
            return;
        }

        #[cfg(feature = "defmt")]
        defmt::warn!(
            "{} reconnect failed, retry in {} ms",
            self.config.link,
            self.config.backoff_ms
        );
        self.state = ReconnectState::Waiting;
        self.delay_remaining_ms = self.config.backoff_ms;
    }

    fn give_up(&mut self) {
        #[cfg(feature = "defmt")]
        defmt::warn!(
            "{} reconnect gave up after {} attempts",
            self.config.link,
            self.retry_count
        );
        self.reset();
        self.exhausted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted target: `begin` and `finish` answer from fixed flags and
    /// count how often they ran.
    struct Script {
        begin_ok: bool,
        finish_ok: bool,
        begins: u32,
        finishes: u32,
    }

    impl Script {
        fn new(begin_ok: bool, finish_ok: bool) -> Self {
            Self {
                begin_ok,
                finish_ok,
                begins: 0,
                finishes: 0,
            }
        }
    }

    impl ReconnectTarget for Script {
        fn begin_attempt(&mut self) -> bool {
            self.begins += 1;
            self.begin_ok
        }

        fn finish_attempt(&mut self) -> bool {
            self.finishes += 1;
            self.finish_ok
        }
    }

    #[test]
    fn start_arms_waiting_once() {
        let mut stats = ErrorStats::new();
        let mut rc = Reconnector::new(ReconnectConfig::USB);
        assert!(rc.start(&mut stats));
        assert_eq!(rc.state(), ReconnectState::Waiting);
        assert_eq!(rc.delay_remaining_ms(), 1000);
        assert_eq!(rc.retry_count(), 0);
        assert_eq!(stats.usb_disconnect, 1);

        // Already running: no re-arm, no second stat.
        assert!(!rc.start(&mut stats));
        assert_eq!(stats.usb_disconnect, 1);
    }

    #[test]
    fn start_ignored_when_disabled() {
        let mut stats = ErrorStats::new();
        let mut rc = Reconnector::new(ReconnectConfig::BLE);
        rc.set_enabled(false);
        assert!(!rc.start(&mut stats));
        assert_eq!(rc.state(), ReconnectState::Idle);
        assert_eq!(stats.ble_disconnect, 0);
    }

    #[test]
    fn waiting_counts_down_then_reconnects() {
        let mut stats = ErrorStats::new();
        let mut target = Script::new(true, true);
        let mut rc = Reconnector::new(ReconnectConfig::USB);
        rc.start(&mut stats);

        rc.poll(400, &mut target, &mut stats);
        assert_eq!(rc.state(), ReconnectState::Waiting);
        assert_eq!(rc.delay_remaining_ms(), 600);

        rc.poll(600, &mut target, &mut stats);
        assert_eq!(rc.state(), ReconnectState::Reconnecting);
        assert_eq!(target.begins, 0);
    }

    #[test]
    fn usb_success_after_settle() {
        let mut stats = ErrorStats::new();
        let mut target = Script::new(true, true);
        let mut rc = Reconnector::new(ReconnectConfig::USB);
        rc.start(&mut stats);
        rc.poll(1000, &mut target, &mut stats);

        rc.poll(5, &mut target, &mut stats);
        assert_eq!(target.begins, 1);
        assert_eq!(target.finishes, 0);
        assert_eq!(rc.state(), ReconnectState::Reconnecting);

        // Settle is 500 ms; 499 more is not enough.
        rc.poll(499, &mut target, &mut stats);
        assert_eq!(target.finishes, 0);
        rc.poll(1, &mut target, &mut stats);
        assert_eq!(target.finishes, 1);
        assert_eq!(rc.state(), ReconnectState::Idle);
        assert_eq!(stats.usb_connect, 1);
        assert_eq!(stats.usb_reconnect_retry, 0);
    }

    #[test]
    fn usb_gives_up_after_three_failures() {
        let mut stats = ErrorStats::new();
        let mut target = Script::new(true, false);
        let mut rc = Reconnector::new(ReconnectConfig::USB);
        rc.start(&mut stats);
        rc.poll(1000, &mut target, &mut stats);
        assert_eq!(rc.state(), ReconnectState::Reconnecting);

        for attempt in 1..=3u32 {
            rc.execute(&mut target, &mut stats);
            rc.poll(500, &mut target, &mut stats);
            assert_eq!(target.finishes, attempt);
            assert_eq!(stats.usb_reconnect_retry, attempt);
            if attempt < 3 {
                assert_eq!(rc.state(), ReconnectState::Waiting);
                assert_eq!(rc.delay_remaining_ms(), 2000);
                rc.poll(2000, &mut target, &mut stats);
                assert_eq!(rc.state(), ReconnectState::Reconnecting);
            }
        }

        assert_eq!(rc.state(), ReconnectState::Idle);
        assert_eq!(stats.usb_reconnect_retry, 3);
        assert!(rc.exhausted());

        // No further automatic attempts.
        for _ in 0..100 {
            rc.poll(100, &mut target, &mut stats);
        }
        assert_eq!(target.begins, 3);
        assert_eq!(stats.usb_connect, 0);
    }

    #[test]
    fn ble_backoff_and_retry_limit() {
        let mut stats = ErrorStats::new();
        let mut target = Script::new(true, false);
        let mut rc = Reconnector::new(ReconnectConfig::BLE);
        rc.start(&mut stats);

        // Drive with a 10 ms tick until the machine settles back to idle.
        for _ in 0..10_000 {
            let finishes_before = target.finishes;
            rc.poll(10, &mut target, &mut stats);
            if target.finishes != finishes_before && rc.is_active() {
                assert_eq!(rc.state(), ReconnectState::Waiting);
                assert_eq!(rc.delay_remaining_ms(), 3000);
            }
            if !rc.is_active() {
                break;
            }
        }
        assert!(!rc.is_active());
        assert_eq!(target.finishes, 5);
        assert_eq!(stats.ble_reconnect_retry, 5);
        assert_eq!(stats.ble_disconnect, 1);
    }

    #[test]
    fn failed_first_half_skips_settle() {
        let mut stats = ErrorStats::new();
        let mut target = Script::new(false, true);
        let mut rc = Reconnector::new(ReconnectConfig::USB);
        rc.start(&mut stats);
        rc.poll(1000, &mut target, &mut stats);
        rc.poll(1, &mut target, &mut stats);
        assert_eq!(target.finishes, 0);
        assert_eq!(rc.state(), ReconnectState::Waiting);
        assert_eq!(rc.retry_count(), 1);
    }

    #[test]
    fn disable_aborts_attempt() {
        let mut stats = ErrorStats::new();
        let mut target = Script::new(true, true);
        let mut rc = Reconnector::new(ReconnectConfig::USB);
        rc.start(&mut stats);
        rc.poll(1000, &mut target, &mut stats);
        rc.set_enabled(false);
        assert_eq!(rc.state(), ReconnectState::Idle);
        rc.poll(1000, &mut target, &mut stats);
        assert_eq!(target.begins, 0);
    }

    #[test]
    fn can_restart_after_giving_up() {
        let mut stats = ErrorStats::new();
        let mut target = Script::new(false, false);
        let mut rc = Reconnector::new(ReconnectConfig::USB);
        rc.start(&mut stats);
        for _ in 0..1000 {
            rc.poll(10, &mut target, &mut stats);
        }
        assert!(!rc.is_active());
        assert!(rc.start(&mut stats));
        assert!(!rc.exhausted());
        assert_eq!(stats.usb_disconnect, 2);
    }
}
