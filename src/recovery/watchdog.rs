//! Software liveness counter.
//!
//! Ticks accumulate until something feeds the watchdog. Reaching
//! [`WATCHDOG_TIMEOUT_MS`] without a feed runs safe recovery: the whole
//! transport stack is re-initialised and the event is counted.

use super::stats::{ErrorStats, StatEvent};
use crate::config::WATCHDOG_TIMEOUT_MS;

/// What counts as a feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FeedPolicy {
    /// Only explicit [`Watchdog::feed`] calls reset the counter.
    #[default]
    Explicit,
    /// Additionally treat an accumulator landing exactly on a whole
    /// second as a feed. With 1 ms ticks this feeds every second and the
    /// watchdog can never fire; kept only for behavioural comparison
    /// with older firmware.
    EveryWholeSecond,
}

impl FeedPolicy {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::EveryWholeSecond,
            _ => Self::Explicit,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Explicit => 0,
            Self::EveryWholeSecond => 1,
        }
    }
}

pub struct Watchdog {
    enabled: bool,
    timeout_accum_ms: u32,
    safe_mode: bool,
    policy: FeedPolicy,
}

impl Watchdog {
    pub const fn new(policy: FeedPolicy) -> Self {
        Self {
            enabled: true,
            timeout_accum_ms: 0,
            safe_mode: false,
            policy,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.timeout_accum_ms = 0;
    }

    pub fn feed(&mut self) {
        self.timeout_accum_ms = 0;
    }

    pub fn accumulated_ms(&self) -> u32 {
        self.timeout_accum_ms
    }

    pub fn in_safe_mode(&self) -> bool {
        self.safe_mode
    }

    pub fn policy(&self) -> FeedPolicy {
        self.policy
    }

    /// Advance by `tick_ms`. When the threshold is reached, `recover` is
    /// called to re-initialise the transports and `true` is returned.
    pub fn poll(
        &mut self,
        tick_ms: u16,
        stats: &mut ErrorStats,
        recover: impl FnOnce(),
    ) -> bool {
        if !self.enabled {
            return false;
        }

        self.timeout_accum_ms = self.timeout_accum_ms.saturating_add(u32::from(tick_ms));

        if self.timeout_accum_ms >= WATCHDOG_TIMEOUT_MS {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "watchdog: {} ms without feed, running safe recovery",
                self.timeout_accum_ms
            );
            self.safe_mode = true;
            recover();
            stats.record(StatEvent::WatchdogTimeout);
            self.safe_mode = false;
            self.timeout_accum_ms = 0;
            return true;
        }

        if self.policy == FeedPolicy::EveryWholeSecond && self.timeout_accum_ms % 1000 == 0 {
            self.feed();
        }
        false
    }
}
