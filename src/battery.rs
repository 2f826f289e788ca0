//! Battery voltage to charge level.
//!
//! The curve is a single-cell Li-ion discharge profile measured at the
//! adapter's typical load. Between points the level is interpolated
//! linearly; outside the table it is clamped.

/// Samples averaged per measurement.
pub const SAMPLES_PER_MEASUREMENT: usize = 20;

/// (millivolts, percent), strictly descending in both columns.
const DISCHARGE_CURVE: [(u16, u8); 18] = [
    (4200, 100),
    (4100, 95),
    (4070, 90),
    (4000, 80),
    (3910, 70),
    (3840, 60),
    (3750, 50),
    (3660, 40),
    (3600, 30),
    (3510, 20),
    (3450, 15),
    (3380, 10),
    (3340, 8),
    (3300, 6),
    (3260, 4),
    (3220, 2),
    (3180, 1),
    (3100, 0),
];

pub fn percent_from_millivolts(mv: u16) -> u8 {
    let (top_mv, top_pct) = DISCHARGE_CURVE[0];
    if mv >= top_mv {
        return top_pct;
    }
    let (bottom_mv, bottom_pct) = DISCHARGE_CURVE[DISCHARGE_CURVE.len() - 1];
    if mv <= bottom_mv {
        return bottom_pct;
    }

    for pair in DISCHARGE_CURVE.windows(2) {
        let (high_mv, high_pct) = pair[0];
        let (low_mv, low_pct) = pair[1];
        if mv >= low_mv {
            let span = u32::from(high_pct - low_pct) * u32::from(mv - low_mv)
                / u32::from(high_mv - low_mv);
            return low_pct + span as u8;
        }
    }
    bottom_pct
}

/// Convert an averaged ADC count to cell millivolts for the board's
/// sense divider. Negative results clamp to 0.
pub fn millivolts_from_adc(adc: u16) -> u16 {
    let mv = (i32::from(adc) * 2100 + 512) / 1024 - 2100;
    mv.clamp(0, i32::from(u16::MAX)) as u16
}

/// Average a batch of raw samples, treating negative readings as zero.
pub fn average_samples(samples: &[i16]) -> u16 {
    if samples.is_empty() {
        return 0;
    }
    let sum: u32 = samples.iter().map(|&s| s.max(0) as u32).sum();
    (sum / samples.len() as u32) as u16
}

/// Tracks the last published level so only changes are notified.
#[derive(Clone, Copy, Debug, Default)]
pub struct BatteryMonitor {
    last_percent: Option<u8>,
}

impl BatteryMonitor {
    pub const fn new() -> Self {
        Self { last_percent: None }
    }

    /// Feed one averaged ADC reading. Returns the new level if it
    /// differs from the last one published.
    pub fn update(&mut self, adc_avg: u16) -> Option<u8> {
        let mv = millivolts_from_adc(adc_avg);
        let percent = percent_from_millivolts(mv);

        #[cfg(feature = "defmt")]
        defmt::debug!("battery: adc={} {}mV {}%", adc_avg, mv, percent);

        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(percent)
    }

    pub fn last_percent(&self) -> Option<u8> {
        self.last_percent
    }
}
