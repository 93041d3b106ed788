//! Window-open detector
//!
//! Watches the indoor temperature rate of change (°C/min). A window is
//! reported open after two consecutive fast drops and closed again once the
//! temperature recovers or settles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Drop rate (°C/min) that qualifies while the heater is running
pub const HEATING_DROP_RATE: f64 = -0.7;
/// Drop rate (°C/min) that qualifies regardless of heating
pub const FAST_DROP_RATE: f64 = -1.2;
/// Rising faster than this closes the window immediately
pub const RECOVERY_RATE: f64 = 0.1;
/// Below this absolute rate the temperature counts as settled
pub const SETTLED_RATE: f64 = 0.2;
/// How long a window must have been open before settling closes it
pub const SETTLED_CLOSE_SECS: i64 = 5 * 60;
pub const CONSECUTIVE_DROPS_REQUIRED: u32 = 2;

/// Convert a reading to °C
pub fn fahrenheit_to_celsius(value: f64) -> f64 {
    (value - 32.0) * 5.0 / 9.0
}

/// State change reported by the detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WindowTransition {
    Opened { rate_per_min: f64 },
    Closed { rate_per_min: f64 },
}

/// True for a drop fast enough to suggest an open window
pub fn is_rapid_drop(rate_per_min: f64, heating: bool) -> bool {
    (heating && rate_per_min < HEATING_DROP_RATE) || rate_per_min < FAST_DROP_RATE
}

fn rate_per_min(prev_temp: f64, prev_at: DateTime<Utc>, temp: f64, at: DateTime<Utc>) -> Option<f64> {
    let secs = (at - prev_at).num_milliseconds() as f64 / 1000.0;
    if secs <= 0.0 {
        return None;
    }
    Some((temp - prev_temp) / secs * 60.0)
}

/// Stateless check between two refresh samples, used until the real-time
/// detector has produced a result.
pub fn polling_window_open(
    prev_temp: Option<f64>,
    prev_at: Option<DateTime<Utc>>,
    heating: bool,
    temp: f64,
    at: DateTime<Utc>,
) -> bool {
    match (prev_temp, prev_at) {
        (Some(prev_temp), Some(prev_at)) => rate_per_min(prev_temp, prev_at, temp, at)
            .map(|rate| is_rapid_drop(rate, heating))
            .unwrap_or(false),
        _ => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowDetector {
    last_temp: Option<f64>,
    last_at: Option<DateTime<Utc>>,
    consecutive_drops: u32,
    open: bool,
    open_since: Option<DateTime<Utc>>,
    /// Set once a rate has been computed
    has_result: bool,
}

impl WindowDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn open_since(&self) -> Option<DateTime<Utc>> {
        self.open_since
    }

    pub fn has_result(&self) -> bool {
        self.has_result
    }

    pub fn consecutive_drops(&self) -> u32 {
        self.consecutive_drops
    }

    /// Feed an indoor temperature (°C). Readings that do not advance time
    /// only update the tracked value.
    ///
    /// Drops must be strictly consecutive: any reading that does not
    /// qualify, including a moderate fall below the drop threshold, clears
    /// the drop counter.
    pub fn on_temperature(
        &mut self,
        temp_c: f64,
        at: DateTime<Utc>,
        heating: bool,
    ) -> Option<WindowTransition> {
        let rate = match (self.last_temp, self.last_at) {
            (Some(prev), Some(prev_at)) => rate_per_min(prev, prev_at, temp_c, at),
            _ => None,
        };
        self.last_temp = Some(temp_c);
        self.last_at = Some(at);

        let rate = rate?;
        self.has_result = true;

        if is_rapid_drop(rate, heating) {
            self.consecutive_drops += 1;
            if self.consecutive_drops >= CONSECUTIVE_DROPS_REQUIRED && !self.open {
                self.open = true;
                self.open_since = Some(at);
                return Some(WindowTransition::Opened { rate_per_min: rate });
            }
            return None;
        }

        self.consecutive_drops = 0;
        if !self.open {
            return None;
        }
        if rate > RECOVERY_RATE {
            return Some(self.close(rate));
        }
        let settled_long_enough = self
            .open_since
            .map(|since| (at - since).num_seconds() > SETTLED_CLOSE_SECS)
            .unwrap_or(true);
        if rate.abs() < SETTLED_RATE && settled_long_enough {
            return Some(self.close(rate));
        }
        None
    }

    /// Force the closed state, e.g. after a contact sensor reported closed
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn close(&mut self, rate: f64) -> WindowTransition {
        self.open = false;
        self.open_since = None;
        WindowTransition::Closed { rate_per_min: rate }
    }
}
