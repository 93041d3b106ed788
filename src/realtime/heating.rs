//! Heating session detector
//!
//! Driven by power sensor change notifications. A session starts when the
//! power rises above the threshold and ends when it falls back below it.
//! Unavailable readings count as 0 W.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a power change
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HeatingEvent {
    Started {
        at: DateTime<Utc>,
    },
    Stopped {
        started_at: DateTime<Utc>,
        at: DateTime<Utc>,
        duration_secs: f64,
        /// Nameplate energy of the session, when heater power is known
        energy_kwh: Option<f64>,
    },
}

/// Closed stretch of heating, used for accounting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatingSegment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_secs: f64,
    pub energy_kwh: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatingDetector {
    /// Watts above which the heater counts as running
    threshold_w: f64,
    heater_power_w: Option<f64>,
    session_start: Option<DateTime<Utc>>,
}

impl HeatingDetector {
    pub fn new(threshold_w: f64, heater_power_w: Option<f64>) -> Self {
        Self {
            threshold_w,
            heater_power_w: heater_power_w.filter(|p| *p > 0.0),
            session_start: None,
        }
    }

    pub fn is_heating_power(&self, power_w: Option<f64>) -> bool {
        power_w.unwrap_or(0.0) > self.threshold_w
    }

    /// True while a session is open
    pub fn is_active(&self) -> bool {
        self.session_start.is_some()
    }

    pub fn session_start(&self) -> Option<DateTime<Utc>> {
        self.session_start
    }

    /// Classify a power change. Non-edges are ignored.
    ///
    /// Edges are taken against the session state rather than `old_w` alone,
    /// so a missed notification cannot open a second session.
    pub fn on_power_change(
        &mut self,
        old_w: Option<f64>,
        new_w: Option<f64>,
        at: DateTime<Utc>,
    ) -> Option<HeatingEvent> {
        let was_heating = self.is_heating_power(old_w) || self.is_active();
        let is_heating = self.is_heating_power(new_w);
        if was_heating == is_heating && is_heating == self.is_active() {
            return None;
        }

        if is_heating && !self.is_active() {
            self.session_start = Some(at);
            return Some(HeatingEvent::Started { at });
        }
        if !is_heating && self.is_active() {
            let segment = self.close(at)?;
            return Some(HeatingEvent::Stopped {
                started_at: segment.start,
                at: segment.end,
                duration_secs: segment.duration_secs,
                energy_kwh: segment.energy_kwh,
            });
        }
        None
    }

    /// Split an open session at `at` so the time before it can be credited
    /// to the day that is ending. The session continues from `at`.
    pub fn checkpoint(&mut self, at: DateTime<Utc>) -> Option<HeatingSegment> {
        let start = self.session_start?;
        if at <= start {
            return None;
        }
        let segment = self.segment(start, at);
        self.session_start = Some(at);
        Some(segment)
    }

    /// Close any open session, e.g. at zone teardown
    pub fn finalize(&mut self, at: DateTime<Utc>) -> Option<HeatingSegment> {
        self.close(at)
    }

    /// Seconds of the open session up to `now`
    pub fn ongoing_seconds(&self, now: DateTime<Utc>) -> f64 {
        match self.session_start {
            Some(start) if now > start => seconds_between(start, now),
            _ => 0.0,
        }
    }

    pub fn ongoing_energy_kwh(&self, now: DateTime<Utc>) -> f64 {
        match self.heater_power_w {
            Some(power) => power / 1000.0 * self.ongoing_seconds(now) / 3600.0,
            None => 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.session_start = None;
    }

    fn close(&mut self, at: DateTime<Utc>) -> Option<HeatingSegment> {
        let start = self.session_start.take()?;
        let end = if at > start { at } else { start };
        Some(self.segment(start, end))
    }

    fn segment(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> HeatingSegment {
        let duration_secs = seconds_between(start, end);
        HeatingSegment {
            start,
            end,
            duration_secs,
            energy_kwh: self
                .heater_power_w
                .map(|p| p / 1000.0 * duration_secs / 3600.0),
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 6, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_start_and_stop() {
        let mut detector = HeatingDetector::new(50.0, Some(1200.0));
        assert_eq!(
            detector.on_power_change(Some(0.0), Some(1200.0), t(0)),
            Some(HeatingEvent::Started { at: t(0) })
        );
        assert!(detector.is_active());

        match detector.on_power_change(Some(1200.0), Some(2.0), t(30)) {
            Some(HeatingEvent::Stopped { duration_secs, energy_kwh, .. }) => {
                assert_eq!(duration_secs, 1800.0);
                assert!((energy_kwh.unwrap() - 0.6).abs() < 1e-9);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!detector.is_active());
    }

    #[test]
    fn test_non_edges_are_noops() {
        let mut detector = HeatingDetector::new(50.0, None);
        assert_eq!(detector.on_power_change(Some(0.0), Some(40.0), t(0)), None);
        detector.on_power_change(Some(0.0), Some(900.0), t(1));
        assert_eq!(detector.on_power_change(Some(900.0), Some(950.0), t(2)), None);
        assert_eq!(detector.session_start(), Some(t(1)));
    }

    #[test]
    fn test_unavailable_counts_as_off() {
        let mut detector = HeatingDetector::new(50.0, None);
        detector.on_power_change(None, Some(500.0), t(0));
        let event = detector.on_power_change(Some(500.0), None, t(10));
        assert!(matches!(event, Some(HeatingEvent::Stopped { energy_kwh: None, .. })));
        assert_eq!(detector.on_power_change(None, None, t(11)), None);
    }

    #[test]
    fn test_checkpoint_splits_session() {
        let mut detector = HeatingDetector::new(50.0, Some(1000.0));
        detector.on_power_change(Some(0.0), Some(1000.0), t(0));
        let first = detector.checkpoint(t(45)).unwrap();
        assert_eq!(first.duration_secs, 2700.0);
        assert_eq!(detector.session_start(), Some(t(45)));
        assert_eq!(detector.ongoing_seconds(t(60)), 900.0);
        assert!((detector.ongoing_energy_kwh(t(60)) - 0.25).abs() < 1e-9);

        let rest = detector.finalize(t(75)).unwrap();
        assert_eq!(rest.duration_secs, 1800.0);
        assert!(!detector.is_active());
        assert_eq!(detector.checkpoint(t(80)), None);
    }

    #[test]
    fn test_duration_conservation() {
        let mut detector = HeatingDetector::new(50.0, None);
        // (minute, watts)
        let readings = [
            (0, 0.0),
            (10, 800.0),
            (25, 820.0),
            (40, 0.0),
            (55, 1000.0),
            (70, 30.0),
            (90, 1000.0),
            (100, 0.0),
        ];
        let mut previous = None;
        let mut total = 0.0;
        let mut expected = 0.0;
        let mut on_since = None;
        for (minute, watts) in readings {
            if let Some(HeatingEvent::Stopped { duration_secs, .. }) =
                detector.on_power_change(previous, Some(watts), t(minute))
            {
                total += duration_secs;
            }
            match (on_since, watts > 50.0) {
                (None, true) => on_since = Some(minute),
                (Some(start), false) => {
                    expected += ((minute - start) * 60) as f64;
                    on_since = None;
                }
                _ => {}
            }
            previous = Some(watts);
        }
        assert_eq!(expected, (30 + 15 + 10) as f64 * 60.0);
        assert!((total - expected).abs() < 1e-6);
    }
}
