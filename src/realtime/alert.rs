//! Delayed window-open alert
//!
//! Modeled as a deadline owned by the zone and polled from the zone's own
//! context. Scheduling replaces a pending alert; closing the window or
//! stopping the heater cancels it.

use crate::config::NOTIFICATION_COOLDOWN_SECS;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Result of a due alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOutcome {
    Fired,
    /// Window closed or heating stopped during the delay
    ConditionsCleared,
    /// Another alert fired less than the cooldown ago
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowAlert {
    enabled: bool,
    delay_secs: i64,
    due_at: Option<DateTime<Utc>>,
    last_fired: Option<DateTime<Utc>>,
}

impl WindowAlert {
    pub fn new(enabled: bool, delay_minutes: u32) -> Self {
        Self {
            enabled,
            delay_secs: i64::from(delay_minutes) * 60,
            due_at: None,
            last_fired: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.due_at.is_some()
    }

    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.due_at
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired
    }

    /// Carry the cooldown over from a previous run
    pub fn set_last_fired(&mut self, at: Option<DateTime<Utc>>) {
        self.last_fired = at;
    }

    /// Start (or restart) the delay. Returns false when alerts are disabled.
    pub fn schedule(&mut self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        self.due_at = Some(now + Duration::seconds(self.delay_secs));
        true
    }

    /// Drop the pending alert. Returns true if one was pending.
    pub fn cancel(&mut self) -> bool {
        self.due_at.take().is_some()
    }

    /// Resolve the alert once its deadline has passed; `None` while not due.
    pub fn poll(&mut self, now: DateTime<Utc>, window_open: bool, heating: bool) -> Option<AlertOutcome> {
        let due = self.due_at?;
        if now < due {
            return None;
        }
        self.due_at = None;

        if !window_open || !heating {
            return Some(AlertOutcome::ConditionsCleared);
        }
        if let Some(last) = self.last_fired {
            if (now - last).num_seconds() < NOTIFICATION_COOLDOWN_SECS {
                return Some(AlertOutcome::Cooldown);
            }
        }
        self.last_fired = Some(now);
        Some(AlertOutcome::Fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_fires_after_delay() {
        let mut alert = WindowAlert::new(true, 2);
        assert!(alert.schedule(t(0)));
        assert_eq!(alert.poll(t(1), true, true), None);
        assert_eq!(alert.poll(t(2), true, true), Some(AlertOutcome::Fired));
        assert!(!alert.is_pending());
        assert_eq!(alert.last_fired(), Some(t(2)));
    }

    #[test]
    fn test_disabled_never_schedules() {
        let mut alert = WindowAlert::new(false, 2);
        assert!(!alert.schedule(t(0)));
        assert_eq!(alert.poll(t(10), true, true), None);
    }

    #[test]
    fn test_reschedule_replaces_pending() {
        let mut alert = WindowAlert::new(true, 2);
        alert.schedule(t(0));
        alert.schedule(t(1));
        assert_eq!(alert.due_at(), Some(t(3)));
        assert_eq!(alert.poll(t(2), true, true), None);
    }

    #[test]
    fn test_cancel() {
        let mut alert = WindowAlert::new(true, 2);
        alert.schedule(t(0));
        assert!(alert.cancel());
        assert!(!alert.cancel());
        assert_eq!(alert.poll(t(5), true, true), None);
    }

    #[test]
    fn test_conditions_rechecked() {
        let mut alert = WindowAlert::new(true, 2);
        alert.schedule(t(0));
        assert_eq!(alert.poll(t(2), true, false), Some(AlertOutcome::ConditionsCleared));
        assert_eq!(alert.last_fired(), None);
    }

    #[test]
    fn test_cooldown() {
        let mut alert = WindowAlert::new(true, 1);
        alert.schedule(t(0));
        assert_eq!(alert.poll(t(1), true, true), Some(AlertOutcome::Fired));
        alert.schedule(t(5));
        assert_eq!(alert.poll(t(6), true, true), Some(AlertOutcome::Cooldown));
        alert.schedule(t(20));
        assert_eq!(alert.poll(t(21), true, true), Some(AlertOutcome::Fired));
    }
}
