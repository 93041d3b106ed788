//! Daily history ledger and 7-day K stabilizer
//!
//! One [`DailyHistoryEntry`] is archived per calendar day. The trailing week
//! of entries is re-estimated into a stabilized K that does not jump at
//! midnight the way the rolling 24h value does.

use crate::config::{
    MIN_COMFORT_TEMP, MIN_DAILY_SAMPLES, MIN_DELTA_T, MIN_HEATING_TIME_HOURS,
    MIN_HEATING_TIME_STABLE_HOURS, STABILIZER_WINDOW_DAYS, TEMP_STABILITY_THRESHOLD,
};
use crate::energy::{nameplate_kwh, resolve_energy};
use crate::model::ThermalProfile;
use crate::types::EnergySource;
use crate::weather::CompassDirection;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Summary of one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHistoryEntry {
    pub date: NaiveDate,
    pub heating_hours: f64,
    pub avg_delta_t: f64,
    /// Raw consumption from the winning energy source (kWh)
    pub energy_kwh: f64,
    pub avg_indoor_temp: f64,
    pub avg_outdoor_temp: f64,
    pub sample_count: u32,
    /// Stabilized K at archival time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k_7d: Option<f64>,
    /// Indoor max minus min over the day
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_variation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_wind_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_wind_direction: Option<CompassDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured_cop: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_source: Option<EnergySource>,
}

impl DailyHistoryEntry {
    /// Entry with the mandatory fields set and every optional field empty
    pub fn new(
        date: NaiveDate,
        heating_hours: f64,
        avg_delta_t: f64,
        energy_kwh: f64,
        avg_indoor_temp: f64,
        avg_outdoor_temp: f64,
        sample_count: u32,
    ) -> Self {
        Self {
            date,
            heating_hours,
            avg_delta_t,
            energy_kwh,
            avg_indoor_temp,
            avg_outdoor_temp,
            sample_count,
            k_7d: None,
            temp_variation: None,
            avg_wind_speed: None,
            dominant_wind_direction: None,
            measured_cop: None,
            energy_source: None,
        }
    }

    /// Missing variation counts as unstable
    pub fn is_stable(&self) -> bool {
        self.temp_variation
            .map(|v| v < TEMP_STABILITY_THRESHOLD)
            .unwrap_or(false)
    }
}

/// Ordered, de-duplicated, bounded list of daily entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLedger {
    entries: Vec<DailyHistoryEntry>,
    retention_days: usize,
}

impl DailyLedger {
    pub fn new(retention_days: usize) -> Self {
        Self {
            entries: Vec::new(),
            retention_days: retention_days.max(1),
        }
    }

    /// Add an entry. Returns false when the day has too few samples or is
    /// already present; the existing entry is kept in that case.
    pub fn insert(&mut self, entry: DailyHistoryEntry) -> bool {
        if entry.sample_count < MIN_DAILY_SAMPLES {
            return false;
        }
        if self.get(entry.date).is_some() {
            return false;
        }
        self.entries.push(entry);
        self.entries.sort_by_key(|e| e.date);
        if self.entries.len() > self.retention_days {
            let excess = self.entries.len() - self.retention_days;
            self.entries.drain(..excess);
        }
        true
    }

    pub fn get(&self, date: NaiveDate) -> Option<&DailyHistoryEntry> {
        self.entries.iter().find(|e| e.date == date)
    }

    pub fn entries(&self) -> &[DailyHistoryEntry] {
        &self.entries
    }

    /// The most recent `n` entries, oldest first
    pub fn recent(&self, n: usize) -> &[DailyHistoryEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn retention_days(&self) -> usize {
        self.retention_days
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Why a day did not contribute to the stabilized K
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    LowDeltaT,
    NoEnergy,
    /// Stable and barely heated, but below the comfort temperature
    TooCold,
    /// Too little heating without a stable temperature to vouch for it
    InsufficientHeating,
}

/// Classification of a day for the stabilizer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayClass {
    /// Day K measured from its energy (W/°C)
    Calculable(f64),
    /// Warm and stable with negligible heating
    Perfect,
    Discarded(DiscardReason),
}

/// K of a single day normalized to 24h, from the best energy source
pub fn day_k(entry: &DailyHistoryEntry, profile: &ThermalProfile) -> Option<f64> {
    if entry.avg_delta_t < MIN_DELTA_T {
        return None;
    }
    let energy = resolve_energy(
        None,
        Some(entry.energy_kwh),
        nameplate_kwh(profile.heater_power, entry.heating_hours),
    )?;
    Some(energy.thermal_wh(profile.efficiency) / (entry.avg_delta_t * 24.0))
}

pub fn classify_day(entry: &DailyHistoryEntry, profile: &ThermalProfile) -> DayClass {
    if entry.avg_delta_t < MIN_DELTA_T {
        return DayClass::Discarded(DiscardReason::LowDeltaT);
    }
    let stable = entry.is_stable();
    let heated = entry.heating_hours >= MIN_HEATING_TIME_HOURS
        || (stable && entry.heating_hours >= MIN_HEATING_TIME_STABLE_HOURS);

    if heated {
        return match day_k(entry, profile) {
            Some(k) => DayClass::Calculable(k),
            None => DayClass::Discarded(DiscardReason::NoEnergy),
        };
    }
    if stable && entry.heating_hours < MIN_HEATING_TIME_STABLE_HOURS {
        if entry.avg_indoor_temp >= MIN_COMFORT_TEMP {
            return DayClass::Perfect;
        }
        return DayClass::Discarded(DiscardReason::TooCold);
    }
    DayClass::Discarded(DiscardReason::InsufficientHeating)
}

/// Result of a stabilizer pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilizedK {
    pub k: f64,
    pub calculable_days: usize,
    pub perfect_days: usize,
}

/// Sample-count weighted K over the trailing week.
///
/// Perfect days are credited with the lowest measured day K, or `fallback_k`
/// when no day of the window was measurable. Returns `None` when no day
/// contributes.
pub fn stabilize(
    ledger: &DailyLedger,
    profile: &ThermalProfile,
    fallback_k: Option<f64>,
) -> Option<StabilizedK> {
    let window = ledger.recent(STABILIZER_WINDOW_DAYS);
    let classified: Vec<(&DailyHistoryEntry, DayClass)> = window
        .iter()
        .map(|entry| (entry, classify_day(entry, profile)))
        .collect();

    let k_min = classified
        .iter()
        .filter_map(|(_, class)| match class {
            DayClass::Calculable(k) => Some(*k),
            _ => None,
        })
        .fold(None, |min: Option<f64>, k| Some(min.map_or(k, |m| m.min(k))))
        .or(fallback_k);

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    let mut calculable_days = 0;
    let mut perfect_days = 0;

    for (entry, class) in &classified {
        let k = match class {
            DayClass::Calculable(k) => {
                calculable_days += 1;
                *k
            }
            DayClass::Perfect => match k_min {
                Some(k) => {
                    perfect_days += 1;
                    k
                }
                None => continue,
            },
            DayClass::Discarded(_) => continue,
        };
        let weight = entry.sample_count as f64;
        weighted += k * weight;
        total_weight += weight;
    }

    if total_weight <= 0.0 {
        return None;
    }
    Some(StabilizedK {
        k: weighted / total_weight,
        calculable_days,
        perfect_days,
    })
}
