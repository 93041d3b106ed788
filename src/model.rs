//! Thermal loss model
//!
//! Holds one zone's sample buffer, energy marks and daily ledger, and derives
//! the rolling 24h K and the stabilized 7-day K from them.
//!
//! K is expressed in W/°C:
//!
//! ```text
//! K = energy_Wh × efficiency / (ΔT × duration_hours)
//! ```

use crate::buffer::{EnergyMark, RingBuffer, SampleBuffer};
use crate::config::{
    ZoneConfig, AGGREGATION_PERIOD_HOURS, DEFAULT_BUFFER_CAPACITY,
    DEFAULT_HISTORY_RETENTION_DAYS, MIN_AGGREGATION_POINTS, MIN_DATA_HOURS, MIN_DELTA_T,
    MIN_HEATING_TIME_HOURS,
};
use crate::energy::{nameplate_kwh, resolve_energy, ResolvedEnergy};
use crate::error::EngineError;
use crate::history::{classify_day, stabilize, DailyHistoryEntry, DailyLedger, DayClass};
use crate::insulation::{self, TempStability};
use crate::types::{AggregatedPeriod, InsulationStatus, LastValidK, SamplePoint};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Static thermal description of a zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalProfile {
    /// Declared heater power (W)
    pub heater_power: Option<f64>,
    pub efficiency: f64,
    /// m²
    pub surface: Option<f64>,
    /// m³
    pub volume: Option<f64>,
}

impl ThermalProfile {
    pub fn from_config(config: &ZoneConfig) -> Self {
        Self {
            heater_power: config.heater_power,
            efficiency: config.efficiency(),
            surface: config.surface,
            volume: config.volume,
        }
    }
}

impl Default for ThermalProfile {
    fn default() -> Self {
        Self {
            heater_power: None,
            efficiency: 1.0,
            surface: None,
            volume: None,
        }
    }
}

/// Serialized model state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub samples: SampleBuffer,
    pub energy_marks: RingBuffer<EnergyMark>,
    pub ledger: DailyLedger,
    pub k_24h: Option<f64>,
    pub k_7d: Option<f64>,
    pub last_valid: Option<LastValidK>,
    pub total_energy_kwh: f64,
    #[serde(default)]
    pub last_aggregation: Option<AggregatedPeriod>,
}

impl ModelSnapshot {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Per-zone thermal model
#[derive(Debug, Clone)]
pub struct ThermalModel {
    zone: String,
    profile: ThermalProfile,
    day_offset: FixedOffset,
    samples: SampleBuffer,
    energy_marks: RingBuffer<EnergyMark>,
    ledger: DailyLedger,
    k_24h: Option<f64>,
    k_7d: Option<f64>,
    last_valid: Option<LastValidK>,
    last_aggregation: Option<AggregatedPeriod>,
    /// Cumulative nameplate estimate (kWh)
    total_energy_kwh: f64,
}

impl ThermalModel {
    /// Model with default buffer capacity and history retention
    pub fn new(zone: &str, profile: ThermalProfile) -> Self {
        Self::with_capacity(zone, profile, DEFAULT_BUFFER_CAPACITY, DEFAULT_HISTORY_RETENTION_DAYS)
    }

    pub fn with_capacity(
        zone: &str,
        profile: ThermalProfile,
        buffer_capacity: usize,
        retention_days: usize,
    ) -> Self {
        Self {
            zone: zone.to_string(),
            profile,
            day_offset: Utc.fix(),
            samples: SampleBuffer::new(buffer_capacity),
            energy_marks: RingBuffer::new(buffer_capacity),
            ledger: DailyLedger::new(retention_days),
            k_24h: None,
            k_7d: None,
            last_valid: None,
            last_aggregation: None,
            total_energy_kwh: 0.0,
        }
    }

    /// Offset used to date the last valid K
    pub fn with_day_offset(mut self, offset: FixedOffset) -> Self {
        self.day_offset = offset;
        self
    }

    /// Append a sample with the energy observed since the previous one.
    ///
    /// Returns false when the sample is not newer than the last buffered one.
    pub fn add_sample(&mut self, point: SamplePoint, external_kwh: f64, measured_kwh: f64) -> bool {
        let previous = self.samples.last().copied();
        if !self.samples.push(point) {
            debug!(
                "[{}] Ignoring out-of-order sample at {}",
                self.zone, point.timestamp
            );
            return false;
        }
        self.energy_marks.push(EnergyMark {
            timestamp: point.timestamp,
            external_kwh: external_kwh.max(0.0),
            measured_kwh: measured_kwh.max(0.0),
        });

        if let Some(prev) = previous.filter(|p| p.heating_on) {
            let hours = hours_between(prev.timestamp, point.timestamp);
            if let Some(kwh) = nameplate_kwh(self.profile.heater_power, hours) {
                self.total_energy_kwh += kwh;
            }
        }

        if self.data_hours() >= MIN_DATA_HOURS {
            self.recalculate();
        }
        true
    }

    /// Recompute the rolling 24h K from the buffered samples.
    ///
    /// The aggregation cache is refreshed even when a guard rejects the
    /// window. Returns the K computed by this pass, if any; a rejected pass
    /// leaves the previous K in place.
    pub fn recalculate(&mut self) -> Option<f64> {
        let end = self.samples.last()?.timestamp;
        let start = end - Duration::seconds((AGGREGATION_PERIOD_HOURS * 3600.0) as i64);
        let points: Vec<SamplePoint> = self.samples.since(start).copied().collect();

        if points.len() < MIN_AGGREGATION_POINTS {
            debug!(
                "[{}] Not enough points for K calculation: {}",
                self.zone,
                points.len()
            );
            return None;
        }

        let aggregation = aggregate(&points)?;
        self.last_aggregation = Some(aggregation);

        if aggregation.delta_t() < MIN_DELTA_T {
            debug!(
                "[{}] ΔT too low for K calculation: {:.1}°C (min {:.1}°C)",
                self.zone,
                aggregation.delta_t(),
                MIN_DELTA_T
            );
            return None;
        }
        if aggregation.heating_hours() < MIN_HEATING_TIME_HOURS {
            debug!(
                "[{}] Heating time too low: {:.2}h (min {:.1}h)",
                self.zone,
                aggregation.heating_hours(),
                MIN_HEATING_TIME_HOURS
            );
            return None;
        }

        let Some(energy) = self.window_energy(&aggregation) else {
            debug!("[{}] No energy source available for K calculation", self.zone);
            return None;
        };

        let k = energy.thermal_wh(self.profile.efficiency)
            / (aggregation.delta_t() * aggregation.duration_hours());
        self.k_24h = Some(k);
        self.touch_last_valid(self.local_date(end));

        info!(
            "[{}] K(24h) = {:.1} W/°C (ΔT={:.1}°C, heating={:.2}h, energy={:.2} kWh {:?})",
            self.zone,
            k,
            aggregation.delta_t(),
            aggregation.heating_hours(),
            energy.kwh,
            energy.source
        );
        Some(k)
    }

    /// Energy consumed inside an aggregation window
    fn window_energy(&self, aggregation: &AggregatedPeriod) -> Option<ResolvedEnergy> {
        let (external, measured) = self
            .energy_marks
            .iter()
            .filter(|m| m.timestamp > aggregation.start && m.timestamp <= aggregation.end)
            .fold((0.0, 0.0), |(ext, meas), m| {
                (ext + m.external_kwh, meas + m.measured_kwh)
            });
        resolve_energy(
            Some(external),
            Some(measured),
            nameplate_kwh(self.profile.heater_power, aggregation.heating_hours()),
        )
    }

    /// Archive a finished day into the ledger and refresh the 7-day K.
    ///
    /// The 7-day K and the last valid K only move when the archived day
    /// contributes to the stabilizer; discarded days leave both frozen.
    /// Returns false when the ledger rejected the entry.
    pub fn archive_day(&mut self, entry: DailyHistoryEntry) -> bool {
        let date = entry.date;
        let samples = entry.sample_count;
        let class = classify_day(&entry, &self.profile);
        if !self.ledger.insert(entry) {
            debug!(
                "[{}] Daily entry for {} rejected ({} samples, {} days in history)",
                self.zone,
                date,
                samples,
                self.ledger.len()
            );
            return false;
        }
        info!(
            "[{}] Archived {} ({} days in history)",
            self.zone,
            date,
            self.ledger.len()
        );
        match class {
            DayClass::Calculable(_) | DayClass::Perfect => {
                self.recompute_7day_k();
            }
            DayClass::Discarded(reason) => {
                debug!("[{}] {} discarded ({:?}), 7-day K kept", self.zone, date, reason);
            }
        }
        true
    }

    /// Re-estimate the stabilized K from the trailing week of history.
    ///
    /// Leaves the previous value untouched when no day qualifies.
    pub fn recompute_7day_k(&mut self) -> Option<f64> {
        let Some(result) = stabilize(&self.ledger, &self.profile, self.k_24h) else {
            debug!(
                "[{}] No valid days for 7-day K ({} days in history)",
                self.zone,
                self.ledger.len()
            );
            return None;
        };
        self.k_7d = Some(result.k);
        if let Some(date) = self.reference_date() {
            self.touch_last_valid(date);
        }
        info!(
            "[{}] K(7d) = {:.1} W/°C ({} measured, {} perfect days)",
            self.zone, result.k, result.calculable_days, result.perfect_days
        );
        Some(result.k)
    }

    /// Clear the ledger and the 7-day K. The last valid K is kept.
    pub fn reset_history(&mut self) {
        self.ledger.clear();
        self.k_7d = None;
        info!("[{}] History reset, last valid K kept", self.zone);
    }

    /// Return to the pre-calibration state
    pub fn reset_all(&mut self) {
        self.samples.clear();
        self.energy_marks.clear();
        self.ledger.clear();
        self.k_24h = None;
        self.k_7d = None;
        self.last_valid = None;
        self.last_aggregation = None;
        self.total_energy_kwh = 0.0;
        info!("[{}] Full reset", self.zone);
    }

    fn touch_last_valid(&mut self, date: NaiveDate) {
        if let Some(k) = self.current_k() {
            self.last_valid = Some(LastValidK { k, date });
        }
    }

    fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.day_offset).date_naive()
    }

    fn reference_date(&self) -> Option<NaiveDate> {
        self.samples
            .last()
            .map(|p| self.local_date(p.timestamp))
            .or_else(|| self.ledger.entries().last().map(|e| e.date))
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn profile(&self) -> &ThermalProfile {
        &self.profile
    }

    pub fn samples(&self) -> &SampleBuffer {
        &self.samples
    }

    pub fn ledger(&self) -> &DailyLedger {
        &self.ledger
    }

    pub fn k_24h(&self) -> Option<f64> {
        self.k_24h
    }

    pub fn k_7d(&self) -> Option<f64> {
        self.k_7d
    }

    /// Stabilized K when available, rolling K otherwise
    pub fn current_k(&self) -> Option<f64> {
        self.k_7d.or(self.k_24h)
    }

    pub fn k_per_area(&self) -> Option<f64> {
        per_unit(self.current_k(), self.profile.surface)
    }

    pub fn k_per_volume(&self) -> Option<f64> {
        per_unit(self.current_k(), self.profile.volume)
    }

    pub fn last_valid(&self) -> Option<LastValidK> {
        self.last_valid
    }

    pub fn last_aggregation(&self) -> Option<&AggregatedPeriod> {
        self.last_aggregation.as_ref()
    }

    pub fn total_energy_kwh(&self) -> f64 {
        self.total_energy_kwh
    }

    pub fn data_hours(&self) -> f64 {
        self.samples.span_hours()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn data_ready(&self) -> bool {
        self.data_hours() >= MIN_DATA_HOURS
    }

    pub fn history_days(&self) -> usize {
        self.ledger.len()
    }

    /// Indoor temperature spread over the trailing 24h
    pub fn temp_stability(&self) -> TempStability {
        let Some(end) = self.samples.last().map(|p| p.timestamp) else {
            return TempStability::unknown();
        };
        let start = end - Duration::seconds((AGGREGATION_PERIOD_HOURS * 3600.0) as i64);
        let temps: Vec<f64> = self.samples.since(start).map(|p| p.indoor_temp).collect();
        TempStability::from_temperatures(&temps)
    }

    /// Current insulation verdict
    pub fn insulation_status(&self) -> InsulationStatus {
        insulation::classify(self)
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            samples: self.samples.clone(),
            energy_marks: self.energy_marks.clone(),
            ledger: self.ledger.clone(),
            k_24h: self.k_24h,
            k_7d: self.k_7d,
            last_valid: self.last_valid,
            total_energy_kwh: self.total_energy_kwh,
            last_aggregation: self.last_aggregation,
        }
    }

    /// Load persisted state, keeping this model's capacity and retention.
    pub fn restore(&mut self, snapshot: ModelSnapshot) {
        self.samples = SampleBuffer::new(self.samples.capacity());
        for point in snapshot.samples.iter() {
            self.samples.push(*point);
        }
        self.energy_marks = RingBuffer::new(self.energy_marks.capacity());
        for mark in snapshot.energy_marks.iter() {
            self.energy_marks.push(*mark);
        }
        self.ledger = DailyLedger::new(self.ledger.retention_days());
        for entry in snapshot.ledger.entries() {
            self.ledger.insert(entry.clone());
        }
        self.k_24h = snapshot.k_24h.filter(|k| *k >= 0.0);
        self.k_7d = snapshot.k_7d.filter(|k| *k >= 0.0);
        self.last_valid = snapshot.last_valid;
        self.total_energy_kwh = snapshot.total_energy_kwh;
        self.last_aggregation = snapshot.last_aggregation;
        info!(
            "[{}] Restored {} samples, {} history days, K(24h)={:?}, K(7d)={:?}",
            self.zone,
            self.samples.len(),
            self.ledger.len(),
            self.k_24h,
            self.k_7d
        );
    }

    pub fn from_json(
        zone: &str,
        profile: ThermalProfile,
        json: &str,
    ) -> Result<Self, EngineError> {
        let snapshot = ModelSnapshot::from_json(json)?;
        let mut model = Self::new(zone, profile);
        model.restore(snapshot);
        Ok(model)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(self.snapshot().to_json()?)
    }
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

fn per_unit(k: Option<f64>, dimension: Option<f64>) -> Option<f64> {
    match (k, dimension) {
        (Some(k), Some(d)) if d > 0.0 => Some(k / d),
        _ => None,
    }
}

/// Step integration: each interval counts as heating when its starting
/// sample was heating.
fn aggregate(points: &[SamplePoint]) -> Option<AggregatedPeriod> {
    let first = points.first()?;
    let last = points.last()?;
    let count = points.len() as f64;

    let heating_seconds: f64 = points
        .windows(2)
        .filter(|pair| pair[0].heating_on)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .sum();

    Some(AggregatedPeriod {
        start: first.timestamp,
        end: last.timestamp,
        heating_seconds,
        avg_indoor_temp: points.iter().map(|p| p.indoor_temp).sum::<f64>() / count,
        avg_outdoor_temp: points.iter().map(|p| p.outdoor_temp).sum::<f64>() / count,
        sample_count: points.len(),
    })
}
