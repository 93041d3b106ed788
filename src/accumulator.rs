//! Calendar-day accumulators
//!
//! Counters collected between two day boundaries and folded into a
//! [`DailyHistoryEntry`] when the day ends.

use crate::energy::resolve_energy;
use crate::history::DailyHistoryEntry;
use crate::types::{DailyEnergy, EnergySource};
use crate::weather::CompassDirection;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayAccumulators {
    /// Day being accumulated, `None` until the first refresh
    pub date: Option<NaiveDate>,
    pub heating_seconds: f64,
    /// Nameplate estimate (kWh)
    pub estimated_kwh: f64,
    /// Integrated from the power sensor (kWh)
    pub measured_kwh: f64,
    /// Sum of external counter increments (kWh)
    pub external_kwh: f64,
    pub delta_t_sum: f64,
    pub delta_t_count: u32,
    pub indoor_sum: f64,
    pub outdoor_sum: f64,
    pub indoor_min: Option<f64>,
    pub indoor_max: Option<f64>,
    pub wind_speed_sum: f64,
    pub wind_speed_count: u32,
    /// Readings per compass point, indexed like [`CompassDirection::ALL`]
    #[serde(default)]
    pub wind_directions: [u32; 8],
}

impl DayAccumulators {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::default()
        }
    }

    /// Polled temperatures of one refresh
    pub fn record_sample(&mut self, indoor: f64, outdoor: f64) {
        self.delta_t_sum += indoor - outdoor;
        self.delta_t_count += 1;
        self.indoor_sum += indoor;
        self.outdoor_sum += outdoor;
        self.indoor_min = Some(self.indoor_min.map_or(indoor, |m| m.min(indoor)));
        self.indoor_max = Some(self.indoor_max.map_or(indoor, |m| m.max(indoor)));
    }

    pub fn add_heating(&mut self, seconds: f64, estimated_kwh: Option<f64>) {
        if seconds > 0.0 {
            self.heating_seconds += seconds;
        }
        if let Some(kwh) = estimated_kwh.filter(|k| *k > 0.0) {
            self.estimated_kwh += kwh;
        }
    }

    pub fn record_wind(&mut self, speed: Option<f64>, direction: Option<CompassDirection>) {
        if let Some(speed) = speed.filter(|s| s.is_finite()) {
            self.wind_speed_sum += speed;
            self.wind_speed_count += 1;
        }
        if let Some(direction) = direction {
            self.wind_directions[direction.index()] += 1;
        }
    }

    pub fn has_samples(&self) -> bool {
        self.delta_t_count > 0
    }

    pub fn heating_hours(&self) -> f64 {
        self.heating_seconds / 3600.0
    }

    pub fn avg_delta_t(&self) -> Option<f64> {
        average(self.delta_t_sum, self.delta_t_count)
    }

    pub fn temp_variation(&self) -> Option<f64> {
        match (self.indoor_min, self.indoor_max) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }

    pub fn avg_wind_speed(&self) -> Option<f64> {
        average(self.wind_speed_sum, self.wind_speed_count)
    }

    /// Most frequent compass point; ties go to the earlier point
    pub fn dominant_wind_direction(&self) -> Option<CompassDirection> {
        let mut best: Option<(usize, u32)> = None;
        for (index, count) in self.wind_directions.iter().copied().enumerate() {
            if count > best.map_or(0, |(_, c)| c) {
                best = Some((index, count));
            }
        }
        best.map(|(index, _)| CompassDirection::ALL[index])
    }

    /// Energy so far today, with the `ongoing_*` amounts of an open heating
    /// session added to the estimate. A source is present only when configured.
    pub fn daily_energy(
        &self,
        ongoing_estimated_kwh: f64,
        has_nameplate: bool,
        has_power_sensor: bool,
        has_energy_sensor: bool,
    ) -> DailyEnergy {
        let estimated = has_nameplate.then_some(self.estimated_kwh + ongoing_estimated_kwh);
        let measured = has_power_sensor.then_some(self.measured_kwh);
        let external = has_energy_sensor.then_some(self.external_kwh);
        let resolved = resolve_energy(external, measured, estimated);
        DailyEnergy {
            estimated_kwh: estimated,
            measured_kwh: measured,
            external_kwh: external,
            source: resolved.map(|r| r.source),
            kwh: resolved.map(|r| r.kwh),
        }
    }

    /// Fold the counters into a history entry. `None` when no sample was
    /// recorded or the day is unknown.
    pub fn to_entry(&self, k_7d: Option<f64>, measured_cop: Option<f64>) -> Option<DailyHistoryEntry> {
        let date = self.date?;
        let avg_delta_t = self.avg_delta_t()?;
        let count = f64::from(self.delta_t_count);
        let resolved = resolve_energy(
            Some(self.external_kwh),
            Some(self.measured_kwh),
            Some(self.estimated_kwh),
        );

        let mut entry = DailyHistoryEntry::new(
            date,
            self.heating_hours(),
            avg_delta_t,
            resolved.map_or(0.0, |r| r.kwh),
            self.indoor_sum / count,
            self.outdoor_sum / count,
            self.delta_t_count,
        );
        entry.k_7d = k_7d;
        entry.temp_variation = self.temp_variation();
        entry.avg_wind_speed = self.avg_wind_speed();
        entry.dominant_wind_direction = self.dominant_wind_direction();
        entry.measured_cop = measured_cop;
        entry.energy_source = resolved.map(|r| r.source);
        Some(entry)
    }

    /// Start accumulating `date` from zero
    pub fn reset(&mut self, date: NaiveDate) {
        *self = Self::new(date);
    }
}

/// Source label for the day's energy, used in logs
pub fn source_label(source: Option<EnergySource>) -> &'static str {
    match source {
        Some(EnergySource::External) => "external",
        Some(EnergySource::Measured) => "measured",
        Some(EnergySource::Nameplate) => "nameplate",
        None => "none",
    }
}

fn average(sum: f64, count: u32) -> Option<f64> {
    (count > 0).then(|| sum / f64::from(count))
}
