//! Core types for the Thermal Flux engine
//!
//! This module defines the records that flow between the stages of the
//! engine: buffered samples, window aggregations, insulation verdicts and the
//! published zone snapshot.

use crate::weather::WindReading;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One periodic observation of a zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub timestamp: DateTime<Utc>,
    /// Indoor temperature (°C)
    pub indoor_temp: f64,
    /// Outdoor temperature (°C)
    pub outdoor_temp: f64,
    pub heating_on: bool,
}

impl SamplePoint {
    pub fn new(timestamp: DateTime<Utc>, indoor_temp: f64, outdoor_temp: f64, heating_on: bool) -> Self {
        Self {
            timestamp,
            indoor_temp,
            outdoor_temp,
            heating_on,
        }
    }

    pub fn delta_t(&self) -> f64 {
        self.indoor_temp - self.outdoor_temp
    }
}

/// Aggregation of the buffered samples over a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Seconds attributed to heating, never longer than the window
    pub heating_seconds: f64,
    pub avg_indoor_temp: f64,
    pub avg_outdoor_temp: f64,
    pub sample_count: usize,
}

impl AggregatedPeriod {
    pub fn duration_hours(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 3_600_000.0
    }

    pub fn heating_hours(&self) -> f64 {
        self.heating_seconds / 3600.0
    }

    pub fn delta_t(&self) -> f64 {
        self.avg_indoor_temp - self.avg_outdoor_temp
    }

    /// Heating duty ratio (0-1)
    pub fn heating_ratio(&self) -> f64 {
        let duration = self.duration_hours();
        if duration <= 0.0 {
            return 0.0;
        }
        (self.heating_hours() / duration).clamp(0.0, 1.0)
    }
}

/// Season tag derived from the last aggregation ΔT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    /// Outdoor warmer than indoor
    Summer,
    /// ΔT too small to measure anything
    OffSeason,
    HeatingSeason,
}

/// Insulation verdict state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsulationState {
    WaitingData,
    WaitingHeat,
    Calculated,
    ExcellentInferred,
}

/// Insulation rating bucket (K per m³ thresholds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsulationRating {
    Excellent,
    Good,
    Average,
    Poor,
    VeryPoor,
    ExcellentInferred,
}

impl InsulationRating {
    /// Rate a volumetric loss coefficient (W/°C/m³)
    pub fn from_k_per_volume(k_per_m3: f64) -> Self {
        if k_per_m3 < 0.4 {
            InsulationRating::Excellent
        } else if k_per_m3 < 0.7 {
            InsulationRating::Good
        } else if k_per_m3 < 1.0 {
            InsulationRating::Average
        } else if k_per_m3 < 1.5 {
            InsulationRating::Poor
        } else {
            InsulationRating::VeryPoor
        }
    }
}

/// Where a published K value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KSource {
    Calculated,
    Inferred,
    LastValid,
}

/// Last successfully computed K, kept across seasons and history resets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastValidK {
    /// W/°C
    pub k: f64,
    pub date: NaiveDate,
}

/// Insulation classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsulationStatus {
    pub state: InsulationState,
    pub season: Season,
    pub rating: Option<InsulationRating>,
    pub k_value: Option<f64>,
    pub k_source: Option<KSource>,
    pub last_valid_date: Option<NaiveDate>,
    pub temp_stable: bool,
    pub message: Option<String>,
}

/// Provenance of an energy figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergySource {
    /// Externally metered cumulative counter
    External,
    /// Integrated from a sampled power reading
    Measured,
    /// Declared heater power times heating duration
    Nameplate,
}

/// How heating activity is detected for a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatingDetectionMethod {
    PowerSensor,
    Climate,
    Switch,
    Unknown,
}

/// How the window-open flag was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowDetectionMethod {
    /// Contact sensor
    Sensor,
    /// Real-time rate-of-change detector
    Realtime,
    /// Refresh-to-refresh comparison
    Polling,
}

/// Dynamic COP sanity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopStatus {
    Disabled,
    WaitingCalibration,
    InsufficientDeltaT,
    InsufficientHeatingTime,
    NoEnergyData,
    LowCopWarning,
    HighCopWarning,
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CopReading {
    pub value: Option<f64>,
    pub status: CopStatus,
}

/// Data readiness summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataReadiness {
    /// Buffered span in hours
    pub data_hours: f64,
    pub sample_count: usize,
    /// True once the buffered span reaches the calculation threshold
    pub ready: bool,
}

/// Energy observed so far today
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyEnergy {
    pub estimated_kwh: Option<f64>,
    pub measured_kwh: Option<f64>,
    pub external_kwh: Option<f64>,
    pub source: Option<EnergySource>,
    /// Value from the highest-priority available source
    pub kwh: Option<f64>,
}

/// Engine identity embedded in every snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Published state of a zone after a refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub zone: String,
    pub producer: Producer,
    pub computed_at: DateTime<Utc>,
    pub indoor_temp: Option<f64>,
    pub outdoor_temp: Option<f64>,
    pub delta_t: Option<f64>,
    pub heating_on: Option<bool>,
    pub heating_detection: HeatingDetectionMethod,
    pub window_open: bool,
    pub window_detection: Option<WindowDetectionMethod>,
    /// W/°C over the trailing 24h
    pub k_24h: Option<f64>,
    /// W/°C stabilized over 7 days
    pub k_7d: Option<f64>,
    /// 7-day value when available, else 24h
    pub k_current: Option<f64>,
    pub k_per_area: Option<f64>,
    pub k_per_volume: Option<f64>,
    pub heating_hours_24h: Option<f64>,
    pub heating_ratio_24h: Option<f64>,
    pub heating_hours_today: f64,
    pub avg_delta_t_24h: Option<f64>,
    pub daily_energy: DailyEnergy,
    pub total_estimated_energy_kwh: f64,
    pub total_measured_energy_kwh: f64,
    pub readiness: DataReadiness,
    pub history_days: usize,
    pub insulation: InsulationStatus,
    pub last_valid_k: Option<LastValidK>,
    pub cop: CopReading,
    pub wind: WindReading,
    /// True when no fresh readings were available and restored values are republished
    pub stale: bool,
}
