//! Insulation status classifier
//!
//! Pure function of a [`ThermalModel`]: season tag, temperature stability
//! and K availability are turned into a user-facing verdict. Outside the
//! heating season the last valid K and its rating are surfaced unchanged.

use crate::config::{
    EXCELLENT_INFERENCE_MIN_HOURS, MIN_AGGREGATION_POINTS, MIN_DATA_HOURS, MIN_DELTA_T,
    MIN_HEATING_TIME_HOURS, TEMP_STABILITY_THRESHOLD,
};
use crate::model::ThermalModel;
use crate::types::{
    AggregatedPeriod, InsulationRating, InsulationState, InsulationStatus, KSource, Season,
};
use serde::{Deserialize, Serialize};

/// Indoor temperature spread over the aggregation window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempStability {
    pub stable: bool,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub variation: Option<f64>,
}

impl TempStability {
    pub fn unknown() -> Self {
        Self {
            stable: false,
            min_temp: None,
            max_temp: None,
            variation: None,
        }
    }

    /// Too few readings count as unknown (and therefore unstable)
    pub fn from_temperatures(temps: &[f64]) -> Self {
        if temps.len() < MIN_AGGREGATION_POINTS {
            return Self::unknown();
        }
        let min = temps.iter().copied().fold(f64::INFINITY, f64::min);
        let max = temps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let variation = max - min;
        Self {
            stable: variation < TEMP_STABILITY_THRESHOLD,
            min_temp: Some(min),
            max_temp: Some(max),
            variation: Some(variation),
        }
    }
}

/// Season from the most recent aggregation; heating season until one exists
pub fn season(aggregation: Option<&AggregatedPeriod>) -> Season {
    match aggregation {
        None => Season::HeatingSeason,
        Some(agg) if agg.delta_t() < 0.0 => Season::Summer,
        Some(agg) if agg.delta_t() < MIN_DELTA_T => Season::OffSeason,
        Some(_) => Season::HeatingSeason,
    }
}

/// Rating of a K value for the given heated volume
pub fn rating_for(k: Option<f64>, volume: Option<f64>) -> Option<InsulationRating> {
    match (k, volume) {
        (Some(k), Some(v)) if v > 0.0 => Some(InsulationRating::from_k_per_volume(k / v)),
        _ => None,
    }
}

/// A cold day where the room held its temperature with almost no heating
pub fn excellent_by_inference(model: &ThermalModel) -> bool {
    if model.data_hours() < EXCELLENT_INFERENCE_MIN_HOURS {
        return false;
    }
    let Some(agg) = model.last_aggregation() else {
        return false;
    };
    agg.delta_t() >= MIN_DELTA_T
        && agg.heating_hours() < MIN_HEATING_TIME_HOURS
        && model.temp_stability().stable
}

pub fn classify(model: &ThermalModel) -> InsulationStatus {
    let season = season(model.last_aggregation());
    let stability = model.temp_stability();
    let volume = model.profile().volume;
    let last_valid = model.last_valid();
    let last_valid_k = last_valid.map(|lv| lv.k);

    let frozen = |state: InsulationState, rating: Option<InsulationRating>, message: &str| {
        InsulationStatus {
            state,
            season,
            rating,
            k_value: last_valid_k,
            k_source: last_valid.map(|_| KSource::LastValid),
            last_valid_date: last_valid.map(|lv| lv.date),
            temp_stable: stability.stable,
            message: Some(message.to_string()),
        }
    };

    if model.data_hours() < MIN_DATA_HOURS {
        return frozen(InsulationState::WaitingData, None, "Data collection in progress");
    }

    match season {
        Season::Summer => {
            return frozen(
                InsulationState::WaitingData,
                rating_for(last_valid_k, volume),
                "Summer mode - measurement not possible",
            )
        }
        Season::OffSeason => {
            return frozen(
                InsulationState::WaitingData,
                rating_for(last_valid_k, volume),
                "Off-season - ΔT insufficient",
            )
        }
        Season::HeatingSeason => {}
    }

    if model.k_24h().is_some() {
        let k = model.current_k();
        return InsulationStatus {
            state: InsulationState::Calculated,
            season,
            rating: rating_for(k, volume),
            k_value: k,
            k_source: Some(KSource::Calculated),
            last_valid_date: last_valid.map(|lv| lv.date),
            temp_stable: stability.stable,
            message: None,
        };
    }

    if excellent_by_inference(model) {
        return InsulationStatus {
            state: InsulationState::ExcellentInferred,
            season,
            rating: Some(InsulationRating::ExcellentInferred),
            k_value: None,
            k_source: Some(KSource::Inferred),
            last_valid_date: last_valid.map(|lv| lv.date),
            temp_stable: true,
            message: Some("Excellent - minimal heating needed".to_string()),
        };
    }

    if model.last_aggregation().is_some() && !stability.stable {
        return frozen(
            InsulationState::WaitingHeat,
            None,
            "Insufficient heating - unstable temperature",
        );
    }
    frozen(InsulationState::WaitingHeat, None, "Waiting for heating")
}
