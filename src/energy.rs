//! Energy accounting
//!
//! Three sources can report a zone's consumption. A calculation always uses
//! exactly one of them, picked in this order:
//! 1. an external cumulative energy counter
//! 2. trapezoidal integration of a sampled power reading
//! 3. declared heater power times measured heating duration

use crate::config::{MIN_DELTA_T, MIN_HEATING_TIME_HOURS};
use crate::types::{CopReading, CopStatus, EnergySource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// COP values outside this range point at a sensor configuration problem
pub const MIN_PLAUSIBLE_COP: f64 = 1.0;
pub const MAX_PLAUSIBLE_COP: f64 = 7.0;

/// Consumption picked for a calculation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEnergy {
    pub source: EnergySource,
    /// Raw consumption before the efficiency factor (kWh)
    pub kwh: f64,
}

impl ResolvedEnergy {
    /// Thermal-equivalent energy (Wh)
    pub fn thermal_wh(&self, efficiency: f64) -> f64 {
        self.kwh * 1000.0 * efficiency
    }
}

/// Pick the highest-priority source that reports a positive consumption.
pub fn resolve_energy(
    external_kwh: Option<f64>,
    measured_kwh: Option<f64>,
    nameplate_kwh: Option<f64>,
) -> Option<ResolvedEnergy> {
    [
        (EnergySource::External, external_kwh),
        (EnergySource::Measured, measured_kwh),
        (EnergySource::Nameplate, nameplate_kwh),
    ]
    .into_iter()
    .find_map(|(source, kwh)| match kwh {
        Some(kwh) if kwh > 0.0 && kwh.is_finite() => Some(ResolvedEnergy { source, kwh }),
        _ => None,
    })
}

/// Nameplate estimate for a heating duration
pub fn nameplate_kwh(heater_power_w: Option<f64>, heating_hours: f64) -> Option<f64> {
    heater_power_w
        .filter(|p| *p > 0.0)
        .map(|p| p / 1000.0 * heating_hours)
}

/// Trapezoidal integrator over a sampled power reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerIntegrator {
    last_power_w: Option<f64>,
    last_at: Option<DateTime<Utc>>,
}

impl PowerIntegrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a reading and return the energy (kWh) since the previous one.
    ///
    /// Unavailable readings are skipped: the next valid reading integrates
    /// across the gap.
    pub fn update(&mut self, at: DateTime<Utc>, power_w: Option<f64>) -> Option<f64> {
        let power = power_w.filter(|p| p.is_finite())?;
        let increment = match (self.last_power_w, self.last_at) {
            (Some(prev), Some(prev_at)) if at > prev_at => {
                let hours = (at - prev_at).num_milliseconds() as f64 / 3_600_000.0;
                Some(((prev + power) / 2.0 * hours / 1000.0).max(0.0))
            }
            _ => None,
        };
        self.last_power_w = Some(power);
        self.last_at = Some(at);
        increment
    }

    pub fn last_power(&self) -> Option<f64> {
        self.last_power_w
    }

    pub fn reset(&mut self) {
        self.last_power_w = None;
        self.last_at = None;
    }
}

/// Turns a cumulative counter into increments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterTracker {
    last_value: Option<f64>,
}

impl CounterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment since the previous reading. A counter that went backwards
    /// was reset, so its new value is the increment.
    pub fn update(&mut self, value: Option<f64>) -> f64 {
        let Some(value) = value.filter(|v| v.is_finite() && *v >= 0.0) else {
            return 0.0;
        };
        let increment = match self.last_value {
            Some(last) if value >= last => value - last,
            Some(_) => value,
            None => 0.0,
        };
        self.last_value = Some(value);
        increment
    }

    pub fn reset(&mut self) {
        self.last_value = None;
    }
}

/// Inputs of the dynamic COP estimate
#[derive(Debug, Clone, Copy)]
pub struct CopInputs {
    pub k: Option<f64>,
    pub avg_delta_t: Option<f64>,
    pub heating_hours: f64,
    /// Electrical energy consumed over the same period (kWh)
    pub energy_kwh: f64,
    pub data_ready: bool,
}

/// Effective COP: thermal output implied by K over electrical input.
pub fn dynamic_cop(inputs: CopInputs) -> CopReading {
    let k = match inputs.k {
        Some(k) if inputs.data_ready => k,
        _ => return CopReading { value: None, status: CopStatus::WaitingCalibration },
    };
    let delta_t = match inputs.avg_delta_t {
        Some(dt) if dt >= MIN_DELTA_T => dt,
        _ => return CopReading { value: None, status: CopStatus::InsufficientDeltaT },
    };
    if inputs.heating_hours < MIN_HEATING_TIME_HOURS {
        return CopReading { value: None, status: CopStatus::InsufficientHeatingTime };
    }
    if !(inputs.energy_kwh > 0.0) {
        return CopReading { value: None, status: CopStatus::NoEnergyData };
    }

    let thermal_kwh = k * delta_t * inputs.heating_hours / 1000.0;
    let cop = thermal_kwh / inputs.energy_kwh;
    let status = if cop < MIN_PLAUSIBLE_COP {
        CopStatus::LowCopWarning
    } else if cop > MAX_PLAUSIBLE_COP {
        CopStatus::HighCopWarning
    } else {
        CopStatus::Ok
    };
    CopReading { value: Some(cop), status }
}
