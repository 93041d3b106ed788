//! Sensor collaborator contract
//!
//! The engine reads its inputs through [`SensorSource`]. A reading that is
//! not available is [`Reading::Unavailable`], never a zero.

use crate::realtime::window::fahrenheit_to_celsius;
use crate::weather::WeatherObservation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A sensor value or its absence
#[derive(Debug, Clone, PartialEq)]
pub enum Reading<T> {
    Value(T),
    Unavailable,
}

impl<T> Reading<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Reading::Value(v) => Some(v),
            Reading::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Value(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reading<U> {
        match self {
            Reading::Value(v) => Reading::Value(f(v)),
            Reading::Unavailable => Reading::Unavailable,
        }
    }
}

impl<T> From<Option<T>> for Reading<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Reading::Unavailable, Reading::Value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[default]
    #[serde(rename = "°C", alias = "C", alias = "celsius")]
    Celsius,
    #[serde(rename = "°F", alias = "F", alias = "fahrenheit")]
    Fahrenheit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub value: f64,
    #[serde(default)]
    pub unit: TemperatureUnit,
}

impl Temperature {
    pub fn celsius(value: f64) -> Self {
        Self {
            value,
            unit: TemperatureUnit::Celsius,
        }
    }

    pub fn fahrenheit(value: f64) -> Self {
        Self {
            value,
            unit: TemperatureUnit::Fahrenheit,
        }
    }

    pub fn to_celsius(&self) -> f64 {
        match self.unit {
            TemperatureUnit::Celsius => self.value,
            TemperatureUnit::Fahrenheit => fahrenheit_to_celsius(self.value),
        }
    }
}

/// State of a heating entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatingState {
    /// Switch or boolean helper
    Switch(bool),
    /// Climate entity
    Climate {
        #[serde(default)]
        hvac_action: Option<String>,
        #[serde(default)]
        hvac_mode: Option<String>,
    },
}

impl HeatingState {
    /// A reported action wins over the mode, which only tells what the
    /// device is allowed to do.
    pub fn is_heating(&self) -> bool {
        match self {
            HeatingState::Switch(on) => *on,
            HeatingState::Climate { hvac_action, hvac_mode } => {
                match hvac_action.as_deref().filter(|a| !a.is_empty()) {
                    Some(action) => matches!(action, "heating" | "heat"),
                    None => matches!(hvac_mode.as_deref(), Some("heat" | "heat_cool")),
                }
            }
        }
    }

    pub fn is_climate(&self) -> bool {
        matches!(self, HeatingState::Climate { .. })
    }
}

/// Read access to the host's sensors
pub trait SensorSource {
    fn temperature(&self, entity_id: &str) -> Reading<Temperature>;
    fn numeric(&self, entity_id: &str) -> Reading<f64>;
    fn heating_state(&self, entity_id: &str) -> Reading<HeatingState>;
    fn contact(&self, entity_id: &str) -> Reading<bool>;
    fn weather(&self, entity_id: &str) -> Reading<WeatherObservation>;
}

/// Last known state of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SensorState {
    Temperature(Temperature),
    Numeric(f64),
    Heating(HeatingState),
    Contact(bool),
    Weather(WeatherObservation),
}

impl SensorState {
    /// Value carried in a change notification
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SensorState::Temperature(t) => Some(t.to_celsius()),
            SensorState::Numeric(v) => Some(*v),
            _ => None,
        }
    }
}

/// Change notification routed to the zones listening to `entity_id`.
///
/// Temperatures are carried in °C.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorChange {
    pub entity_id: String,
    pub old: Option<f64>,
    pub new: Option<f64>,
    pub at: DateTime<Utc>,
}

/// In-memory [`SensorSource`]
#[derive(Debug, Clone, Default)]
pub struct StaticSensors {
    states: HashMap<String, SensorState>,
}

impl StaticSensors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a state and return the change it represents
    pub fn set(&mut self, entity_id: &str, state: SensorState, at: DateTime<Utc>) -> SensorChange {
        let new = state.as_number();
        let old = self
            .states
            .insert(entity_id.to_string(), state)
            .and_then(|previous| previous.as_number());
        SensorChange {
            entity_id: entity_id.to_string(),
            old,
            new,
            at,
        }
    }

    pub fn set_temperature(&mut self, entity_id: &str, celsius: f64) {
        self.states.insert(
            entity_id.to_string(),
            SensorState::Temperature(Temperature::celsius(celsius)),
        );
    }

    pub fn set_numeric(&mut self, entity_id: &str, value: f64) {
        self.states
            .insert(entity_id.to_string(), SensorState::Numeric(value));
    }

    pub fn set_heating(&mut self, entity_id: &str, state: HeatingState) {
        self.states
            .insert(entity_id.to_string(), SensorState::Heating(state));
    }

    pub fn set_contact(&mut self, entity_id: &str, open: bool) {
        self.states
            .insert(entity_id.to_string(), SensorState::Contact(open));
    }

    pub fn set_weather(&mut self, entity_id: &str, observation: WeatherObservation) {
        self.states
            .insert(entity_id.to_string(), SensorState::Weather(observation));
    }

    /// Make an entity unavailable; returns the change when it had a value
    pub fn mark_unavailable(&mut self, entity_id: &str, at: DateTime<Utc>) -> SensorChange {
        let old = self
            .states
            .remove(entity_id)
            .and_then(|previous| previous.as_number());
        SensorChange {
            entity_id: entity_id.to_string(),
            old,
            new: None,
            at,
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<&SensorState> {
        self.states.get(entity_id)
    }
}

impl SensorSource for StaticSensors {
    fn temperature(&self, entity_id: &str) -> Reading<Temperature> {
        match self.states.get(entity_id) {
            Some(SensorState::Temperature(t)) => Reading::Value(*t),
            Some(SensorState::Numeric(v)) => Reading::Value(Temperature::celsius(*v)),
            _ => Reading::Unavailable,
        }
    }

    fn numeric(&self, entity_id: &str) -> Reading<f64> {
        match self.states.get(entity_id) {
            Some(SensorState::Numeric(v)) if v.is_finite() => Reading::Value(*v),
            _ => Reading::Unavailable,
        }
    }

    fn heating_state(&self, entity_id: &str) -> Reading<HeatingState> {
        match self.states.get(entity_id) {
            Some(SensorState::Heating(state)) => Reading::Value(state.clone()),
            _ => Reading::Unavailable,
        }
    }

    fn contact(&self, entity_id: &str) -> Reading<bool> {
        match self.states.get(entity_id) {
            Some(SensorState::Contact(open)) => Reading::Value(*open),
            _ => Reading::Unavailable,
        }
    }

    fn weather(&self, entity_id: &str) -> Reading<WeatherObservation> {
        match self.states.get(entity_id) {
            Some(SensorState::Weather(obs)) => Reading::Value(obs.clone()),
            _ => Reading::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_climate_action_wins_over_mode() {
        let idle = HeatingState::Climate {
            hvac_action: Some("idle".to_string()),
            hvac_mode: Some("heat".to_string()),
        };
        assert!(!idle.is_heating());

        let heating = HeatingState::Climate {
            hvac_action: Some("heating".to_string()),
            hvac_mode: Some("off".to_string()),
        };
        assert!(heating.is_heating());

        let mode_only = HeatingState::Climate {
            hvac_action: None,
            hvac_mode: Some("heat_cool".to_string()),
        };
        assert!(mode_only.is_heating());

        let off = HeatingState::Climate {
            hvac_action: None,
            hvac_mode: Some("off".to_string()),
        };
        assert!(!off.is_heating());
        assert!(HeatingState::Switch(true).is_heating());
    }

    #[test]
    fn test_fahrenheit_reading() {
        let t = Temperature::fahrenheit(50.0);
        assert!((t.to_celsius() - 10.0).abs() < 1e-9);
        let json = r#"{"value": 68.0, "unit": "°F"}"#;
        let parsed: Temperature = serde_json::from_str(json).unwrap();
        assert!((parsed.to_celsius() - 20.0).abs() < 1e-9);
        let bare: Temperature = serde_json::from_str(r#"{"value": 21.5}"#).unwrap();
        assert_eq!(bare.unit, TemperatureUnit::Celsius);
    }

    #[test]
    fn test_static_sensors() {
        let mut sensors = StaticSensors::new();
        sensors.set_temperature("sensor.indoor", 20.5);
        sensors.set_numeric("sensor.power", 1200.0);
        sensors.set_contact("binary_sensor.window", true);

        assert_eq!(sensors.temperature("sensor.indoor").value().map(|t| t.value), Some(20.5));
        assert_eq!(sensors.numeric("sensor.power"), Reading::Value(1200.0));
        assert_eq!(sensors.contact("binary_sensor.window"), Reading::Value(true));
        assert!(!sensors.numeric("sensor.missing").is_available());
        assert!(!sensors.heating_state("sensor.power").is_available());
    }

    #[test]
    fn test_set_reports_change() {
        let at = Utc.with_ymd_and_hms(2025, 1, 15, 8, 0, 0).unwrap();
        let mut sensors = StaticSensors::new();
        let first = sensors.set("sensor.power", SensorState::Numeric(0.0), at);
        assert_eq!(first.old, None);
        let second = sensors.set("sensor.power", SensorState::Numeric(900.0), at);
        assert_eq!(second.old, Some(0.0));
        assert_eq!(second.new, Some(900.0));
        let gone = sensors.mark_unavailable("sensor.power", at);
        assert_eq!(gone.old, Some(900.0));
        assert_eq!(gone.new, None);
    }

    #[test]
    fn test_state_json() {
        let state: SensorState =
            serde_json::from_str(r#"{"kind": "heating", "value": {"climate": {"hvac_action": "heating"}}}"#)
                .unwrap();
        match state {
            SensorState::Heating(h) => assert!(h.is_heating()),
            other => panic!("unexpected state {other:?}"),
        }
    }
}
