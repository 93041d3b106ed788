//! Zone and engine configuration
//!
//! Zones are described by [`ZoneConfig`] records loaded from JSON. Analysis
//! thresholds are plain constants shared by every zone.

use crate::error::EngineError;
use crate::weather::CompassDirection;
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Rolling aggregation window for the 24h K calculation
pub const AGGREGATION_PERIOD_HOURS: f64 = 24.0;
/// Buffered span required before any K calculation is attempted
pub const MIN_DATA_HOURS: f64 = 12.0;
/// Minimum indoor/outdoor difference (°C) for a meaningful K
pub const MIN_DELTA_T: f64 = 5.0;
/// Heating time required in the window (or per day) for a K calculation
pub const MIN_HEATING_TIME_HOURS: f64 = 0.5;
/// Reduced heating requirement for days with a stable indoor temperature
pub const MIN_HEATING_TIME_STABLE_HOURS: f64 = 0.1;
/// Points required inside the aggregation window
pub const MIN_AGGREGATION_POINTS: usize = 10;
/// Samples a day needs before it may enter the history ledger
pub const MIN_DAILY_SAMPLES: u32 = 10;
/// Indoor max-min (°C) under which the temperature counts as stable
pub const TEMP_STABILITY_THRESHOLD: f64 = 3.0;
/// Average indoor temperature a perfect day must reach
pub const MIN_COMFORT_TEMP: f64 = 17.0;
/// Data span required before "excellent" can be inferred without heating
pub const EXCELLENT_INFERENCE_MIN_HOURS: f64 = 24.0;
/// Days considered by the 7-day stabilizer
pub const STABILIZER_WINDOW_DAYS: usize = 7;
/// Default ledger retention (5 years of daily entries)
pub const DEFAULT_HISTORY_RETENTION_DAYS: usize = 1825;
/// 48h of samples at one-minute cadence
pub const DEFAULT_BUFFER_CAPACITY: usize = 2 * 1440;
/// Power (W) above which a heater counts as running
pub const DEFAULT_POWER_THRESHOLD: f64 = 50.0;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SAVE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_NOTIFICATION_DELAY_MINUTES: u32 = 2;
/// Minimum spacing between two window alerts for the same zone
pub const NOTIFICATION_COOLDOWN_SECS: i64 = 15 * 60;

/// Kind of heat source feeding the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatSourceType {
    #[default]
    Electric,
    Heatpump,
    /// Accepts the legacy `gas` spelling
    #[serde(alias = "gas")]
    GasBoiler,
    GasFurnace,
    District,
}

impl HeatSourceType {
    /// Thermal output per unit of consumed energy
    pub fn default_efficiency(&self) -> f64 {
        match self {
            HeatSourceType::Electric => 1.0,
            HeatSourceType::Heatpump => 3.0,
            HeatSourceType::GasBoiler => 0.90,
            HeatSourceType::GasFurnace => 0.85,
            HeatSourceType::District => 1.0,
        }
    }

    /// Sources whose consumption cannot be derived from a nameplate power
    pub fn requires_energy_sensor(&self) -> bool {
        !matches!(self, HeatSourceType::Electric)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HeatSourceType::Electric => "electric",
            HeatSourceType::Heatpump => "heatpump",
            HeatSourceType::GasBoiler => "gas_boiler",
            HeatSourceType::GasFurnace => "gas_furnace",
            HeatSourceType::District => "district",
        }
    }
}

fn default_power_threshold() -> f64 {
    DEFAULT_POWER_THRESHOLD
}

fn default_notification_delay() -> u32 {
    DEFAULT_NOTIFICATION_DELAY_MINUTES
}

fn default_true() -> bool {
    true
}

/// Configuration of a single monitored zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Zone name, unique within an engine
    pub name: String,
    pub indoor_temp_sensor: String,
    pub outdoor_temp_sensor: String,
    /// Climate or switch entity reporting heating activity
    #[serde(default)]
    pub heating_entity: Option<String>,
    #[serde(default)]
    pub heat_source_type: HeatSourceType,
    /// Overrides the heat source's default efficiency
    #[serde(default)]
    pub efficiency_factor: Option<f64>,
    /// Declared heater power (W)
    #[serde(default)]
    pub heater_power: Option<f64>,
    #[serde(default)]
    pub power_sensor: Option<String>,
    #[serde(default = "default_power_threshold")]
    pub power_threshold: f64,
    /// Cumulative energy counter (kWh)
    #[serde(default)]
    pub energy_sensor: Option<String>,
    #[serde(default)]
    pub window_sensor: Option<String>,
    #[serde(default)]
    pub weather_entity: Option<String>,
    #[serde(default)]
    pub room_orientation: Option<CompassDirection>,
    /// Floor surface (m²)
    #[serde(default)]
    pub surface: Option<f64>,
    /// Heated volume (m³)
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub window_notification_enabled: bool,
    #[serde(default = "default_notification_delay")]
    pub notification_delay_minutes: u32,
    #[serde(default = "default_true")]
    pub enable_dynamic_cop: bool,
    /// Offset applied to timestamps when deciding calendar days
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl ZoneConfig {
    /// Minimal configuration with every optional field at its default
    pub fn new(name: &str, indoor_temp_sensor: &str, outdoor_temp_sensor: &str) -> Self {
        Self {
            name: name.to_string(),
            indoor_temp_sensor: indoor_temp_sensor.to_string(),
            outdoor_temp_sensor: outdoor_temp_sensor.to_string(),
            heating_entity: None,
            heat_source_type: HeatSourceType::Electric,
            efficiency_factor: None,
            heater_power: None,
            power_sensor: None,
            power_threshold: DEFAULT_POWER_THRESHOLD,
            energy_sensor: None,
            window_sensor: None,
            weather_entity: None,
            room_orientation: None,
            surface: None,
            volume: None,
            window_notification_enabled: false,
            notification_delay_minutes: DEFAULT_NOTIFICATION_DELAY_MINUTES,
            enable_dynamic_cop: true,
            utc_offset_minutes: 0,
        }
    }

    /// Effective efficiency factor
    pub fn efficiency(&self) -> f64 {
        self.efficiency_factor
            .unwrap_or_else(|| self.heat_source_type.default_efficiency())
    }

    /// Dynamic COP only makes sense for a metered heat pump
    pub fn dynamic_cop_enabled(&self) -> bool {
        self.enable_dynamic_cop
            && self.heat_source_type == HeatSourceType::Heatpump
            && self.energy_sensor.is_some()
    }

    /// Offset used for day boundaries
    pub fn day_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Calendar date of a timestamp in the zone's day offset
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.day_offset()).date_naive()
    }

    /// File-system friendly name
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    /// Every entity this zone listens to
    pub fn entities(&self) -> Vec<&str> {
        let mut entities = vec![
            self.indoor_temp_sensor.as_str(),
            self.outdoor_temp_sensor.as_str(),
        ];
        for optional in [
            &self.heating_entity,
            &self.power_sensor,
            &self.energy_sensor,
            &self.window_sensor,
            &self.weather_entity,
        ] {
            if let Some(entity) = optional {
                entities.push(entity.as_str());
            }
        }
        entities
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() || self.slug().is_empty() {
            return Err(EngineError::InvalidConfig("zone name is empty".to_string()));
        }
        if self.indoor_temp_sensor.is_empty() || self.outdoor_temp_sensor.is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "{}: indoor and outdoor temperature sensors are required",
                self.name
            )));
        }
        if self.heating_entity.is_none() && self.power_sensor.is_none() {
            return Err(EngineError::InvalidConfig(format!(
                "{}: a heating entity or a power sensor is required",
                self.name
            )));
        }
        if self.heater_power.is_none() && self.power_sensor.is_none() && self.energy_sensor.is_none()
        {
            return Err(EngineError::InvalidConfig(format!(
                "{}: heater power, power sensor or energy sensor is required",
                self.name
            )));
        }
        if self.heat_source_type.requires_energy_sensor() && self.energy_sensor.is_none() {
            return Err(EngineError::InvalidConfig(format!(
                "{}: heat source {} requires an energy sensor",
                self.name,
                self.heat_source_type.as_str()
            )));
        }
        if !(self.efficiency() > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "{}: efficiency factor must be positive",
                self.name
            )));
        }
        for (label, value) in [
            ("heater_power", self.heater_power),
            ("surface", self.surface),
            ("volume", self.volume),
        ] {
            if let Some(v) = value {
                if !(v > 0.0) {
                    return Err(EngineError::InvalidConfig(format!(
                        "{}: {} must be positive",
                        self.name, label
                    )));
                }
            }
        }
        if !(self.power_threshold >= 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "{}: power threshold must not be negative",
                self.name
            )));
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(EngineError::InvalidConfig(format!(
                "{}: utc offset out of range",
                self.name
            )));
        }
        Ok(())
    }
}

/// Lowercase ASCII alphanumerics, everything else folded to `_`
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    slug.trim_matches('_').to_string()
}

fn default_scan_interval() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

fn default_save_interval() -> u64 {
    DEFAULT_SAVE_INTERVAL_SECS
}

fn default_retention() -> usize {
    DEFAULT_HISTORY_RETENTION_DAYS
}

fn default_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

/// Settings shared by all zones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
    #[serde(default = "default_retention")]
    pub history_retention_days: usize,
    #[serde(default = "default_capacity")]
    pub buffer_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            save_interval_secs: DEFAULT_SAVE_INTERVAL_SECS,
            history_retention_days: DEFAULT_HISTORY_RETENTION_DAYS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Full engine configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub settings: EngineSettings,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.settings.scan_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "scan interval must be positive".to_string(),
            ));
        }
        if self.settings.buffer_capacity < MIN_AGGREGATION_POINTS {
            return Err(EngineError::InvalidConfig(format!(
                "buffer capacity must hold at least {} samples",
                MIN_AGGREGATION_POINTS
            )));
        }
        let mut seen = HashSet::new();
        for zone in &self.zones {
            zone.validate()?;
            if !seen.insert(zone.slug()) {
                return Err(EngineError::DuplicateZone(zone.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn electric_zone() -> ZoneConfig {
        let mut zone = ZoneConfig::new("Living Room", "sensor.indoor", "sensor.outdoor");
        zone.heating_entity = Some("climate.living".to_string());
        zone.heater_power = Some(1000.0);
        zone
    }

    #[test]
    fn test_default_efficiencies() {
        assert_eq!(HeatSourceType::Electric.default_efficiency(), 1.0);
        assert_eq!(HeatSourceType::Heatpump.default_efficiency(), 3.0);
        assert_eq!(HeatSourceType::GasBoiler.default_efficiency(), 0.90);
        assert_eq!(HeatSourceType::GasFurnace.default_efficiency(), 0.85);
    }

    #[test]
    fn test_legacy_gas_alias() {
        let source: HeatSourceType = serde_json::from_str("\"gas\"").unwrap();
        assert_eq!(source, HeatSourceType::GasBoiler);
    }

    #[test]
    fn test_parse_minimal_zone() {
        let json = r#"{
            "name": "Bedroom",
            "indoor_temp_sensor": "sensor.bedroom",
            "outdoor_temp_sensor": "sensor.outside",
            "heating_entity": "switch.radiator",
            "heater_power": 1500
        }"#;
        let zone: ZoneConfig = serde_json::from_str(json).unwrap();
        assert_eq!(zone.power_threshold, 50.0);
        assert_eq!(zone.efficiency(), 1.0);
        assert_eq!(zone.notification_delay_minutes, 2);
        assert!(zone.validate().is_ok());
    }

    #[test]
    fn test_efficiency_override() {
        let mut zone = electric_zone();
        zone.efficiency_factor = Some(0.95);
        assert_eq!(zone.efficiency(), 0.95);
    }

    #[test]
    fn test_validate_rejects_missing_energy_sensor() {
        let mut zone = electric_zone();
        zone.heat_source_type = HeatSourceType::Heatpump;
        assert!(matches!(zone.validate(), Err(EngineError::InvalidConfig(_))));
        zone.energy_sensor = Some("sensor.hp_energy".to_string());
        assert!(zone.validate().is_ok());
        assert!(zone.dynamic_cop_enabled());
    }

    #[test]
    fn test_validate_rejects_bad_dimensions() {
        let mut zone = electric_zone();
        zone.volume = Some(0.0);
        assert!(zone.validate().is_err());
    }

    #[test]
    fn test_validate_requires_energy_input() {
        let mut zone = electric_zone();
        zone.heater_power = None;
        assert!(zone.validate().is_err());
        zone.power_sensor = Some("sensor.power".to_string());
        assert!(zone.validate().is_ok());
    }

    #[test]
    fn test_slug() {
        assert_eq!(electric_zone().slug(), "living_room");
    }

    #[test]
    fn test_local_date_uses_offset() {
        let mut zone = electric_zone();
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 23, 30, 0).unwrap();
        assert_eq!(zone.local_date(at), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        zone.utc_offset_minutes = 60;
        assert_eq!(zone.local_date(at), NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
    }

    #[test]
    fn test_engine_config_rejects_duplicates() {
        let config = EngineConfig {
            settings: EngineSettings::default(),
            zones: vec![electric_zone(), electric_zone()],
        };
        assert!(matches!(config.validate(), Err(EngineError::DuplicateZone(_))));
    }
}
