//! Zone registry
//!
//! Owns every configured zone, routes sensor change notifications to the
//! zones listening on the entity and exposes the operator controls.

use crate::config::{slugify, EngineConfig, EngineSettings, ZoneConfig};
use crate::coordinator::ZoneCoordinator;
use crate::error::EngineError;
use crate::realtime::AlertOutcome;
use crate::sensors::{SensorChange, SensorSource};
use crate::store::ZoneStore;
use crate::types::{InsulationStatus, ZoneSnapshot};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Resolved window alert for one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotice {
    pub zone: String,
    pub at: DateTime<Utc>,
    pub outcome: AlertOutcome,
}

/// All zones of one installation, keyed by slug.
///
/// Each zone sits behind its own mutex: calls for one zone are serialized,
/// different zones never wait on each other.
pub struct ZoneRegistry {
    settings: EngineSettings,
    store: Arc<dyn ZoneStore>,
    zones: BTreeMap<String, Mutex<ZoneCoordinator>>,
}

impl ZoneRegistry {
    pub fn new(settings: EngineSettings, store: Arc<dyn ZoneStore>) -> Self {
        Self {
            settings,
            store,
            zones: BTreeMap::new(),
        }
    }

    /// Build every zone of a configuration, restoring their stored state
    pub fn from_config(config: &EngineConfig, store: Arc<dyn ZoneStore>) -> Result<Self, EngineError> {
        config.validate()?;
        let mut registry = Self::new(config.settings.clone(), store);
        for zone in &config.zones {
            registry.add_zone(zone.clone())?;
        }
        Ok(registry)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn add_zone(&mut self, config: ZoneConfig) -> Result<(), EngineError> {
        let slug = config.slug();
        if self.zones.contains_key(&slug) {
            return Err(EngineError::DuplicateZone(config.name));
        }
        let coordinator = ZoneCoordinator::new(config, &self.settings, Arc::clone(&self.store))?;
        info!("[{}] Zone registered", coordinator.name());
        self.zones.insert(slug, Mutex::new(coordinator));
        Ok(())
    }

    /// Shut a zone down and forget it
    pub fn remove_zone(&mut self, zone: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        let coordinator = self
            .zones
            .remove(&slugify(zone))
            .ok_or_else(|| EngineError::ZoneNotFound(zone.to_string()))?;
        let mut coordinator = coordinator.into_inner().unwrap_or_else(|p| p.into_inner());
        coordinator.shutdown(now);
        info!("[{}] Zone removed", coordinator.name());
        Ok(())
    }

    pub fn zone_names(&self) -> Vec<String> {
        self.zones
            .values()
            .map(|zone| lock(zone).name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Scheduled tick: refresh every zone
    pub fn refresh_all(&self, now: DateTime<Utc>, sensors: &dyn SensorSource) -> Vec<ZoneSnapshot> {
        self.zones
            .values()
            .map(|zone| lock(zone).refresh(now, sensors))
            .collect()
    }

    /// Deliver a change notification. Returns how many zones consumed it.
    pub fn route_change(&self, change: &SensorChange) -> usize {
        let mut routed = 0;
        for zone in self.zones.values() {
            let mut zone = lock(zone);
            let config = zone.config();
            let is_power = config.power_sensor.as_deref() == Some(change.entity_id.as_str());
            let is_indoor = config.indoor_temp_sensor == change.entity_id;
            if is_power {
                zone.on_power_change(change.old, change.new, change.at);
                routed += 1;
            }
            if is_indoor {
                zone.on_temperature_change(change.new, change.at);
                routed += 1;
            }
        }
        routed
    }

    /// Resolve the window alerts that are due
    pub fn poll_alerts(&self, now: DateTime<Utc>) -> Vec<AlertNotice> {
        self.zones
            .values()
            .filter_map(|zone| {
                let mut zone = lock(zone);
                zone.poll_window_alert(now).map(|outcome| AlertNotice {
                    zone: zone.name().to_string(),
                    at: now,
                    outcome,
                })
            })
            .collect()
    }

    /// Clear a zone's daily history and 7-day K
    pub fn reset_history(&self, zone: &str) -> Result<(), EngineError> {
        self.reset_history_at(zone, Utc::now())
    }

    pub fn reset_history_at(&self, zone: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        let mut coordinator = lock(self.get(zone)?);
        coordinator.reset_history(now);
        Ok(())
    }

    /// Drop every calibration input of a zone
    pub fn reset_all(&self, zone: &str) -> Result<(), EngineError> {
        self.reset_all_at(zone, Utc::now())
    }

    pub fn reset_all_at(&self, zone: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        let mut coordinator = lock(self.get(zone)?);
        coordinator.reset_all(now);
        Ok(())
    }

    pub fn status(&self, zone: &str) -> Result<InsulationStatus, EngineError> {
        Ok(lock(self.get(zone)?).model().insulation_status())
    }

    pub fn snapshot(&self, zone: &str, now: DateTime<Utc>) -> Result<ZoneSnapshot, EngineError> {
        Ok(lock(self.get(zone)?).current_snapshot(now))
    }

    /// Finalize open sessions and save every zone
    pub fn shutdown_all(&self, now: DateTime<Utc>) {
        for zone in self.zones.values() {
            lock(zone).shutdown(now);
        }
    }

    fn get(&self, zone: &str) -> Result<&Mutex<ZoneCoordinator>, EngineError> {
        self.zones
            .get(&slugify(zone))
            .ok_or_else(|| EngineError::ZoneNotFound(zone.to_string()))
    }
}

/// A poisoned zone is still usable: its state is only ever replaced whole
fn lock(zone: &Mutex<ZoneCoordinator>) -> MutexGuard<'_, ZoneCoordinator> {
    zone.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{SensorState, StaticSensors, Temperature};
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 14, 8, minute, 0).unwrap()
    }

    fn zone(name: &str, prefix: &str) -> ZoneConfig {
        let mut config = ZoneConfig::new(
            name,
            &format!("sensor.{prefix}_temp"),
            "sensor.outdoor",
        );
        config.power_sensor = Some(format!("sensor.{prefix}_power"));
        config.heater_power = Some(1500.0);
        config
    }

    fn registry() -> ZoneRegistry {
        let config = EngineConfig {
            settings: EngineSettings::default(),
            zones: vec![zone("Living Room", "living"), zone("Office", "office")],
        };
        ZoneRegistry::from_config(&config, Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_from_config() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.zone_names(), vec!["Living Room", "Office"]);
    }

    #[test]
    fn test_duplicate_zone_rejected() {
        let mut registry = registry();
        let err = registry.add_zone(zone("living room", "other")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateZone(_)));
    }

    #[test]
    fn test_unknown_zone() {
        let registry = registry();
        assert!(matches!(
            registry.reset_history("Attic"),
            Err(EngineError::ZoneNotFound(_))
        ));
        assert!(matches!(
            registry.reset_all("Attic"),
            Err(EngineError::ZoneNotFound(_))
        ));
        assert!(registry.status("Attic").is_err());
    }

    #[test]
    fn test_route_change_targets_listening_zone() {
        let registry = registry();
        let mut sensors = StaticSensors::new();
        sensors.set("sensor.office_power", SensorState::Numeric(0.0), at(0));
        let change = sensors.set("sensor.office_power", SensorState::Numeric(1200.0), at(1));

        assert_eq!(registry.route_change(&change), 1);
        let snapshot = registry.snapshot("office", at(31)).unwrap();
        assert!((snapshot.heating_hours_today - 0.5).abs() < 1e-9);
        let other = registry.snapshot("Living Room", at(31)).unwrap();
        assert_eq!(other.heating_hours_today, 0.0);

        let unrelated = sensors.set("sensor.kitchen", SensorState::Numeric(3.0), at(2));
        assert_eq!(registry.route_change(&unrelated), 0);
    }

    #[test]
    fn test_refresh_all() {
        let registry = registry();
        let mut sensors = StaticSensors::new();
        sensors.set("sensor.outdoor", SensorState::Temperature(Temperature::celsius(4.0)), at(0));
        sensors.set("sensor.living_temp", SensorState::Temperature(Temperature::celsius(21.0)), at(0));

        let snapshots = registry.refresh_all(at(0), &sensors);
        assert_eq!(snapshots.len(), 2);
        assert!(!snapshots[0].stale);
        assert_eq!(snapshots[0].delta_t, Some(17.0));
        assert!(snapshots[1].stale);
    }

    #[test]
    fn test_remove_zone() {
        let mut registry = registry();
        registry.remove_zone("office", at(0)).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.remove_zone("office", at(0)).is_err());
    }
}
