//! Zone state persistence
//!
//! A [`ZoneStore`] loads and saves one [`PersistedZone`] per zone, keyed by
//! the zone slug. Both stores below serialize with serde_json.

use crate::accumulator::DayAccumulators;
use crate::energy::{CounterTracker, PowerIntegrator};
use crate::error::EngineError;
use crate::model::ModelSnapshot;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Everything a zone needs to resume after a restart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedZone {
    pub zone: String,
    pub saved_at: DateTime<Utc>,
    pub model: ModelSnapshot,
    #[serde(default)]
    pub accumulators: DayAccumulators,
    #[serde(default)]
    pub integrator: PowerIntegrator,
    #[serde(default)]
    pub external_counter: CounterTracker,
    /// Day the accumulators were last reset
    #[serde(default)]
    pub last_reset_date: Option<NaiveDate>,
    /// Lifetime energy integrated from the power sensor (kWh)
    #[serde(default)]
    pub measured_total_kwh: f64,
    /// Keeps the alert cooldown across restarts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_window_alert: Option<DateTime<Utc>>,
}

impl PersistedZone {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Persistence collaborator. Implementations must accept concurrent calls
/// for different zones.
pub trait ZoneStore: Send + Sync {
    fn load(&self, zone: &str) -> Result<Option<PersistedZone>, EngineError>;
    fn save(&self, zone: &str, state: &PersistedZone) -> Result<(), EngineError>;
}

/// Store kept in memory, as serialized JSON
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, zone: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(zone))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ZoneStore for MemoryStore {
    fn load(&self, zone: &str) -> Result<Option<PersistedZone>, EngineError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| EngineError::PersistenceError("memory store lock poisoned".to_string()))?;
        entries
            .get(zone)
            .map(|json| PersistedZone::from_json(json))
            .transpose()
    }

    fn save(&self, zone: &str, state: &PersistedZone) -> Result<(), EngineError> {
        let json = state.to_json()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| EngineError::PersistenceError("memory store lock poisoned".to_string()))?;
        entries.insert(zone.to_string(), json);
        Ok(())
    }
}

/// One `<zone>.json` file per zone inside a directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, zone: &str) -> PathBuf {
        self.dir.join(format!("{zone}.json"))
    }
}

impl ZoneStore for JsonFileStore {
    fn load(&self, zone: &str) -> Result<Option<PersistedZone>, EngineError> {
        let path = self.path_for(zone);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        PersistedZone::from_json(&json).map(Some).map_err(|e| {
            EngineError::PersistenceError(format!("{}: {}", path.display(), e))
        })
    }

    /// Written to a temporary file first, then renamed over the old state.
    fn save(&self, zone: &str, state: &PersistedZone) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(zone);
        let tmp = self.dir.join(format!(".{zone}.json.tmp"));
        fs::write(&tmp, state.to_json()?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ThermalModel, ThermalProfile};
    use crate::types::SamplePoint;
    use chrono::{Duration, TimeZone};

    fn persisted() -> PersistedZone {
        let start = Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap();
        let mut model = ThermalModel::new("office", ThermalProfile::default());
        for minute in 0..30 {
            model.add_sample(
                SamplePoint::new(start + Duration::minutes(minute), 20.0, 4.0, minute < 10),
                0.0,
                0.0,
            );
        }
        let mut accumulators = DayAccumulators::new(start.date_naive());
        accumulators.record_sample(20.0, 4.0);
        PersistedZone {
            zone: "office".to_string(),
            saved_at: start + Duration::minutes(30),
            model: model.snapshot(),
            accumulators,
            integrator: PowerIntegrator::new(),
            external_counter: CounterTracker::new(),
            last_reset_date: Some(start.date_naive()),
            measured_total_kwh: 1.25,
            last_window_alert: None,
        }
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load("office").unwrap().is_none());
        store.save("office", &persisted()).unwrap();
        assert!(store.contains("office"));

        let loaded = store.load("office").unwrap().unwrap();
        assert_eq!(loaded.model.samples.len(), 30);
        assert_eq!(loaded.measured_total_kwh, 1.25);
        assert_eq!(loaded.accumulators.delta_t_count, 1);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("thermal-flux-store-{}", uuid::Uuid::new_v4()));
        let store = JsonFileStore::new(&dir);
        assert!(store.load("office").unwrap().is_none());

        store.save("office", &persisted()).unwrap();
        assert!(store.path_for("office").exists());
        let loaded = store.load("office").unwrap().unwrap();
        assert_eq!(loaded.zone, "office");
        assert_eq!(loaded.last_reset_date, persisted().last_reset_date);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_store_reports_corrupt_state() {
        let dir = std::env::temp_dir().join(format!("thermal-flux-store-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let store = JsonFileStore::new(&dir);
        fs::write(store.path_for("office"), "{not json").unwrap();

        let err = store.load("office").unwrap_err();
        assert!(matches!(err, EngineError::PersistenceError(_)));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_store_tolerates_oversized_buffer_capacity() {
        let dir = std::env::temp_dir().join(format!("thermal-flux-store-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let store = JsonFileStore::new(&dir);
        let mut value = serde_json::to_value(persisted()).unwrap();
        value["model"]["samples"]["capacity"] = serde_json::Value::from(u64::MAX);
        value["model"]["energy_marks"]["capacity"] = serde_json::Value::from(u64::MAX);
        fs::write(store.path_for("office"), value.to_string()).unwrap();

        let loaded = store.load("office").unwrap().unwrap();
        assert_eq!(loaded.model.samples.len(), 30);

        let mut model = ThermalModel::with_capacity("office", ThermalProfile::default(), 100, 30);
        model.restore(loaded.model);
        assert_eq!(model.snapshot().samples.capacity(), 100);
        assert_eq!(model.snapshot().samples.len(), 30);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_older_state_without_optional_fields() {
        let mut value = serde_json::to_value(persisted()).unwrap();
        let object = value.as_object_mut().unwrap();
        for key in ["accumulators", "integrator", "external_counter", "last_reset_date", "measured_total_kwh"] {
            object.remove(key);
        }
        let restored: PersistedZone = serde_json::from_value(value).unwrap();
        assert_eq!(restored.measured_total_kwh, 0.0);
        assert!(restored.accumulators.date.is_none());
    }
}
