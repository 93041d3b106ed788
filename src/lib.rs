//! Thermal Flux - Streaming compute engine for building thermal-loss analysis
//!
//! Flux estimates a room's heat-loss coefficient K (W/°C) from periodic
//! indoor/outdoor temperature samples, the heater's on/off state and its
//! energy consumption:
//! sensor readings → sample buffer and day accumulators → rolling 24h K →
//! daily ledger → 7-day stabilized K → insulation verdict.
//!
//! ## Modules
//!
//! - **Model**: rolling K, daily history and the 7-day stabilizer
//! - **Real-time**: heating sessions, window-open detection and alerts
//! - **Coordinator / Registry**: per-zone refresh cycle and operator controls

pub mod accumulator;
pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod energy;
pub mod error;
pub mod history;
pub mod insulation;
pub mod model;
pub mod realtime;
pub mod registry;
pub mod sensors;
pub mod store;
pub mod types;
pub mod weather;

pub use config::{EngineConfig, EngineSettings, HeatSourceType, ZoneConfig};
pub use coordinator::ZoneCoordinator;
pub use error::EngineError;
pub use model::{ThermalModel, ThermalProfile};
pub use registry::{AlertNotice, ZoneRegistry};
pub use sensors::{Reading, SensorChange, SensorSource, SensorState, StaticSensors};
pub use store::{JsonFileStore, MemoryStore, PersistedZone, ZoneStore};
pub use types::{InsulationState, InsulationStatus, ZoneSnapshot};

/// Engine version embedded in every snapshot
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for snapshots
pub const PRODUCER_NAME: &str = "thermal-flux";
