//! Per-zone refresh orchestration
//!
//! A [`ZoneCoordinator`] owns one zone's thermal model, day accumulators and
//! real-time detectors. The host drives it with a periodic
//! [`ZoneCoordinator::refresh`] and forwards power and indoor temperature
//! change notifications as they arrive.

use crate::accumulator::{source_label, DayAccumulators};
use crate::config::{EngineSettings, ZoneConfig};
use crate::energy::{dynamic_cop, nameplate_kwh, CopInputs, CounterTracker, PowerIntegrator};
use crate::error::EngineError;
use crate::model::{ThermalModel, ThermalProfile};
use crate::realtime::{
    polling_window_open, AlertOutcome, HeatingDetector, HeatingEvent, WindowAlert,
    WindowDetector, WindowTransition,
};
use crate::sensors::{Reading, SensorSource};
use crate::store::{PersistedZone, ZoneStore};
use crate::types::{
    CopReading, CopStatus, DataReadiness, HeatingDetectionMethod, Producer, SamplePoint,
    WindowDetectionMethod, ZoneSnapshot,
};
use crate::weather::WindReading;
use crate::{ENGINE_VERSION, PRODUCER_NAME};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Readings taken during one refresh
struct Readings {
    indoor: f64,
    outdoor: f64,
    heating_on: bool,
    heating_detection: HeatingDetectionMethod,
    window_open: bool,
    window_detection: Option<WindowDetectionMethod>,
    wind: WindReading,
}

pub struct ZoneCoordinator {
    config: ZoneConfig,
    save_interval_secs: i64,
    store: Arc<dyn ZoneStore>,
    producer: Producer,
    model: ThermalModel,
    day: DayAccumulators,
    integrator: PowerIntegrator,
    external_counter: CounterTracker,
    measured_total_kwh: f64,
    heating: HeatingDetector,
    window: WindowDetector,
    alert: WindowAlert,
    window_open: bool,
    window_method: Option<WindowDetectionMethod>,
    last_indoor: Option<f64>,
    last_heating: bool,
    last_update: Option<DateTime<Utc>>,
    /// Polled heating time is credited up to this instant
    heating_accounted_at: Option<DateTime<Utc>>,
    last_cop: CopReading,
    last_save: Option<DateTime<Utc>>,
}

impl ZoneCoordinator {
    /// Build a coordinator and restore its persisted state.
    ///
    /// A state that fails to load is logged and replaced by a fresh model.
    pub fn new(
        config: ZoneConfig,
        settings: &EngineSettings,
        store: Arc<dyn ZoneStore>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let model = ThermalModel::with_capacity(
            &config.name,
            ThermalProfile::from_config(&config),
            settings.buffer_capacity,
            settings.history_retention_days,
        )
        .with_day_offset(config.day_offset());

        let mut coordinator = Self {
            heating: HeatingDetector::new(config.power_threshold, config.heater_power),
            alert: WindowAlert::new(
                config.window_notification_enabled,
                config.notification_delay_minutes,
            ),
            save_interval_secs: i64::try_from(settings.save_interval_secs).unwrap_or(i64::MAX),
            store,
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: ENGINE_VERSION.to_string(),
                instance_id: Uuid::new_v4().to_string(),
            },
            model,
            day: DayAccumulators::default(),
            integrator: PowerIntegrator::new(),
            external_counter: CounterTracker::new(),
            measured_total_kwh: 0.0,
            window: WindowDetector::new(),
            window_open: false,
            window_method: None,
            last_indoor: None,
            last_heating: false,
            last_update: None,
            heating_accounted_at: None,
            last_cop: disabled_cop(),
            last_save: None,
            config,
        };
        coordinator.load();
        Ok(coordinator)
    }

    fn load(&mut self) {
        match self.store.load(&self.config.slug()) {
            Ok(Some(state)) => self.restore(state),
            Ok(None) => debug!("[{}] No stored state, starting fresh", self.config.name),
            Err(e) => error!(
                "[{}] Failed to load stored state, starting fresh: {}",
                self.config.name, e
            ),
        }
    }

    fn restore(&mut self, state: PersistedZone) {
        self.model.restore(state.model);
        self.day = state.accumulators;
        if self.day.date.is_none() {
            self.day.date = state.last_reset_date;
        }
        self.integrator = state.integrator;
        self.external_counter = state.external_counter;
        self.measured_total_kwh = state.measured_total_kwh.max(0.0);
        self.alert.set_last_fired(state.last_window_alert);
    }

    /// One polling cycle: read sensors, feed the model and the day
    /// accumulators, and publish the zone snapshot.
    ///
    /// Without both temperatures nothing is recorded and the restored values
    /// are republished with `stale` set.
    pub fn refresh(&mut self, now: DateTime<Utc>, sensors: &dyn SensorSource) -> ZoneSnapshot {
        let indoor = sensors
            .temperature(&self.config.indoor_temp_sensor)
            .value()
            .map(|t| t.to_celsius());
        let outdoor = sensors
            .temperature(&self.config.outdoor_temp_sensor)
            .value()
            .map(|t| t.to_celsius());
        let (Some(indoor), Some(outdoor)) = (indoor, outdoor) else {
            debug!(
                "[{}] Temperature sensors not available, publishing restored data",
                self.config.name
            );
            return self.build_snapshot(now, None);
        };

        self.check_day_rollover(now);

        let (heating_on, heating_detection) = self.read_heating(sensors);
        let (external_kwh, measured_kwh) = self.read_energy(now, sensors);
        self.model.add_sample(
            SamplePoint::new(now, indoor, outdoor, heating_on),
            external_kwh,
            measured_kwh,
        );

        let (window_open, window_detection) = self.read_window(sensors, indoor, now);

        // The power listener does its own accounting
        if self.config.power_sensor.is_none() {
            self.credit_polled_heating(now);
            if heating_on != self.last_heating {
                info!(
                    "[{}] Heating {}",
                    self.config.name,
                    if heating_on { "started" } else { "stopped" }
                );
                self.on_heating_edge(heating_on, now);
            }
        }
        self.day.record_sample(indoor, outdoor);
        self.update_window_flag(window_open, window_detection, heating_on, now);

        let wind = self.read_wind(sensors);
        self.day.record_wind(wind.speed, wind.direction);

        self.last_indoor = Some(indoor);
        self.last_heating = heating_on;
        self.last_update = Some(now);

        self.last_cop = self.compute_cop(now);
        self.maybe_save(now);

        self.build_snapshot(
            now,
            Some(Readings {
                indoor,
                outdoor,
                heating_on,
                heating_detection,
                window_open,
                window_detection,
                wind,
            }),
        )
    }

    /// Snapshot from the current state without reading sensors
    pub fn current_snapshot(&self, now: DateTime<Utc>) -> ZoneSnapshot {
        self.build_snapshot(now, None)
    }

    /// Power sensor change notification
    pub fn on_power_change(
        &mut self,
        old_w: Option<f64>,
        new_w: Option<f64>,
        at: DateTime<Utc>,
    ) -> Option<HeatingEvent> {
        self.check_day_rollover(at);
        let event = self.heating.on_power_change(old_w, new_w, at)?;
        match event {
            HeatingEvent::Started { .. } => {
                info!(
                    "[{}] Heating started ({:.0} W)",
                    self.config.name,
                    new_w.unwrap_or(0.0)
                );
                self.on_heating_edge(true, at);
            }
            HeatingEvent::Stopped {
                duration_secs,
                energy_kwh,
                ..
            } => {
                self.day.add_heating(duration_secs, energy_kwh);
                info!(
                    "[{}] Heating stopped after {:.0}s ({:.3} kWh estimated)",
                    self.config.name,
                    duration_secs,
                    energy_kwh.unwrap_or(0.0)
                );
                self.on_heating_edge(false, at);
            }
        }
        Some(event)
    }

    /// Indoor temperature change notification, in °C
    pub fn on_temperature_change(
        &mut self,
        temp_c: Option<f64>,
        at: DateTime<Utc>,
    ) -> Option<WindowTransition> {
        let temp = temp_c.filter(|t| t.is_finite())?;
        let heating = self.is_heating_now();
        let transition = self.window.on_temperature(temp, at, heating);
        if let Some(transition) = transition {
            debug!("[{}] Window detector: {:?}", self.config.name, transition);
        }
        let contact_in_charge = self.config.window_sensor.is_some()
            && self.window_method == Some(WindowDetectionMethod::Sensor);
        if !contact_in_charge && self.window.has_result() {
            let open = self.window.is_open();
            self.update_window_flag(open, Some(WindowDetectionMethod::Realtime), heating, at);
        }
        transition
    }

    /// Resolve a due window alert
    pub fn poll_window_alert(&mut self, now: DateTime<Utc>) -> Option<AlertOutcome> {
        let heating = self.is_heating_now();
        let outcome = self.alert.poll(now, self.window_open, heating)?;
        match outcome {
            AlertOutcome::Fired => warn!(
                "[{}] Window open while heating, consider turning the heating off",
                self.config.name
            ),
            AlertOutcome::Cooldown => debug!(
                "[{}] Window alert suppressed, cooldown active",
                self.config.name
            ),
            AlertOutcome::ConditionsCleared => debug!(
                "[{}] Window alert dropped, window closed or heating stopped",
                self.config.name
            ),
        }
        Some(outcome)
    }

    /// Clear the daily history and the 7-day K, keeping the last valid K
    pub fn reset_history(&mut self, now: DateTime<Utc>) {
        info!("[{}] Manual history reset requested", self.config.name);
        self.model.reset_history();
        self.save(now);
    }

    /// Drop every calibration input and start over
    pub fn reset_all(&mut self, now: DateTime<Utc>) {
        info!("[{}] Complete data reset requested", self.config.name);
        self.model.reset_all();
        let today = self.day.date.unwrap_or_else(|| self.config.local_date(now));
        self.day.reset(today);
        self.integrator.reset();
        self.external_counter.reset();
        self.measured_total_kwh = 0.0;
        self.heating.reset();
        self.window.reset();
        self.alert.cancel();
        self.window_open = false;
        self.window_method = None;
        self.last_indoor = None;
        self.last_heating = false;
        self.last_update = None;
        self.heating_accounted_at = None;
        self.last_cop = disabled_cop();
        self.save(now);
    }

    /// Close an open heating session, drop pending alerts and force a save
    pub fn shutdown(&mut self, now: DateTime<Utc>) {
        self.check_day_rollover(now);
        if let Some(segment) = self.heating.finalize(now) {
            self.day.add_heating(segment.duration_secs, segment.energy_kwh);
            info!(
                "[{}] Finalized heating session on shutdown: {:.0}s",
                self.config.name, segment.duration_secs
            );
        }
        self.alert.cancel();
        self.save(now);
    }

    /// Save when the save interval has elapsed
    pub fn maybe_save(&mut self, now: DateTime<Utc>) -> bool {
        let due = self
            .last_save
            .map_or(true, |last| (now - last).num_seconds() >= self.save_interval_secs);
        due && self.save(now)
    }

    /// Persist the zone. Failures are logged and the zone keeps running.
    pub fn save(&mut self, now: DateTime<Utc>) -> bool {
        let state = self.persisted(now);
        match self.store.save(&self.config.slug(), &state) {
            Ok(()) => {
                self.last_save = Some(now);
                debug!("[{}] State saved", self.config.name);
                true
            }
            Err(e) => {
                error!("[{}] Failed to save state: {}", self.config.name, e);
                false
            }
        }
    }

    pub fn persisted(&self, now: DateTime<Utc>) -> PersistedZone {
        PersistedZone {
            zone: self.config.name.clone(),
            saved_at: now,
            model: self.model.snapshot(),
            accumulators: self.day.clone(),
            integrator: self.integrator.clone(),
            external_counter: self.external_counter.clone(),
            last_reset_date: self.day.date,
            measured_total_kwh: self.measured_total_kwh,
            last_window_alert: self.alert.last_fired(),
        }
    }

    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn model(&self) -> &ThermalModel {
        &self.model
    }

    pub fn accumulators(&self) -> &DayAccumulators {
        &self.day
    }

    pub fn heating_detector(&self) -> &HeatingDetector {
        &self.heating
    }

    pub fn window_alert(&self) -> &WindowAlert {
        &self.alert
    }

    pub fn is_window_open(&self) -> bool {
        self.window_open
    }

    pub fn measured_total_kwh(&self) -> f64 {
        self.measured_total_kwh
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    /// Heating time since the start of the day, open session included
    pub fn heating_hours_today(&self, now: DateTime<Utc>) -> f64 {
        (self.day.heating_seconds + self.heating.ongoing_seconds(now)) / 3600.0
    }

    fn is_heating_now(&self) -> bool {
        if self.config.power_sensor.is_some() {
            self.heating.is_active()
        } else {
            self.last_heating
        }
    }

    /// Power sensor exclusively when configured, the heating entity otherwise
    fn read_heating(&self, sensors: &dyn SensorSource) -> (bool, HeatingDetectionMethod) {
        if let Some(power_sensor) = &self.config.power_sensor {
            let power = sensors.numeric(power_sensor).value();
            if power.is_none() {
                debug!(
                    "[{}] Power sensor {} unavailable, assuming not heating",
                    self.config.name, power_sensor
                );
            }
            return (
                self.heating.is_heating_power(power),
                HeatingDetectionMethod::PowerSensor,
            );
        }
        let Some(entity) = &self.config.heating_entity else {
            return (false, HeatingDetectionMethod::Unknown);
        };
        match sensors.heating_state(entity) {
            Reading::Value(state) => {
                let method = if state.is_climate() {
                    HeatingDetectionMethod::Climate
                } else {
                    HeatingDetectionMethod::Switch
                };
                (state.is_heating(), method)
            }
            Reading::Unavailable => {
                warn!(
                    "[{}] Heating entity {} unavailable",
                    self.config.name, entity
                );
                (false, HeatingDetectionMethod::Unknown)
            }
        }
    }

    /// Energy increments since the previous refresh: (external, measured)
    fn read_energy(&mut self, now: DateTime<Utc>, sensors: &dyn SensorSource) -> (f64, f64) {
        let mut measured = 0.0;
        if let Some(power_sensor) = &self.config.power_sensor {
            let power = sensors.numeric(power_sensor).value();
            if let Some(kwh) = self.integrator.update(now, power) {
                measured = kwh;
                self.day.measured_kwh += kwh;
                self.measured_total_kwh += kwh;
            }
        }
        let mut external = 0.0;
        if let Some(energy_sensor) = &self.config.energy_sensor {
            let counter = sensors.numeric(energy_sensor).value();
            external = self.external_counter.update(counter);
            self.day.external_kwh += external;
        }
        (external, measured)
    }

    /// Contact sensor first; temperature detection when it is missing or
    /// unavailable
    fn read_window(
        &self,
        sensors: &dyn SensorSource,
        indoor: f64,
        now: DateTime<Utc>,
    ) -> (bool, Option<WindowDetectionMethod>) {
        if let Some(window_sensor) = &self.config.window_sensor {
            match sensors.contact(window_sensor) {
                Reading::Value(open) => return (open, Some(WindowDetectionMethod::Sensor)),
                Reading::Unavailable => debug!(
                    "[{}] Window sensor {} unavailable, using temperature detection",
                    self.config.name, window_sensor
                ),
            }
        }
        if self.window.has_result() {
            return (self.window.is_open(), Some(WindowDetectionMethod::Realtime));
        }
        let open = polling_window_open(
            self.last_indoor,
            self.last_update,
            self.last_heating,
            indoor,
            now,
        );
        (open, Some(WindowDetectionMethod::Polling))
    }

    fn read_wind(&self, sensors: &dyn SensorSource) -> WindReading {
        let orientation = self.config.room_orientation;
        match &self.config.weather_entity {
            Some(entity) => match sensors.weather(entity) {
                Reading::Value(observation) => {
                    WindReading::from_observation(&observation, orientation)
                }
                Reading::Unavailable => WindReading::empty(orientation),
            },
            None => WindReading::empty(orientation),
        }
    }

    /// Credit the interval since the last accounted instant when the
    /// previous refresh saw the heater running
    fn credit_polled_heating(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.heating_accounted_at.filter(|t| now > *t) {
            if self.last_heating {
                let seconds = seconds_between(since, now);
                self.day
                    .add_heating(seconds, nameplate_kwh(self.config.heater_power, seconds / 3600.0));
            }
        }
        self.heating_accounted_at = Some(now);
    }

    fn on_heating_edge(&mut self, heating: bool, at: DateTime<Utc>) {
        if heating {
            if self.window_open && self.alert.schedule(at) {
                debug!(
                    "[{}] Heating started with the window open, alert scheduled",
                    self.config.name
                );
            }
        } else if self.alert.cancel() {
            debug!(
                "[{}] Heating stopped, window alert cancelled",
                self.config.name
            );
        }
    }

    fn update_window_flag(
        &mut self,
        open: bool,
        method: Option<WindowDetectionMethod>,
        heating: bool,
        at: DateTime<Utc>,
    ) {
        self.window_method = method;
        if open == self.window_open {
            return;
        }
        self.window_open = open;
        if open {
            warn!(
                "[{}] Window open detected ({:?})",
                self.config.name,
                method.unwrap_or(WindowDetectionMethod::Polling)
            );
            if heating && self.alert.schedule(at) {
                debug!("[{}] Window alert scheduled", self.config.name);
            }
        } else {
            info!("[{}] Window closed", self.config.name);
            if self.alert.cancel() {
                debug!("[{}] Window alert cancelled", self.config.name);
            }
        }
    }

    fn compute_cop(&self, now: DateTime<Utc>) -> CopReading {
        if !self.config.dynamic_cop_enabled() {
            return disabled_cop();
        }
        let reading = dynamic_cop(CopInputs {
            k: self.model.current_k(),
            avg_delta_t: self
                .model
                .last_aggregation()
                .map(|agg| agg.delta_t())
                .or_else(|| self.day.avg_delta_t()),
            heating_hours: self.heating_hours_today(now),
            energy_kwh: self.day.external_kwh,
            data_ready: self.model.data_ready(),
        });
        match (reading.status, reading.value) {
            (CopStatus::LowCopWarning, Some(cop)) => warn!(
                "[{}] Calculated COP {:.2} is below 1.0, check sensor configuration",
                self.config.name, cop
            ),
            (CopStatus::HighCopWarning, Some(cop)) => warn!(
                "[{}] Calculated COP {:.2} is unusually high, check sensor configuration",
                self.config.name, cop
            ),
            _ => {}
        }
        reading
    }

    /// Archive the finished day and start a new one when `now` falls on a
    /// later calendar day than the accumulators.
    fn check_day_rollover(&mut self, now: DateTime<Utc>) {
        let today = self.config.local_date(now);
        let Some(current) = self.day.date else {
            self.day.reset(today);
            return;
        };
        if today <= current {
            return;
        }
        let boundary = self.day_start(today).unwrap_or(now);

        // Heating that ran across midnight belongs to both days
        if let Some(segment) = self.heating.checkpoint(boundary) {
            self.day.add_heating(segment.duration_secs, segment.energy_kwh);
        }
        if self.config.power_sensor.is_none() {
            self.credit_polled_heating(boundary);
        }

        if self.day.has_samples() {
            let measured_cop = if self.config.dynamic_cop_enabled() {
                self.last_cop.value
            } else {
                None
            };
            if let Some(entry) = self.day.to_entry(self.model.k_7d(), measured_cop) {
                warn!(
                    "[{}] Day rollover, archiving {}: heating={:.1}h, ΔT={:.1}°C, energy={:.2} kWh [{}], samples={}",
                    self.config.name,
                    entry.date,
                    entry.heating_hours,
                    entry.avg_delta_t,
                    entry.energy_kwh,
                    source_label(entry.energy_source),
                    entry.sample_count
                );
                self.model.archive_day(entry);
            }
        } else {
            debug!(
                "[{}] Day rollover, nothing recorded for {}",
                self.config.name, current
            );
        }
        self.day.reset(today);
    }

    /// Local midnight of `date` in the zone's offset
    fn day_start(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        self.config
            .day_offset()
            .from_local_datetime(&midnight)
            .single()
            .map(|local| local.with_timezone(&Utc))
    }

    fn build_snapshot(&self, now: DateTime<Utc>, readings: Option<Readings>) -> ZoneSnapshot {
        let aggregation = self.model.last_aggregation();
        let stale = readings.is_none();
        let default_detection = if self.config.power_sensor.is_some() {
            HeatingDetectionMethod::PowerSensor
        } else {
            HeatingDetectionMethod::Unknown
        };

        ZoneSnapshot {
            zone: self.config.name.clone(),
            producer: self.producer.clone(),
            computed_at: now,
            indoor_temp: readings.as_ref().map(|r| r.indoor),
            outdoor_temp: readings.as_ref().map(|r| r.outdoor),
            delta_t: readings.as_ref().map(|r| r.indoor - r.outdoor),
            heating_on: readings.as_ref().map(|r| r.heating_on),
            heating_detection: readings
                .as_ref()
                .map_or(default_detection, |r| r.heating_detection),
            window_open: readings.as_ref().map_or(self.window_open, |r| r.window_open),
            window_detection: readings
                .as_ref()
                .map_or(self.window_method, |r| r.window_detection),
            k_24h: self.model.k_24h(),
            k_7d: self.model.k_7d(),
            k_current: self.model.current_k(),
            k_per_area: self.model.k_per_area(),
            k_per_volume: self.model.k_per_volume(),
            heating_hours_24h: aggregation.map(|agg| agg.heating_hours()),
            heating_ratio_24h: aggregation.map(|agg| agg.heating_ratio()),
            heating_hours_today: self.heating_hours_today(now),
            avg_delta_t_24h: aggregation
                .map(|agg| agg.delta_t())
                .or_else(|| readings.as_ref().map(|r| r.indoor - r.outdoor)),
            daily_energy: self.day.daily_energy(
                self.heating.ongoing_energy_kwh(now),
                self.config.heater_power.is_some(),
                self.config.power_sensor.is_some(),
                self.config.energy_sensor.is_some(),
            ),
            total_estimated_energy_kwh: self.model.total_energy_kwh(),
            total_measured_energy_kwh: self.measured_total_kwh,
            readiness: DataReadiness {
                data_hours: self.model.data_hours(),
                sample_count: self.model.sample_count(),
                ready: self.model.data_ready(),
            },
            history_days: self.model.history_days(),
            insulation: self.model.insulation_status(),
            last_valid_k: self.model.last_valid(),
            cop: self.last_cop,
            wind: readings
                .map(|r| r.wind)
                .unwrap_or_else(|| WindReading::empty(self.config.room_orientation)),
            stale,
        }
    }
}

fn disabled_cop() -> CopReading {
    CopReading {
        value: None,
        status: CopStatus::Disabled,
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeatSourceType;
    use crate::sensors::{HeatingState, StaticSensors};
    use crate::store::MemoryStore;
    use crate::types::{EnergySource, InsulationState};
    use crate::weather::{CompassDirection, WeatherObservation, WindExposure};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn jan(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, hour, minute, 0).unwrap()
    }

    fn switch_zone() -> ZoneConfig {
        let mut config = ZoneConfig::new("Living Room", "sensor.indoor", "sensor.outdoor");
        config.heating_entity = Some("switch.heater".to_string());
        config.heater_power = Some(1000.0);
        config.surface = Some(20.0);
        config.volume = Some(50.0);
        config
    }

    fn power_zone() -> ZoneConfig {
        let mut config = switch_zone();
        config.heating_entity = None;
        config.power_sensor = Some("sensor.power".to_string());
        config
    }

    fn coordinator(config: ZoneConfig, store: Arc<MemoryStore>) -> ZoneCoordinator {
        ZoneCoordinator::new(config, &EngineSettings::default(), store).unwrap()
    }

    fn sensors(indoor: f64, outdoor: f64, heating: bool) -> StaticSensors {
        let mut sensors = StaticSensors::new();
        sensors.set_temperature("sensor.indoor", indoor);
        sensors.set_temperature("sensor.outdoor", outdoor);
        sensors.set_heating("switch.heater", HeatingState::Switch(heating));
        sensors
    }

    /// One refresh per minute for a full day starting at `start`
    fn run_day(zone: &mut ZoneCoordinator, start: DateTime<Utc>, heating_hours: i64) {
        for minute in 0..24 * 60 {
            let heating = minute / 60 < heating_hours;
            zone.refresh(start + Duration::minutes(minute), &sensors(20.0, 5.0, heating));
        }
    }

    #[test]
    fn test_missing_temperature_republishes_restored_state() {
        let mut zone = coordinator(switch_zone(), Arc::new(MemoryStore::new()));
        let mut partial = StaticSensors::new();
        partial.set_temperature("sensor.indoor", 20.0);

        let snapshot = zone.refresh(jan(14, 8, 0), &partial);
        assert!(snapshot.stale);
        assert_eq!(snapshot.indoor_temp, None);
        assert_eq!(snapshot.heating_on, None);
        assert_eq!(zone.model().sample_count(), 0);
        assert_eq!(snapshot.insulation.state, InsulationState::WaitingData);
    }

    #[test]
    fn test_full_day_yields_k_and_archives_at_midnight() {
        let mut zone = coordinator(switch_zone(), Arc::new(MemoryStore::new()));
        run_day(&mut zone, jan(14, 0, 0), 6);

        let k = zone.model().k_24h().unwrap();
        assert!((k - 16.67).abs() / 16.67 < 0.1, "k = {k}");
        assert!((zone.heating_hours_today(jan(14, 23, 59)) - 6.0).abs() < 1e-9);
        assert_eq!(zone.model().history_days(), 0);

        let snapshot = zone.refresh(jan(15, 0, 0), &sensors(20.0, 5.0, false));
        assert_eq!(snapshot.history_days, 1);
        let entry = &zone.model().ledger().entries()[0];
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2025, 1, 14).unwrap());
        assert_eq!(entry.sample_count, 1440);
        assert!((entry.heating_hours - 6.0).abs() < 1e-9);
        assert!((entry.energy_kwh - 6.0).abs() < 1e-6);
        assert_eq!(entry.energy_source, Some(EnergySource::Nameplate));
        assert_eq!(entry.k_7d, None);
        assert!(snapshot.k_7d.is_some());
        assert_eq!(snapshot.heating_hours_today, 0.0);
        assert_eq!(snapshot.readiness.sample_count, 1441);
    }

    #[test]
    fn test_snapshot_fields() {
        let mut config = switch_zone();
        config.weather_entity = Some("weather.home".to_string());
        config.room_orientation = Some(CompassDirection::S);
        let mut zone = coordinator(config, Arc::new(MemoryStore::new()));

        let mut inputs = sensors(20.0, 5.0, true);
        inputs.set_weather(
            "weather.home",
            WeatherObservation {
                wind_speed: Some(25.0),
                wind_speed_unit: None,
                wind_bearing: Some(200.0),
            },
        );
        let snapshot = zone.refresh(jan(14, 8, 0), &inputs);
        assert!(!snapshot.stale);
        assert_eq!(snapshot.delta_t, Some(15.0));
        assert_eq!(snapshot.heating_on, Some(true));
        assert_eq!(snapshot.heating_detection, HeatingDetectionMethod::Switch);
        assert_eq!(snapshot.window_detection, Some(WindowDetectionMethod::Polling));
        assert_eq!(snapshot.wind.direction, Some(CompassDirection::S));
        assert_eq!(snapshot.wind.exposure, WindExposure::Exposed);
        assert_eq!(snapshot.wind.speed_unit.as_deref(), Some("km/h"));
        assert_eq!(snapshot.cop.status, CopStatus::Disabled);
        assert_eq!(snapshot.producer.name, PRODUCER_NAME);
        assert_eq!(snapshot.daily_energy.measured_kwh, None);
        assert_eq!(zone.accumulators().wind_speed_count, 1);
    }

    #[test]
    fn test_power_sensor_is_exclusive() {
        let mut zone = coordinator(power_zone(), Arc::new(MemoryStore::new()));
        let mut inputs = sensors(20.0, 5.0, true);
        let snapshot = zone.refresh(jan(14, 8, 0), &inputs);
        assert_eq!(snapshot.heating_on, Some(false));
        assert_eq!(snapshot.heating_detection, HeatingDetectionMethod::PowerSensor);

        inputs.set_numeric("sensor.power", 800.0);
        let snapshot = zone.refresh(jan(14, 8, 1), &inputs);
        assert_eq!(snapshot.heating_on, Some(true));
    }

    #[test]
    fn test_power_events_feed_day_accumulators() {
        let mut zone = coordinator(power_zone(), Arc::new(MemoryStore::new()));
        zone.refresh(jan(14, 6, 0), &sensors(20.0, 5.0, false));

        assert!(matches!(
            zone.on_power_change(Some(0.0), Some(1000.0), jan(14, 6, 0)),
            Some(HeatingEvent::Started { .. })
        ));
        assert!((zone.heating_hours_today(jan(14, 6, 30)) - 0.5).abs() < 1e-9);
        zone.on_power_change(Some(1000.0), Some(0.0), jan(14, 7, 0));

        assert!((zone.accumulators().heating_seconds - 3600.0).abs() < 1e-9);
        assert!((zone.accumulators().estimated_kwh - 1.0).abs() < 1e-9);
        assert_eq!(zone.on_power_change(Some(0.0), Some(10.0), jan(14, 7, 5)), None);
    }

    #[test]
    fn test_heating_session_split_at_midnight() {
        let mut zone = coordinator(power_zone(), Arc::new(MemoryStore::new()));
        zone.refresh(jan(14, 23, 0), &sensors(20.0, 5.0, false));
        zone.on_power_change(Some(0.0), Some(1000.0), jan(14, 23, 30));

        let mut idle = sensors(20.0, 5.0, false);
        idle.set_numeric("sensor.power", 1000.0);
        zone.refresh(jan(15, 0, 5), &idle);
        zone.on_power_change(Some(1000.0), Some(0.0), jan(15, 0, 30));

        // A single sample is too few to archive; the split is still applied
        assert_eq!(zone.model().history_days(), 0);
        assert!((zone.accumulators().heating_seconds - 1800.0).abs() < 1e-9);
        assert_eq!(zone.accumulators().date, NaiveDate::from_ymd_opt(2025, 1, 15));
    }

    #[test]
    fn test_polled_heating_split_at_midnight() {
        let mut zone = coordinator(switch_zone(), Arc::new(MemoryStore::new()));
        for step in 0..12 {
            zone.refresh(jan(14, 23, 0) + Duration::minutes(step * 5), &sensors(20.0, 5.0, true));
        }
        // 23:55 -> 00:10, heating throughout
        zone.refresh(jan(15, 0, 10), &sensors(20.0, 5.0, true));
        let archived = zone.model().ledger().entries()[0].clone();
        assert!((archived.heating_hours - 1.0).abs() < 1e-9);
        assert!((zone.accumulators().heating_seconds - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_alert_with_contact_sensor() {
        let mut config = switch_zone();
        config.window_sensor = Some("binary_sensor.window".to_string());
        config.window_notification_enabled = true;
        let mut zone = coordinator(config, Arc::new(MemoryStore::new()));

        let mut inputs = sensors(20.0, 5.0, true);
        inputs.set_contact("binary_sensor.window", false);
        zone.refresh(jan(14, 8, 0), &inputs);
        assert!(!zone.window_alert().is_pending());

        inputs.set_contact("binary_sensor.window", true);
        let snapshot = zone.refresh(jan(14, 8, 1), &inputs);
        assert!(snapshot.window_open);
        assert_eq!(snapshot.window_detection, Some(WindowDetectionMethod::Sensor));
        assert!(zone.window_alert().is_pending());

        assert_eq!(zone.poll_window_alert(jan(14, 8, 2)), None);
        assert_eq!(zone.poll_window_alert(jan(14, 8, 3)), Some(AlertOutcome::Fired));
    }

    #[test]
    fn test_window_alert_cancelled_when_heating_stops() {
        let mut config = power_zone();
        config.window_sensor = Some("binary_sensor.window".to_string());
        config.window_notification_enabled = true;
        let mut zone = coordinator(config, Arc::new(MemoryStore::new()));

        let mut inputs = sensors(20.0, 5.0, false);
        inputs.set_contact("binary_sensor.window", true);
        zone.refresh(jan(14, 8, 0), &inputs);
        assert!(zone.is_window_open());
        assert!(!zone.window_alert().is_pending());

        zone.on_power_change(Some(0.0), Some(900.0), jan(14, 8, 1));
        assert!(zone.window_alert().is_pending());
        zone.on_power_change(Some(900.0), Some(0.0), jan(14, 8, 2));
        assert!(!zone.window_alert().is_pending());
        assert_eq!(zone.poll_window_alert(jan(14, 8, 10)), None);
    }

    #[test]
    fn test_realtime_window_detection_takes_over_polling() {
        let mut zone = coordinator(switch_zone(), Arc::new(MemoryStore::new()));
        zone.refresh(jan(14, 8, 0), &sensors(21.0, 5.0, false));

        zone.on_temperature_change(Some(21.0), jan(14, 8, 0));
        zone.on_temperature_change(Some(19.5), jan(14, 8, 1));
        let transition = zone.on_temperature_change(Some(18.0), jan(14, 8, 2));
        assert!(matches!(transition, Some(WindowTransition::Opened { .. })));
        assert!(zone.is_window_open());

        let snapshot = zone.refresh(jan(14, 8, 3), &sensors(18.0, 5.0, false));
        assert!(snapshot.window_open);
        assert_eq!(snapshot.window_detection, Some(WindowDetectionMethod::Realtime));
    }

    #[test]
    fn test_external_counter_increments() {
        let mut config = switch_zone();
        config.heat_source_type = HeatSourceType::Heatpump;
        config.energy_sensor = Some("sensor.energy".to_string());
        let mut zone = coordinator(config, Arc::new(MemoryStore::new()));

        let mut inputs = sensors(20.0, 5.0, true);
        for (minute, counter) in [(0, 100.0), (1, 100.5), (2, 101.0), (3, 0.25)] {
            inputs.set_numeric("sensor.energy", counter);
            zone.refresh(jan(14, 8, minute), &inputs);
        }
        // 0.5 + 0.5 + 0.25 after the counter reset
        assert!((zone.accumulators().external_kwh - 1.25).abs() < 1e-9);
        let snapshot = zone.current_snapshot(jan(14, 8, 4));
        assert_eq!(snapshot.daily_energy.source, Some(EnergySource::External));
        assert_eq!(snapshot.cop.status, CopStatus::WaitingCalibration);
    }

    #[test]
    fn test_state_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        let mut zone = coordinator(switch_zone(), store.clone());
        run_day(&mut zone, jan(14, 0, 0), 6);
        zone.shutdown(jan(14, 23, 59));
        let k = zone.model().k_24h().unwrap();

        let restored = coordinator(switch_zone(), store);
        assert_eq!(restored.model().sample_count(), 1440);
        assert!((restored.model().k_24h().unwrap() - k).abs() < 1e-9);
        assert_eq!(restored.accumulators().delta_t_count, 1440);
        let snapshot = restored.current_snapshot(jan(15, 0, 0));
        assert!(snapshot.stale);
        assert_eq!(snapshot.k_24h, restored.model().k_24h());
    }

    struct FailingStore;

    impl ZoneStore for FailingStore {
        fn load(&self, _zone: &str) -> Result<Option<PersistedZone>, EngineError> {
            Err(EngineError::PersistenceError("disk on fire".to_string()))
        }

        fn save(&self, _zone: &str, _state: &PersistedZone) -> Result<(), EngineError> {
            Err(EngineError::PersistenceError("disk on fire".to_string()))
        }
    }

    #[test]
    fn test_persistence_failures_do_not_stop_the_zone() {
        let mut zone =
            ZoneCoordinator::new(switch_zone(), &EngineSettings::default(), Arc::new(FailingStore))
                .unwrap();
        assert_eq!(zone.model().sample_count(), 0);
        let snapshot = zone.refresh(jan(14, 8, 0), &sensors(20.0, 5.0, true));
        assert!(!snapshot.stale);
        assert!(!zone.save(jan(14, 8, 1)));
    }

    #[test]
    fn test_maybe_save_respects_interval() {
        let store = Arc::new(MemoryStore::new());
        let mut zone = coordinator(switch_zone(), store.clone());
        assert!(zone.maybe_save(jan(14, 8, 0)));
        assert!(!zone.maybe_save(jan(14, 8, 4)));
        assert!(zone.maybe_save(jan(14, 8, 5)));
        assert!(store.contains("living_room"));
    }

    #[test]
    fn test_reset_all() {
        let mut zone = coordinator(switch_zone(), Arc::new(MemoryStore::new()));
        run_day(&mut zone, jan(14, 0, 0), 6);
        zone.reset_all(jan(14, 23, 59));
        assert_eq!(zone.model().sample_count(), 0);
        assert_eq!(zone.model().last_valid(), None);
        assert!(!zone.accumulators().has_samples());
        assert_eq!(zone.heating_hours_today(jan(14, 23, 59)), 0.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ZoneConfig::new("Bare", "sensor.indoor", "sensor.outdoor");
        let result = ZoneCoordinator::new(
            config,
            &EngineSettings::default(),
            Arc::new(MemoryStore::new()),
        );
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }
}
