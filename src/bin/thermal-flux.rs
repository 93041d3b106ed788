//! Thermal Flux CLI - Command-line interface for the thermal-loss engine
//!
//! Commands:
//! - replay: Feed recorded sensor events through the configured zones
//! - status: Print the insulation status restored from saved state
//! - reset: Operator reset of a zone's history or calibration
//! - doctor: Diagnose configuration and saved state

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use thermal_flux::config::EngineConfig;
use thermal_flux::sensors::{SensorState, StaticSensors};
use thermal_flux::store::{JsonFileStore, MemoryStore, ZoneStore};
use thermal_flux::types::ZoneSnapshot;
use thermal_flux::{AlertNotice, EngineError, ZoneRegistry, ENGINE_VERSION, PRODUCER_NAME};

/// Thermal Flux - Heat-loss coefficient engine for heated rooms
#[derive(Parser)]
#[command(name = "thermal-flux")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Estimate room heat-loss coefficients from sensor history", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded sensor events through the configured zones
    Replay {
        /// Engine configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Directory holding per-zone state; in-memory when omitted
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Print the insulation status of saved zones
    Status {
        /// Engine configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory holding per-zone state
        #[arg(long)]
        state_dir: PathBuf,

        /// Only this zone
        #[arg(long)]
        zone: Option<String>,

        /// Output full snapshots as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset a zone's daily history (or everything with --all)
    Reset {
        /// Engine configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Directory holding per-zone state
        #[arg(long)]
        state_dir: PathBuf,

        /// Zone name
        #[arg(long)]
        zone: String,

        /// Also drop samples, K values and energy totals
        #[arg(long)]
        all: bool,
    },

    /// Diagnose configuration and saved state
    Doctor {
        /// Engine configuration to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// State directory to check
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

/// One recorded sensor state change. A null state marks the entity
/// unavailable.
#[derive(Debug, Deserialize)]
struct ReplayEvent {
    at: DateTime<Utc>,
    entity_id: String,
    #[serde(default)]
    state: Option<SensorState>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplayRecord {
    Snapshot(ZoneSnapshot),
    Alert(AlertNotice),
}

fn main() -> ExitCode {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"),
    );
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Replay {
            config,
            input,
            output,
            state_dir,
            output_format,
        } => cmd_replay(&config, &input, &output, state_dir.as_deref(), output_format),

        Commands::Status {
            config,
            state_dir,
            zone,
            json,
        } => cmd_status(&config, &state_dir, zone.as_deref(), json),

        Commands::Reset {
            config,
            state_dir,
            zone,
            all,
        } => cmd_reset(&config, &state_dir, &zone, all),

        Commands::Doctor {
            config,
            state_dir,
            json,
        } => cmd_doctor(config.as_deref(), state_dir.as_deref(), json),
    }
}

fn cmd_replay(
    config: &Path,
    input: &Path,
    output: &Path,
    state_dir: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), FluxCliError> {
    let config = load_config(config)?;
    let store: Arc<dyn ZoneStore> = match state_dir {
        Some(dir) => Arc::new(JsonFileStore::new(dir)),
        None => Arc::new(MemoryStore::new()),
    };
    let registry = ZoneRegistry::from_config(&config, store)?;

    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };
    let mut events = parse_events(&input_data)?;
    if events.is_empty() {
        return Err(FluxCliError::NoEvents);
    }
    events.sort_by_key(|event| event.at);

    let interval = Duration::seconds(i64::try_from(config.settings.scan_interval_secs.max(1)).unwrap_or(60));
    let mut sensors = StaticSensors::new();
    let mut records: Vec<ReplayRecord> = Vec::new();
    let mut next_tick = events[0].at;

    for event in &events {
        while next_tick < event.at {
            tick(&registry, &sensors, next_tick, &mut records);
            next_tick += interval;
        }
        let change = match &event.state {
            Some(state) => sensors.set(&event.entity_id, state.clone(), event.at),
            None => sensors.mark_unavailable(&event.entity_id, event.at),
        };
        registry.route_change(&change);
    }

    let last_at = events[events.len() - 1].at;
    while next_tick <= last_at {
        tick(&registry, &sensors, next_tick, &mut records);
        next_tick += interval;
    }
    registry.shutdown_all(last_at);

    let output_data = format_output(&records, &output_format)?;
    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        write!(stdout, "{}", output_data)?;
        stdout.flush()?;
    } else {
        fs::write(output, output_data)?;
    }
    Ok(())
}

fn tick(
    registry: &ZoneRegistry,
    sensors: &StaticSensors,
    now: DateTime<Utc>,
    records: &mut Vec<ReplayRecord>,
) {
    records.extend(
        registry
            .refresh_all(now, sensors)
            .into_iter()
            .map(ReplayRecord::Snapshot),
    );
    records.extend(registry.poll_alerts(now).into_iter().map(ReplayRecord::Alert));
}

fn cmd_status(
    config: &Path,
    state_dir: &Path,
    zone: Option<&str>,
    json: bool,
) -> Result<(), FluxCliError> {
    let config = load_config(config)?;
    let registry = ZoneRegistry::from_config(&config, Arc::new(JsonFileStore::new(state_dir)))?;
    let now = Utc::now();
    let zones = match zone {
        Some(zone) => vec![zone.to_string()],
        None => registry.zone_names(),
    };

    let mut snapshots = Vec::new();
    for zone in &zones {
        snapshots.push(registry.snapshot(zone, now)?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    println!("Thermal Flux Status");
    println!("===================");
    for snapshot in &snapshots {
        let status = &snapshot.insulation;
        println!("\n{}", snapshot.zone);
        println!("  State:        {:?}", status.state);
        println!("  Season:       {:?}", status.season);
        println!("  K:            {}", format_k(status.k_value));
        println!("  K (24h):      {}", format_k(snapshot.k_24h));
        println!("  K (7d):       {}", format_k(snapshot.k_7d));
        if let Some(rating) = status.rating {
            println!("  Rating:       {:?}", rating);
        }
        if let Some(last_valid) = snapshot.last_valid_k {
            println!("  Last valid:   {:.1} W/°C on {}", last_valid.k, last_valid.date);
        }
        println!(
            "  Data:         {:.1}h, {} samples, {} history days",
            snapshot.readiness.data_hours, snapshot.readiness.sample_count, snapshot.history_days
        );
        if let Some(message) = &status.message {
            println!("  Note:         {}", message);
        }
    }
    Ok(())
}

fn cmd_reset(config: &Path, state_dir: &Path, zone: &str, all: bool) -> Result<(), FluxCliError> {
    let config = load_config(config)?;
    let registry = ZoneRegistry::from_config(&config, Arc::new(JsonFileStore::new(state_dir)))?;
    if all {
        registry.reset_all(zone)?;
        println!("Reset all data for {}", zone);
    } else {
        registry.reset_history(zone)?;
        println!("Reset history for {}", zone);
    }
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, state_dir: Option<&Path>, json: bool) -> Result<(), FluxCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Thermal Flux version {}", ENGINE_VERSION),
    });

    let mut loaded: Option<EngineConfig> = None;
    if let Some(config_path) = config {
        match load_config(config_path) {
            Ok(engine_config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: if engine_config.zones.is_empty() {
                        CheckStatus::Warning
                    } else {
                        CheckStatus::Ok
                    },
                    message: format!("Configuration valid ({} zones)", engine_config.zones.len()),
                });
                loaded = Some(engine_config);
            }
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid configuration: {}", CliError::from(e).message),
            }),
        }
    }

    if let Some(dir) = state_dir {
        if !dir.is_dir() {
            checks.push(DoctorCheck {
                name: "state_dir".to_string(),
                status: CheckStatus::Warning,
                message: "State directory does not exist".to_string(),
            });
        } else if let Some(engine_config) = &loaded {
            let store = JsonFileStore::new(dir);
            for zone in &engine_config.zones {
                let name = format!("state:{}", zone.slug());
                let check = match store.load(&zone.slug()) {
                    Ok(Some(state)) => DoctorCheck {
                        name,
                        status: CheckStatus::Ok,
                        message: format!(
                            "{} samples, {} history days, saved {}",
                            state.model.samples.len(),
                            state.model.ledger.len(),
                            state.saved_at.to_rfc3339()
                        ),
                    },
                    Ok(None) => DoctorCheck {
                        name,
                        status: CheckStatus::Warning,
                        message: "No saved state yet".to_string(),
                    },
                    Err(e) => DoctorCheck {
                        name,
                        status: CheckStatus::Error,
                        message: e.to_string(),
                    },
                };
                checks.push(check);
            }
        } else {
            checks.push(DoctorCheck {
                name: "state_dir".to_string(),
                status: CheckStatus::Ok,
                message: format!("State directory {}", dir.display()),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay input ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Thermal Flux Doctor Report");
        println!("==========================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    if report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error)) {
        Err(FluxCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn load_config(path: &Path) -> Result<EngineConfig, FluxCliError> {
    let json = fs::read_to_string(path)?;
    Ok(EngineConfig::from_json(&json)?)
}

fn parse_events(ndjson: &str) -> Result<Vec<ReplayEvent>, FluxCliError> {
    let mut events = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event: ReplayEvent = serde_json::from_str(trimmed).map_err(|e| {
            FluxCliError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
        })?;
        events.push(event);
    }
    Ok(events)
}

fn format_output(records: &[ReplayRecord], format: &OutputFormat) -> Result<String, FluxCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)?),
    }
}

fn format_k(k: Option<f64>) -> String {
    k.map_or_else(|| "n/a".to_string(), |k| format!("{:.1} W/°C", k))
}

// Error types

#[derive(Debug)]
enum FluxCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoEvents,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for FluxCliError {
    fn from(e: io::Error) -> Self {
        FluxCliError::Io(e)
    }
}

impl From<EngineError> for FluxCliError {
    fn from(e: EngineError) -> Self {
        FluxCliError::Engine(e)
    }
}

impl From<serde_json::Error> for FluxCliError {
    fn from(e: serde_json::Error) -> Self {
        FluxCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        match e {
            FluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FluxCliError::Engine(EngineError::ZoneNotFound(zone)) => CliError {
                code: "ZONE_NOT_FOUND".to_string(),
                message: format!("Zone not found: {}", zone),
                hint: Some("Run 'thermal-flux status' to list configured zones".to_string()),
            },
            FluxCliError::Engine(e @ EngineError::InvalidConfig(_))
            | FluxCliError::Engine(e @ EngineError::DuplicateZone(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'thermal-flux doctor --config <file>' for details".to_string()),
            },
            FluxCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            FluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FluxCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FluxCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            FluxCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be {\"at\", \"entity_id\", \"state\"}".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
