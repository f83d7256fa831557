//! Survey simulation engine binary.
//!
//! Wires the survey driver to its infrastructure: loads configuration,
//! sets up logging, connects the NATS bus, selects the storage sink, and
//! runs the survey to completion.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$SOCS_CONFIG` or `socs-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Connect to NATS and subscribe to the scheduler's subjects
//! 4. Open the storage sink (in-memory or `PostgreSQL`)
//! 5. Run the survey
//! 6. Log the result
//!
//! `SOCS_DURATION` overrides the survey length (fraction of a year).

mod error;
mod nats_bus;

use std::path::PathBuf;

use socs_core::config::{LoggingConfig, SimulationConfig, StorageBackend};
use socs_core::simulator::{Models, RunSummary, Simulator};
use socs_core::storage::{MemorySink, StorageSink};
use socs_db::{PostgresConfig, PostgresPool, PostgresSink};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::nats_bus::NatsBus;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "socs-config.yaml";

/// Survey length override, as a fraction of a year.
const DURATION_VAR: &str = "SOCS_DURATION";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the survey run fails.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration (logging depends on it).
    let (config, config_path) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        config = %config_path.display(),
        start_date = %config.survey.start_date,
        duration = config.survey.duration,
        storage = ?config.infrastructure.storage,
        "socs-engine starting"
    );

    let duration = duration_override()?.unwrap_or(config.survey.duration);

    // 3. Connect to NATS.
    let mut bus = NatsBus::connect(&config.infrastructure.nats_url).await?;

    // 4. Open the storage sink.
    let mut sink = open_sink(&config).await?;

    // 5. Run the survey. The driver is synchronous and polls with short
    //    sleeps, so it runs off the async executor.
    let summary = tokio::task::block_in_place(|| -> Result<RunSummary, EngineError> {
        let mut simulator = Simulator::with_duration(
            &config,
            duration,
            Models::from_config(&config),
            &mut bus,
            sink.as_mut(),
        )?;
        Ok(simulator.run()?)
    })?;

    // 6. Log the result.
    info!(
        session_id = ?summary.session_id,
        nights = summary.nights,
        down_nights = summary.down_nights,
        observations = summary.observations,
        targets_received = summary.targets_received,
        missed_interest = summary.missed_interest,
        filter_swaps = summary.filter_swaps,
        end_time = %summary.end_time,
        "Survey complete"
    );

    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load configuration from `$SOCS_CONFIG`, falling back to
/// `socs-config.yaml`, then to defaults when that file is absent.
fn load_config() -> Result<(SimulationConfig, PathBuf), EngineError> {
    let path = std::env::var_os("SOCS_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        let config = SimulationConfig::from_file(&path)?;
        Ok((config, path))
    } else {
        let mut config = SimulationConfig::default();
        config.infrastructure.apply_env_overrides();
        Ok((config, path))
    }
}

/// Parse `SOCS_DURATION` when set.
fn duration_override() -> Result<Option<f64>, EngineError> {
    let Ok(value) = std::env::var(DURATION_VAR) else {
        return Ok(None);
    };
    parse_duration(value).map(Some)
}

fn parse_duration(value: String) -> Result<f64, EngineError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|source| EngineError::InvalidOverride {
            name: DURATION_VAR,
            value,
            source,
        })
}

async fn open_sink(
    config: &SimulationConfig,
) -> Result<Box<dyn StorageSink + Send>, EngineError> {
    match config.infrastructure.storage {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Ok(Box::new(MemorySink::new()))
        }
        StorageBackend::Postgres => {
            let pg = PostgresConfig::from_infrastructure(&config.infrastructure);
            let pool = PostgresPool::connect_migrated(&pg).await?;
            Ok(Box::new(PostgresSink::new(pool)))
        }
    }
}
