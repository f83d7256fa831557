//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during start-up and the survey run.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: socs_core::config::ConfigError,
    },

    /// The survey run failed.
    #[error("simulation error: {source}")]
    Simulator {
        /// The underlying simulator error.
        #[from]
        source: socs_core::simulator::SimulatorError,
    },

    /// Database connection or migration failed.
    #[error("database error: {source}")]
    Db {
        /// The underlying database error.
        #[from]
        source: socs_db::DbError,
    },

    /// NATS connection or subscription failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },

    /// An environment override could not be parsed.
    #[error("invalid value for {name}: {value:?} ({source})")]
    InvalidOverride {
        /// Environment variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        source: std::num::ParseFloatError,
    },
}
