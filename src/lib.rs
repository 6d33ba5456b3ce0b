//! Spider Engine: execution engine for stored scraping tasks
//!
//! This crate turns stored spider definitions (free-form scripts or declarative
//! extraction rulesets) into supervised child processes, captures their output
//! as logs and file artifacts, and reconciles run results into persistent state.

pub mod config;
pub mod engine;
pub mod extract;
pub mod ingest;
pub mod spider;
pub mod state;
pub mod storage;
pub mod supervisor;
pub mod synth;

use thiserror::Error;

/// Main error type for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Spider {spider_id} is already running")]
    AlreadyRunning { spider_id: i64 },

    #[error("Spider {spider_id} is not running")]
    NotRunning { spider_id: i64 },

    #[error("Spider {spider_id} not found")]
    NotFound { spider_id: i64 },

    #[error("Spider {spider_id} was called too recently, retry in {remaining_seconds:.0}s (at {next_allowed_at})")]
    RateLimited {
        spider_id: i64,
        remaining_seconds: f64,
        next_allowed_at: String,
        interval_minutes: u32,
    },

    #[error("Code synthesis failed: {0}")]
    Synthesis(#[from] synth::SynthesisError),

    #[error("Failed to spawn {program}: {source}")]
    ProcessSpawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

// Re-export commonly used types
pub use config::Config;
pub use engine::{DirectCallResult, ExecutionSnapshot, Orchestrator};
pub use spider::{SourceKind, SpiderDefinition};
pub use state::{ExecutionPhase, SpiderStatus};
pub use storage::{SqliteStorage, Storage};
