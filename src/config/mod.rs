//! Configuration module for the spider engine
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section is optional; missing keys fall back to the defaults the engine
//! has always used (python3 interpreter, 5s stop grace, 300s direct-call timeout,
//! 5 minute direct-call interval).
//!
//! # Example
//!
//! ```no_run
//! use spider_engine::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("engine.toml")).unwrap();
//! println!("Direct calls time out after {}s", config.engine.direct_call_timeout_seconds);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, EngineConfig, RateLimitConfig, StorageConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
