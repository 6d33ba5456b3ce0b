use serde::Deserialize;

/// Main configuration structure for the spider engine
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Execution behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interpreter used to run synthesized script spiders
    pub interpreter: String,

    /// Root directory for per-execution output directories
    #[serde(rename = "files-dir")]
    pub files_dir: String,

    /// Root directory for raw stdout/stderr captures
    #[serde(rename = "logs-dir")]
    pub logs_dir: String,

    /// Directory where synthesized programs are written before launch
    #[serde(rename = "scripts-dir")]
    pub scripts_dir: String,

    /// Time a stopped spider gets to exit after SIGTERM before it is killed (seconds)
    #[serde(rename = "stop-grace-seconds")]
    pub stop_grace_seconds: u64,

    /// Hard wall-clock limit for direct calls (seconds)
    #[serde(rename = "direct-call-timeout-seconds")]
    pub direct_call_timeout_seconds: u64,

    /// Program that runs rule-based spiders; defaults to the current executable
    #[serde(rename = "worker-program")]
    pub worker_program: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            files_dir: "spider_files".to_string(),
            logs_dir: "spider_logs".to_string(),
            scripts_dir: "spider_scripts".to_string(),
            stop_grace_seconds: 5,
            direct_call_timeout_seconds: 300,
            worker_program: None,
        }
    }
}

/// Direct-call rate limiting configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum minutes between two direct calls of the same spider (0 disables)
    #[serde(rename = "interval-minutes")]
    pub interval_minutes: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
        }
    }
}

/// Persistent store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "spider_management.db".to_string(),
        }
    }
}
