//! Storage module for persisting spider data
//!
//! This module handles all database operations the engine depends on:
//! - Spider records with status and run counters
//! - Append-only log entries
//! - File artifact registration with per-spider path uniqueness
//! - Key-value settings

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{init_database, SqliteStorage};
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::SpiderStatus;
use crate::EngineError;

use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> Result<SqliteStorage, EngineError> {
    SqliteStorage::new(path)
}

/// Locks a shared storage backend
///
/// A poisoned lock means a previous holder panicked mid-operation; it is
/// reported instead of propagating the panic.
pub fn lock<S>(storage: &Mutex<S>) -> StorageResult<MutexGuard<'_, S>> {
    storage.lock().map_err(|_| StorageError::Poisoned)
}

/// Represents a spider in the database
#[derive(Debug, Clone)]
pub struct SpiderRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub code: String,
    pub status: SpiderStatus,
    /// Raw JSON configuration text
    pub config: String,
    pub created_at: String,
    pub updated_at: String,
    pub last_run_at: Option<String>,
    pub run_count: u32,
    pub success_count: u32,
    pub error_count: u32,
}

/// Fields needed to create a spider
#[derive(Debug, Clone, Default)]
pub struct NewSpider {
    pub name: String,
    pub description: Option<String>,
    pub code: String,
    pub config: serde_json::Value,
}

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Component that produced a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogSource {
    /// Lifecycle messages written by the engine itself
    SpiderRunner,
    /// A line the spider process wrote to stdout
    SpiderOutput,
    /// A line the spider process wrote to stderr
    SpiderError,
    User,
    Scheduler,
    /// Direct-call lifecycle messages
    ApiCall,
}

impl LogSource {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::SpiderRunner => "spider_runner",
            Self::SpiderOutput => "spider_output",
            Self::SpiderError => "spider_error",
            Self::User => "user",
            Self::Scheduler => "scheduler",
            Self::ApiCall => "api_call",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "spider_runner" => Some(Self::SpiderRunner),
            "spider_output" => Some(Self::SpiderOutput),
            "spider_error" => Some(Self::SpiderError),
            "user" => Some(Self::User),
            "scheduler" => Some(Self::Scheduler),
            "api_call" => Some(Self::ApiCall),
            _ => None,
        }
    }
}

/// A log entry to append
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub spider_id: i64,
    pub level: LogLevel,
    pub message: String,
    pub source: LogSource,
    pub execution_id: Option<String>,
}

impl NewLogEntry {
    pub fn new(
        spider_id: i64,
        level: LogLevel,
        source: LogSource,
        message: impl Into<String>,
    ) -> Self {
        Self {
            spider_id,
            level,
            message: message.into(),
            source,
            execution_id: None,
        }
    }

    pub fn with_execution(mut self, execution_id: &str) -> Self {
        self.execution_id = Some(execution_id.to_string());
        self
    }
}

/// Represents a stored log entry
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: i64,
    pub spider_id: i64,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: String,
    pub source: Option<LogSource>,
    pub execution_id: Option<String>,
}

/// A file artifact to register
#[derive(Debug, Clone)]
pub struct NewFileArtifact {
    pub spider_id: i64,
    pub filename: String,
    pub path: String,
    pub file_type: String,
    pub size: u64,
    pub execution_id: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
}

/// Represents a registered file artifact
#[derive(Debug, Clone)]
pub struct FileArtifact {
    pub id: i64,
    pub spider_id: i64,
    pub filename: String,
    pub path: String,
    pub file_type: String,
    pub size: u64,
    pub created_at: String,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub execution_id: Option<String>,
}

/// Derives the artifact type from a filename extension
pub fn file_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("csv") => "csv",
        Some("json") => "json",
        Some("txt") => "text",
        Some("log") => "log",
        Some("jpg") | Some("jpeg") | Some("png") | Some("gif") => "image",
        Some("pdf") => "pdf",
        Some("xlsx") | Some("xls") => "excel",
        Some("html") => "html",
        Some("xml") => "xml",
        _ => "unknown",
    }
}
