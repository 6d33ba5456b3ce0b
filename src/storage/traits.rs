//! Storage traits and error types
//!
//! This module defines the trait interface the engine uses to reach the
//! persistent store, and associated error types.

use crate::state::SpiderStatus;
use crate::storage::{FileArtifact, LogEntry, NewFileArtifact, NewLogEntry, NewSpider, SpiderRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Spider not found: {0}")]
    SpiderNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// The engine shares one backend between the orchestrator, its background
/// execution tasks and the output ingestor behind a mutex, so implementations
/// must be `Send`.
pub trait Storage: Send {
    // ===== Spider Records =====

    /// Creates a new spider and returns its ID
    fn create_spider(&mut self, spider: &NewSpider) -> StorageResult<i64>;

    /// Gets a spider by ID
    fn get_spider(&self, spider_id: i64) -> StorageResult<Option<SpiderRecord>>;

    /// Lists all spiders, newest first
    fn list_spiders(&self) -> StorageResult<Vec<SpiderRecord>>;

    /// Updates the status of a spider
    fn update_spider_status(&mut self, spider_id: i64, status: SpiderStatus) -> StorageResult<()>;

    /// Increments the run counter and stamps `last_run_at` with the current time
    fn increment_run_count(&mut self, spider_id: i64) -> StorageResult<()>;

    /// Increments the success counter
    fn increment_success_count(&mut self, spider_id: i64) -> StorageResult<()>;

    /// Increments the error counter
    fn increment_error_count(&mut self, spider_id: i64) -> StorageResult<()>;

    // ===== Logs =====

    /// Appends a log entry and returns its ID
    fn append_log(&mut self, entry: &NewLogEntry) -> StorageResult<i64>;

    /// Appends several log entries
    ///
    /// Backends that support transactions should write the batch atomically.
    fn append_logs(&mut self, entries: &[NewLogEntry]) -> StorageResult<()> {
        for entry in entries {
            self.append_log(entry)?;
        }
        Ok(())
    }

    /// Gets the most recent log entries of a spider, newest first
    fn get_spider_logs(&self, spider_id: i64, limit: u32) -> StorageResult<Vec<LogEntry>>;

    /// Gets all log entries of one execution in insertion order
    fn get_execution_logs(&self, execution_id: &str) -> StorageResult<Vec<LogEntry>>;

    // ===== Files =====

    /// Registers a file artifact and returns its ID
    fn register_file(&mut self, file: &NewFileArtifact) -> StorageResult<i64>;

    /// Looks up a registered file by spider and path
    fn find_file_by_path(&self, spider_id: i64, path: &str) -> StorageResult<Option<FileArtifact>>;

    /// Gets all files registered for a spider, newest first
    fn get_spider_files(&self, spider_id: i64) -> StorageResult<Vec<FileArtifact>>;

    // ===== Settings =====

    /// Reads a raw setting value
    fn get_setting(&self, key: &str) -> StorageResult<Option<String>>;

    /// Writes a raw setting value
    fn set_setting(&mut self, key: &str, value: &str) -> StorageResult<()>;
}
