//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::SpiderStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    FileArtifact, LogEntry, LogLevel, LogSource, NewFileArtifact, NewLogEntry, NewSpider,
    SpiderRecord,
};
use crate::EngineError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const SPIDER_COLUMNS: &str = "id, name, description, code, status, config, created_at,
     updated_at, last_run_at, run_count, success_count, error_count";

const LOG_COLUMNS: &str = "id, spider_id, level, message, timestamp, source, execution_id";

const FILE_COLUMNS: &str = "id, spider_id, filename, file_path, file_type, file_size,
     created_at, description, tags, execution_id";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(EngineError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, EngineError> {
        let conn = init_database(path)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database (for tests and dry runs)
    pub fn new_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn touch_spider(&self, sql: &str, spider_id: i64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(sql, params![now, spider_id])?;
        if changed == 0 {
            return Err(StorageError::SpiderNotFound(spider_id));
        }
        Ok(())
    }
}

fn spider_from_row(row: &Row<'_>) -> rusqlite::Result<SpiderRecord> {
    Ok(SpiderRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        code: row.get(3)?,
        status: SpiderStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(SpiderStatus::Inactive),
        config: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        last_run_at: row.get(8)?,
        run_count: row.get(9)?,
        success_count: row.get(10)?,
        error_count: row.get(11)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        spider_id: row.get(1)?,
        level: LogLevel::from_db_string(&row.get::<_, String>(2)?).unwrap_or(LogLevel::Info),
        message: row.get(3)?,
        timestamp: row.get(4)?,
        source: row
            .get::<_, Option<String>>(5)?
            .as_deref()
            .and_then(LogSource::from_db_string),
        execution_id: row.get(6)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileArtifact> {
    Ok(FileArtifact {
        id: row.get(0)?,
        spider_id: row.get(1)?,
        filename: row.get(2)?,
        path: row.get(3)?,
        file_type: row
            .get::<_, Option<String>>(4)?
            .unwrap_or_else(|| "unknown".to_string()),
        size: row.get::<_, i64>(5)?.max(0) as u64,
        created_at: row.get(6)?,
        description: row.get(7)?,
        tags: row.get(8)?,
        execution_id: row.get(9)?,
    })
}

fn insert_log(conn: &Connection, entry: &NewLogEntry) -> rusqlite::Result<i64> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO spider_logs (spider_id, level, message, timestamp, source, execution_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.spider_id,
            entry.level.to_db_string(),
            entry.message,
            now,
            entry.source.to_db_string(),
            entry.execution_id
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Storage for SqliteStorage {
    // ===== Spider Records =====

    fn create_spider(&mut self, spider: &NewSpider) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        let config = serde_json::to_string(&spider.config)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO spiders (name, description, code, status, created_at, updated_at, config)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)",
                params![
                    spider.name,
                    spider.description,
                    spider.code,
                    SpiderStatus::Inactive.to_db_string(),
                    now,
                    config
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StorageError::ConstraintViolation(format!(
                        "spider name '{}' already exists",
                        spider.name
                    ))
                }
                other => StorageError::Sqlite(other),
            })?;

        Ok(self.conn.last_insert_rowid())
    }

    fn get_spider(&self, spider_id: i64) -> StorageResult<Option<SpiderRecord>> {
        let sql = format!("SELECT {} FROM spiders WHERE id = ?1", SPIDER_COLUMNS);
        let spider = self
            .conn
            .query_row(&sql, params![spider_id], spider_from_row)
            .optional()?;
        Ok(spider)
    }

    fn list_spiders(&self) -> StorageResult<Vec<SpiderRecord>> {
        let sql = format!("SELECT {} FROM spiders ORDER BY id DESC", SPIDER_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let spiders = stmt
            .query_map([], spider_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(spiders)
    }

    fn update_spider_status(&mut self, spider_id: i64, status: SpiderStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE spiders SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, spider_id],
        )?;
        if changed == 0 {
            return Err(StorageError::SpiderNotFound(spider_id));
        }
        Ok(())
    }

    fn increment_run_count(&mut self, spider_id: i64) -> StorageResult<()> {
        self.touch_spider(
            "UPDATE spiders SET run_count = run_count + 1, last_run_at = ?1, updated_at = ?1
             WHERE id = ?2",
            spider_id,
        )
    }

    fn increment_success_count(&mut self, spider_id: i64) -> StorageResult<()> {
        self.touch_spider(
            "UPDATE spiders SET success_count = success_count + 1, updated_at = ?1 WHERE id = ?2",
            spider_id,
        )
    }

    fn increment_error_count(&mut self, spider_id: i64) -> StorageResult<()> {
        self.touch_spider(
            "UPDATE spiders SET error_count = error_count + 1, updated_at = ?1 WHERE id = ?2",
            spider_id,
        )
    }

    // ===== Logs =====

    fn append_log(&mut self, entry: &NewLogEntry) -> StorageResult<i64> {
        Ok(insert_log(&self.conn, entry)?)
    }

    fn append_logs(&mut self, entries: &[NewLogEntry]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        for entry in entries {
            insert_log(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_spider_logs(&self, spider_id: i64, limit: u32) -> StorageResult<Vec<LogEntry>> {
        let sql = format!(
            "SELECT {} FROM spider_logs WHERE spider_id = ?1 ORDER BY id DESC LIMIT ?2",
            LOG_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![spider_id, limit], log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    fn get_execution_logs(&self, execution_id: &str) -> StorageResult<Vec<LogEntry>> {
        let sql = format!(
            "SELECT {} FROM spider_logs WHERE execution_id = ?1 ORDER BY id ASC",
            LOG_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let logs = stmt
            .query_map(params![execution_id], log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    // ===== Files =====

    fn register_file(&mut self, file: &NewFileArtifact) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        let size = i64::try_from(file.size).unwrap_or(i64::MAX);

        // The (spider_id, file_path) unique index makes a repeated registration a no-op
        self.conn.execute(
            "INSERT INTO spider_files (spider_id, filename, file_path, file_type, file_size,
             created_at, description, tags, execution_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(spider_id, file_path) DO NOTHING",
            params![
                file.spider_id,
                file.filename,
                file.path,
                file.file_type,
                size,
                now,
                file.description,
                file.tags,
                file.execution_id
            ],
        )?;

        let id = self.conn.query_row(
            "SELECT id FROM spider_files WHERE spider_id = ?1 AND file_path = ?2",
            params![file.spider_id, file.path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn find_file_by_path(&self, spider_id: i64, path: &str) -> StorageResult<Option<FileArtifact>> {
        let sql = format!(
            "SELECT {} FROM spider_files WHERE spider_id = ?1 AND file_path = ?2",
            FILE_COLUMNS
        );
        let file = self
            .conn
            .query_row(&sql, params![spider_id, path], file_from_row)
            .optional()?;
        Ok(file)
    }

    fn get_spider_files(&self, spider_id: i64) -> StorageResult<Vec<FileArtifact>> {
        let sql = format!(
            "SELECT {} FROM spider_files WHERE spider_id = ?1 ORDER BY id DESC",
            FILE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let files = stmt
            .query_map(params![spider_id], file_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }

    // ===== Settings =====

    fn get_setting(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_setting(&mut self, key: &str, value: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO settings (key, value, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }
}

/// Initializes or opens a database at the given path
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(Connection)` - Successfully opened/created database
/// * `Err(rusqlite::Error)` - Failed to open database
pub fn init_database(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
    ",
    )?;

    initialize_schema(&conn)?;

    Ok(conn)
}
