//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the spider database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Stored spiders with their status and run counters
CREATE TABLE IF NOT EXISTS spiders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    code TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'inactive',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_run_at TEXT,
    run_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    config TEXT NOT NULL DEFAULT '{}'
);

-- Append-only execution logs
CREATE TABLE IF NOT EXISTS spider_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    spider_id INTEGER NOT NULL REFERENCES spiders(id) ON DELETE CASCADE,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    source TEXT,
    execution_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_spider_logs_spider ON spider_logs(spider_id);
CREATE INDEX IF NOT EXISTS idx_spider_logs_execution ON spider_logs(execution_id);

-- Registered file artifacts
CREATE TABLE IF NOT EXISTS spider_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    spider_id INTEGER NOT NULL REFERENCES spiders(id) ON DELETE CASCADE,
    filename TEXT NOT NULL,
    file_path TEXT NOT NULL,
    file_type TEXT,
    file_size INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    description TEXT,
    tags TEXT,
    execution_id TEXT,
    UNIQUE(spider_id, file_path)
);

CREATE INDEX IF NOT EXISTS idx_spider_files_spider ON spider_files(spider_id);

-- Key-value settings (JSON values)
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
