//! Output ingestion
//!
//! Converts what a finished spider process left behind into persistent state:
//! - Raw stdout/stderr are saved as `log` file artifacts
//! - Each non-empty line becomes a log entry (stdout INFO, stderr ERROR)
//! - Files in the execution's output directory are registered once

use crate::engine::Layout;
use crate::storage::{self, file_type_for, LogLevel, LogSource, NewFileArtifact, NewLogEntry, Storage};
use crate::supervisor::ProcessOutput;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// What one ingestion pass stored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub stdout_lines: usize,
    pub stderr_lines: usize,
    pub stream_files: usize,
}

/// Writes process output into the store
pub struct OutputIngestor<S: Storage> {
    storage: Arc<Mutex<S>>,
    layout: Layout,
}

impl<S: Storage> OutputIngestor<S> {
    pub fn new(storage: Arc<Mutex<S>>, layout: Layout) -> Self {
        Self { storage, layout }
    }

    /// Stores captured streams and their lines
    ///
    /// # Arguments
    ///
    /// * `spider_id` - Spider that produced the output
    /// * `execution_id` - Execution the output belongs to
    /// * `output` - Captured streams
    ///
    /// # Returns
    ///
    /// * `Ok(IngestReport)` - Counts of stored lines and stream files
    /// * `Err(EngineError)` - The store rejected a write
    pub fn ingest(&self, spider_id: i64, execution_id: &str, output: &ProcessOutput) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for (stream, text) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            if text.is_empty() {
                continue;
            }
            if self.save_stream(spider_id, execution_id, stream, text)? {
                report.stream_files += 1;
            }
        }

        let mut entries = Vec::new();
        for line in split_lines(&output.stdout) {
            entries.push(
                NewLogEntry::new(spider_id, LogLevel::Info, LogSource::SpiderOutput, line)
                    .with_execution(execution_id),
            );
            report.stdout_lines += 1;
        }
        for line in split_lines(&output.stderr) {
            entries.push(
                NewLogEntry::new(spider_id, LogLevel::Error, LogSource::SpiderError, line)
                    .with_execution(execution_id),
            );
            report.stderr_lines += 1;
        }

        if !entries.is_empty() {
            storage::lock(&self.storage)?.append_logs(&entries)?;
        }

        tracing::debug!(
            "Ingested {} stdout and {} stderr lines for execution {}",
            report.stdout_lines,
            report.stderr_lines,
            execution_id
        );
        Ok(report)
    }

    /// Registers every file in the execution's output directory
    ///
    /// Files already registered under the same path are skipped, so repeated
    /// scans register nothing new.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of newly registered files
    /// * `Err(EngineError)` - Walking the directory or writing the store failed
    pub fn scan_outputs(&self, spider_id: i64, execution_id: &str) -> Result<usize> {
        let output_dir = self.layout.output_dir(spider_id, execution_id);
        if !output_dir.is_dir() {
            return Ok(0);
        }

        let mut registered = 0;
        for path in walk_files(&output_dir)? {
            let absolute = path.to_string_lossy().into_owned();
            let relative = relative_name(&output_dir, &path);
            let size = std::fs::metadata(&path)?.len();

            let mut storage = storage::lock(&self.storage)?;
            if storage.find_file_by_path(spider_id, &absolute)?.is_some() {
                continue;
            }
            storage.register_file(&NewFileArtifact {
                spider_id,
                file_type: file_type_for(&relative).to_string(),
                filename: relative,
                path: absolute,
                size,
                execution_id: Some(execution_id.to_string()),
                description: Some(format!("Generated by spider execution {}", execution_id)),
                tags: None,
            })?;
            registered += 1;
        }

        if registered > 0 {
            tracing::info!(
                "Registered {} output files for execution {}",
                registered,
                execution_id
            );
        }
        Ok(registered)
    }

    /// Saves one raw stream and registers it, returning whether it was new
    fn save_stream(&self, spider_id: i64, execution_id: &str, stream: &str, text: &str) -> Result<bool> {
        let path = self.layout.stream_log_path(spider_id, execution_id, stream);
        let written = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(&path, text));
        if let Err(e) = written {
            tracing::warn!("Failed to save {} log {}: {}", stream, path.display(), e);
            return Ok(false);
        }

        let absolute = path.to_string_lossy().into_owned();
        let mut storage = storage::lock(&self.storage)?;
        if storage.find_file_by_path(spider_id, &absolute)?.is_some() {
            return Ok(false);
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}_{}.log", execution_id, stream));
        storage.register_file(&NewFileArtifact {
            spider_id,
            filename,
            path: absolute,
            file_type: "log".to_string(),
            size: text.len() as u64,
            execution_id: Some(execution_id.to_string()),
            description: Some(format!("Spider {} output", stream)),
            tags: None,
        })?;
        Ok(true)
    }
}

/// Trimmed non-empty lines of a stream
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// All regular files below `root`, in a stable order
fn walk_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = std::fs::read_dir(&dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();

        for path in entries {
            let file_type = std::fs::symlink_metadata(&path)?.file_type();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Path of `path` relative to `root`, with `/` separators
fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
