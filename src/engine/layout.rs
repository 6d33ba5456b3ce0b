//! On-disk layout of execution artifacts
//!
//! ```text
//! <files-dir>/spider_<id>/<execution_id>/...        files written by the spider
//! <logs-dir>/spider_<id>/<execution_id>_stdout.log  raw captured streams
//! <scripts-dir>/spider_<id>_<execution_id>.<ext>    synthesized program
//! ```

use crate::config::EngineConfig;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Layout {
    files_dir: PathBuf,
    logs_dir: PathBuf,
    scripts_dir: PathBuf,
}

impl Layout {
    /// Creates the three base directories and resolves them to absolute paths
    pub fn new(files_dir: &Path, logs_dir: &Path, scripts_dir: &Path) -> io::Result<Self> {
        Ok(Self {
            files_dir: prepare(files_dir)?,
            logs_dir: prepare(logs_dir)?,
            scripts_dir: prepare(scripts_dir)?,
        })
    }

    pub fn from_config(config: &EngineConfig) -> io::Result<Self> {
        Self::new(
            Path::new(&config.files_dir),
            Path::new(&config.logs_dir),
            Path::new(&config.scripts_dir),
        )
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Output directory of one execution
    pub fn output_dir(&self, spider_id: i64, execution_id: &str) -> PathBuf {
        self.files_dir
            .join(format!("spider_{}", spider_id))
            .join(execution_id)
    }

    /// Raw log file of one captured stream
    pub fn stream_log_path(&self, spider_id: i64, execution_id: &str, stream: &str) -> PathBuf {
        self.logs_dir
            .join(format!("spider_{}", spider_id))
            .join(format!("{}_{}.log", execution_id, stream))
    }

    /// Program file of one execution
    pub fn script_path(&self, spider_id: i64, execution_id: &str, extension: &str) -> PathBuf {
        self.scripts_dir
            .join(format!("spider_{}_{}.{}", spider_id, execution_id, extension))
    }
}

fn prepare(dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    dir.canonicalize()
}
