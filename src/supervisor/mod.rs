//! Process supervision
//!
//! Spawns spider programs as child processes in their own process group,
//! drains both output pipes from the moment of spawn, and provides waiting,
//! timeout, termination and kill primitives.

mod child;
mod output;

pub use child::{ChildHandle, WaitOutcome};
pub use output::{exit_code, ProcessOutput};

use crate::EngineError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Everything needed to launch one child process
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            working_dir: None,
        }
    }

    /// Adds an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the working directory
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }
}

/// Launches and stops spider processes
#[derive(Debug, Clone)]
pub struct Supervisor {
    stop_grace: Duration,
}

impl Supervisor {
    /// Creates a supervisor
    ///
    /// # Arguments
    ///
    /// * `stop_grace` - Time between SIGTERM and SIGKILL when stopping
    pub fn new(stop_grace: Duration) -> Self {
        Self { stop_grace }
    }

    pub fn stop_grace(&self) -> Duration {
        self.stop_grace
    }

    /// Spawns a child process with piped output and null stdin
    ///
    /// # Returns
    ///
    /// * `Ok(ChildHandle)` - The running child with output readers attached
    /// * `Err(EngineError::ProcessSpawn)` - The program could not be started
    pub fn spawn(&self, spec: &ProcessSpec) -> Result<ChildHandle, EngineError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| EngineError::ProcessSpawn {
            program: spec.program.clone(),
            source,
        })?;

        let handle = ChildHandle::attach(child);
        tracing::debug!("Spawned {} (pid {:?})", spec.program, handle.pid());
        Ok(handle)
    }
}
