//! Execution orchestrator
//!
//! Owns the registry of in-flight executions and drives both run paths:
//!
//! - **Async runs** (`start`): a background task synthesizes the program,
//!   spawns it, waits for exit or a stop request, ingests its output and
//!   reconciles status and counters.
//! - **Direct calls** (`run_synchronous`): a rate-limited, time-limited run
//!   whose result object is returned to the caller.
//!
//! Status writes for one execution happen exactly once: either the task
//! reconciles the exit, or a stop request marks it stopped.

use crate::config::Config;
use crate::engine::direct::{parse_direct_result, DirectCallResult, DirectFailure};
use crate::engine::layout::Layout;
use crate::engine::rate_limit::{self, RateDecision};
use crate::engine::registry::{ExecutionRegistry, ExecutionSignals, ExecutionSnapshot};
use crate::ingest::OutputIngestor;
use crate::spider::SpiderDefinition;
use crate::state::SpiderStatus;
use crate::storage::{self, LogLevel, LogSource, NewLogEntry, Storage};
use crate::supervisor::{ChildHandle, ProcessOutput, ProcessSpec, Supervisor, WaitOutcome};
use crate::synth::{Launcher, Program, RunMode, Synthesizer};
use crate::{EngineError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Time allowed after SIGKILL for the task to reap and ingest
const STOP_SETTLE_TIME: Duration = Duration::from_secs(10);

/// How an async run ended
enum RunEnd {
    Exited(ProcessOutput),
    Stopped,
}

/// What a direct-call child did
enum DirectOutcome {
    Completed(ProcessOutput),
    TimedOut(ProcessOutput),
    Internal(String),
}

/// Removes a synthesized program file when dropped
struct ProgramFile(PathBuf);

impl Drop for ProgramFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            tracing::debug!("Failed to remove program {}: {}", self.0.display(), e);
        }
    }
}

/// Runs, stops and tracks spider executions
pub struct Orchestrator<S: Storage + 'static> {
    inner: Arc<Inner<S>>,
}

impl<S: Storage + 'static> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S: Storage> {
    storage: Arc<Mutex<S>>,
    registry: ExecutionRegistry,
    supervisor: Supervisor,
    synthesizer: Synthesizer,
    ingestor: OutputIngestor<S>,
    layout: Layout,
    config: Config,
}

impl<S: Storage + 'static> Orchestrator<S> {
    /// Creates an orchestrator over a storage backend
    ///
    /// # Arguments
    ///
    /// * `config` - Engine configuration
    /// * `storage` - The persistent store
    ///
    /// # Returns
    ///
    /// * `Ok(Orchestrator)` - Ready to run spiders
    /// * `Err(EngineError)` - Artifact directories could not be prepared
    pub fn new(config: Config, storage: S) -> Result<Self> {
        Self::with_shared_storage(config, Arc::new(Mutex::new(storage)))
    }

    /// Creates an orchestrator over a storage backend shared with other users
    pub fn with_shared_storage(config: Config, storage: Arc<Mutex<S>>) -> Result<Self> {
        let layout = Layout::from_config(&config.engine)?;
        let worker = match &config.engine.worker_program {
            Some(path) => PathBuf::from(path),
            None => std::env::current_exe()?,
        };

        let inner = Inner {
            registry: ExecutionRegistry::new(),
            supervisor: Supervisor::new(Duration::from_secs(config.engine.stop_grace_seconds)),
            synthesizer: Synthesizer::new(config.engine.interpreter.clone(), worker),
            ingestor: OutputIngestor::new(Arc::clone(&storage), layout.clone()),
            storage,
            layout,
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// The shared storage backend
    pub fn storage(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.inner.storage)
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    /// Starts an async run of a spider
    ///
    /// Must be called within a tokio runtime. Returns as soon as the run is
    /// registered; the process runs on a background task.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The new execution id
    /// * `Err(EngineError::AlreadyRunning)` - The spider has an in-flight run
    /// * `Err(EngineError::NotFound)` - No such spider
    pub fn start(&self, spider_id: i64) -> Result<String> {
        let inner = &self.inner;
        if inner.registry.contains(spider_id) {
            return Err(EngineError::AlreadyRunning { spider_id });
        }

        let record = storage::lock(&inner.storage)?
            .get_spider(spider_id)?
            .ok_or(EngineError::NotFound { spider_id })?;
        let spider = SpiderDefinition::from_record(&record);

        let execution_id = Uuid::new_v4().to_string();
        let signals = inner
            .registry
            .try_register(spider_id, &execution_id)
            .ok_or(EngineError::AlreadyRunning { spider_id })?;

        if let Err(e) = inner.mark_started(&spider, &execution_id) {
            inner.registry.remove(spider_id, &execution_id);
            return Err(e);
        }

        tracing::info!(
            "Started spider {} ({}) as execution {}",
            spider.id,
            spider.name,
            execution_id
        );

        let task_inner = Arc::clone(inner);
        let task_execution_id = execution_id.clone();
        tokio::spawn(async move {
            task_inner
                .run_execution(spider, task_execution_id, signals)
                .await;
        });

        Ok(execution_id)
    }

    /// Stops the in-flight run of a spider
    ///
    /// The child gets SIGTERM, then SIGKILL after the grace period. Concurrent
    /// calls all wait for the same run; only the first writes status and log.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The run is stopped and its record removed
    /// * `Err(EngineError::NotRunning)` - Nothing to stop, or the process
    ///   already exited and its result is being reconciled
    pub async fn stop(&self, spider_id: i64) -> Result<()> {
        let ticket = self
            .inner
            .registry
            .begin_stop(spider_id)
            .ok_or(EngineError::NotRunning { spider_id })?;

        if !ticket.initiator {
            ticket.signals.released.cancelled().await;
            return Ok(());
        }

        tracing::info!(
            "Stopping spider {} (execution {})",
            spider_id,
            ticket.execution_id
        );
        ticket.signals.cancel.cancel();

        // Runs detached so a dropped caller cannot leave the record in Stopping
        let inner = Arc::clone(&self.inner);
        let finalize = tokio::spawn(async move {
            let bound = inner.supervisor.stop_grace() + STOP_SETTLE_TIME;
            if tokio::time::timeout(bound, ticket.signals.finished.cancelled())
                .await
                .is_err()
            {
                tracing::warn!(
                    "Execution {} still busy {:?} after stop, releasing it",
                    ticket.execution_id,
                    bound
                );
            }

            let result = inner.mark_stopped(spider_id, &ticket.execution_id);
            inner.registry.remove(spider_id, &ticket.execution_id);
            result
        });

        match finalize.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Stop of spider {} was interrupted: {}", spider_id, e);
                Err(EngineError::NotRunning { spider_id })
            }
        }
    }

    /// Current in-flight execution of a spider, if any
    pub fn status(&self, spider_id: i64) -> Option<ExecutionSnapshot> {
        self.inner.registry.snapshot(spider_id)
    }

    /// Spider ids with an in-flight execution
    pub fn running_spiders(&self) -> Vec<i64> {
        self.inner.registry.running_spiders()
    }

    /// Waits until the current run of a spider is fully reconciled
    ///
    /// Returns immediately when nothing is running.
    pub async fn wait_for_completion(&self, spider_id: i64) {
        if let Some(signals) = self.inner.registry.signals(spider_id) {
            signals.released.cancelled().await;
        }
    }

    /// Runs a spider synchronously and returns its result object
    ///
    /// The rate-limit check and the run counter increment happen under one
    /// storage lock, so two racing calls cannot both pass the check.
    ///
    /// # Arguments
    ///
    /// * `spider_id` - Spider to call
    /// * `code` - Script body to run instead of the stored one
    ///
    /// # Returns
    ///
    /// * `Ok(DirectCallResult)` - Every run outcome, including failures
    /// * `Err(EngineError::NotFound)` - No such spider
    /// * `Err(EngineError::RateLimited)` - Called again within the interval
    pub async fn run_synchronous(&self, spider_id: i64, code: Option<&str>) -> Result<DirectCallResult> {
        let inner = &self.inner;
        let started = Instant::now();
        let execution_id = Uuid::new_v4().to_string();

        let spider = inner.admit_direct_call(spider_id, &execution_id)?;
        tracing::info!(
            "Direct call of spider {} ({}) as execution {}",
            spider.id,
            spider.name,
            execution_id
        );

        let outcome = inner.execute_direct(&spider, &execution_id, code).await;
        let mut result = inner.direct_result(&spider, &execution_id, outcome);
        result.execution_time = started.elapsed().as_secs_f64();

        inner.record_direct_outcome(&spider, &execution_id, &result);
        Ok(result)
    }
}

impl<S: Storage + 'static> Inner<S> {
    // ===== Async runs =====

    fn mark_started(&self, spider: &SpiderDefinition, execution_id: &str) -> Result<()> {
        let mut storage = storage::lock(&self.storage)?;
        storage.update_spider_status(spider.id, SpiderStatus::Running)?;
        storage.increment_run_count(spider.id)?;
        storage.append_log(
            &NewLogEntry::new(
                spider.id,
                LogLevel::Info,
                LogSource::SpiderRunner,
                format!(
                    "Spider \"{}\" started with execution ID: {}",
                    spider.name, execution_id
                ),
            )
            .with_execution(execution_id),
        )?;
        Ok(())
    }

    async fn run_execution(
        self: Arc<Self>,
        spider: SpiderDefinition,
        execution_id: String,
        signals: ExecutionSignals,
    ) {
        let started = Instant::now();

        match self.execute(&spider, &execution_id, &signals).await {
            Ok(RunEnd::Exited(output)) => {
                if self.registry.begin_finish(spider.id, &execution_id) {
                    if let Err(e) = self.reconcile_exit(&spider, &execution_id, output.exit_code, started) {
                        tracing::error!(
                            "Failed to record result of execution {}: {}",
                            execution_id,
                            e
                        );
                    }
                    self.registry.remove(spider.id, &execution_id);
                }
            }
            Ok(RunEnd::Stopped) => {
                tracing::info!("Execution {} stopped", execution_id);
            }
            Err(e) => {
                tracing::error!(
                    "Execution {} of spider {} failed after {:.2}s: {}",
                    execution_id,
                    spider.id,
                    started.elapsed().as_secs_f64(),
                    e
                );
                if self.registry.begin_finish(spider.id, &execution_id) {
                    if let Err(store_err) = self.record_failure(&spider, &execution_id, &e) {
                        tracing::error!(
                            "Failed to record failure of execution {}: {}",
                            execution_id,
                            store_err
                        );
                    }
                    self.registry.remove(spider.id, &execution_id);
                }
            }
        }

        signals.finished.cancel();
    }

    async fn execute(
        &self,
        spider: &SpiderDefinition,
        execution_id: &str,
        signals: &ExecutionSignals,
    ) -> Result<RunEnd> {
        let program = self
            .synthesizer
            .synthesize(spider, execution_id, RunMode::Files, None)?;

        let output_dir = self.layout.output_dir(spider.id, execution_id);
        tokio::fs::create_dir_all(&output_dir).await?;

        let program_path = self.layout.script_path(spider.id, execution_id, program.extension);
        tokio::fs::write(&program_path, &program.source).await?;
        let _program_file = ProgramFile(program_path.clone());

        if signals.cancel.is_cancelled() {
            return Ok(RunEnd::Stopped);
        }

        let spec = process_spec(&program, &program_path, spider.id, execution_id)
            .env("OUTPUT_DIR", output_dir.to_string_lossy())
            .current_dir(&output_dir);
        let mut child = self.supervisor.spawn(&spec)?;
        self.registry.attach_pid(spider.id, execution_id, child.pid());

        let exited = tokio::select! {
            status = child.wait_exit() => Some(status),
            _ = signals.cancel.cancelled() => None,
        };

        let (status, stopped) = match exited {
            Some(status) => (status?, false),
            None => (self.shutdown_child(&mut child, execution_id).await?, true),
        };
        let output = child.collect(status).await;
        tracing::info!(
            "Execution {} exited with code {}",
            execution_id,
            output.exit_code
        );

        self.ingest(spider.id, execution_id, &output);

        Ok(if stopped {
            RunEnd::Stopped
        } else {
            RunEnd::Exited(output)
        })
    }

    async fn shutdown_child(
        &self,
        child: &mut ChildHandle,
        execution_id: &str,
    ) -> std::io::Result<std::process::ExitStatus> {
        tracing::info!(
            "Terminating execution {} (pid {:?})",
            execution_id,
            child.pid()
        );
        child.shutdown(self.supervisor.stop_grace()).await
    }

    /// Stores output and registers artifacts; failures here do not fail the run
    fn ingest(&self, spider_id: i64, execution_id: &str, output: &ProcessOutput) {
        if let Err(e) = self.ingestor.ingest(spider_id, execution_id, output) {
            tracing::error!("Failed to ingest output of execution {}: {}", execution_id, e);
        }
        if let Err(e) = self.ingestor.scan_outputs(spider_id, execution_id) {
            tracing::error!("Failed to scan outputs of execution {}: {}", execution_id, e);
        }
    }

    fn reconcile_exit(
        &self,
        spider: &SpiderDefinition,
        execution_id: &str,
        exit_code: i32,
        started: Instant,
    ) -> Result<()> {
        let elapsed = started.elapsed().as_secs_f64();
        let status = SpiderStatus::from_exit_code(exit_code);
        let mut storage = storage::lock(&self.storage)?;
        storage.update_spider_status(spider.id, status)?;

        let entry = if status.is_error() {
            storage.increment_error_count(spider.id)?;
            NewLogEntry::new(
                spider.id,
                LogLevel::Error,
                LogSource::SpiderRunner,
                format!(
                    "Spider \"{}\" failed with exit code {} after {:.2}s",
                    spider.name, exit_code, elapsed
                ),
            )
        } else {
            storage.increment_success_count(spider.id)?;
            NewLogEntry::new(
                spider.id,
                LogLevel::Info,
                LogSource::SpiderRunner,
                format!(
                    "Spider \"{}\" completed successfully in {:.2}s",
                    spider.name, elapsed
                ),
            )
        };
        storage.append_log(&entry.with_execution(execution_id))?;

        tracing::info!(
            "Spider {} execution {} finished as {}",
            spider.id,
            execution_id,
            status
        );
        Ok(())
    }

    fn record_failure(&self, spider: &SpiderDefinition, execution_id: &str, error: &EngineError) -> Result<()> {
        let mut storage = storage::lock(&self.storage)?;
        storage.update_spider_status(spider.id, SpiderStatus::Error)?;
        storage.increment_error_count(spider.id)?;
        storage.append_log(
            &NewLogEntry::new(
                spider.id,
                LogLevel::Error,
                LogSource::SpiderRunner,
                format!("Spider \"{}\" execution failed: {}", spider.name, error),
            )
            .with_execution(execution_id),
        )?;
        Ok(())
    }

    fn mark_stopped(&self, spider_id: i64, execution_id: &str) -> Result<()> {
        let mut storage = storage::lock(&self.storage)?;
        let name = storage
            .get_spider(spider_id)?
            .map(|s| s.name)
            .unwrap_or_else(|| spider_id.to_string());

        storage.update_spider_status(spider_id, SpiderStatus::Stopped)?;
        storage.append_log(
            &NewLogEntry::new(
                spider_id,
                LogLevel::Warning,
                LogSource::SpiderRunner,
                format!("Spider \"{}\" was stopped manually", name),
            )
            .with_execution(execution_id),
        )?;

        tracing::warn!("Spider {} execution {} stopped manually", spider_id, execution_id);
        Ok(())
    }

    // ===== Direct calls =====

    /// Checks the rate limit and records the call under one storage lock
    fn admit_direct_call(&self, spider_id: i64, execution_id: &str) -> Result<SpiderDefinition> {
        let mut storage = storage::lock(&self.storage)?;
        let record = storage
            .get_spider(spider_id)?
            .ok_or(EngineError::NotFound { spider_id })?;

        let setting = storage.get_setting(rate_limit::SYSTEM_SETTING_KEY)?;
        let interval = rate_limit::interval_from_setting(
            setting.as_deref(),
            self.config.rate_limit.interval_minutes,
        );

        let now = Utc::now();
        if let RateDecision::Deny {
            remaining_seconds,
            next_allowed_at,
        } = rate_limit::check(record.last_run_at.as_deref(), interval, now)
        {
            tracing::info!(
                "Direct call of spider {} rejected, {:.1}s remaining",
                spider_id,
                remaining_seconds
            );
            return Err(EngineError::RateLimited {
                spider_id,
                remaining_seconds,
                next_allowed_at: next_allowed_at.to_rfc3339(),
                interval_minutes: interval,
            });
        }

        storage.append_log(
            &NewLogEntry::new(
                spider_id,
                LogLevel::Info,
                LogSource::ApiCall,
                format!("Direct call started for spider \"{}\"", record.name),
            )
            .with_execution(execution_id),
        )?;
        storage.increment_run_count(spider_id)?;

        Ok(SpiderDefinition::from_record(&record))
    }

    async fn execute_direct(
        &self,
        spider: &SpiderDefinition,
        execution_id: &str,
        code: Option<&str>,
    ) -> DirectOutcome {
        let program = match self
            .synthesizer
            .synthesize(spider, execution_id, RunMode::Direct, code)
        {
            Ok(program) => program,
            Err(e) => return DirectOutcome::Internal(e.to_string()),
        };

        let program_path = self.layout.script_path(spider.id, execution_id, program.extension);
        if let Err(e) = tokio::fs::write(&program_path, &program.source).await {
            return DirectOutcome::Internal(format!("failed to write program: {}", e));
        }
        let _program_file = ProgramFile(program_path.clone());

        let spec = process_spec(&program, &program_path, spider.id, execution_id)
            .env("API_CALL_MODE", "true");
        let child = match self.supervisor.spawn(&spec) {
            Ok(child) => child,
            Err(e) => return DirectOutcome::Internal(e.to_string()),
        };

        let limit = Duration::from_secs(self.config.engine.direct_call_timeout_seconds);
        match child.wait_with_timeout(limit).await {
            Ok(WaitOutcome::Exited(output)) => DirectOutcome::Completed(output),
            Ok(WaitOutcome::TimedOut(output)) => DirectOutcome::TimedOut(output),
            Err(e) => DirectOutcome::Internal(format!("failed to wait for process: {}", e)),
        }
    }

    fn direct_result(&self, spider: &SpiderDefinition, execution_id: &str, outcome: DirectOutcome) -> DirectCallResult {
        let (id, name) = (spider.id, spider.name.as_str());

        match outcome {
            DirectOutcome::Completed(output) if output.success() => match parse_direct_result(&output.stdout) {
                Some(object) => DirectCallResult::from_program_output(id, name, execution_id, object),
                None => DirectCallResult::failed(
                    id,
                    name,
                    execution_id,
                    DirectFailure::ResultParseFailure,
                    "No JSON result found in spider output",
                    Some(&output),
                ),
            },
            DirectOutcome::Completed(output) => {
                let stderr = output.stderr.trim();
                let error = if stderr.is_empty() {
                    format!("Spider exited with code {}", output.exit_code)
                } else {
                    stderr.to_string()
                };
                DirectCallResult::failed(
                    id,
                    name,
                    execution_id,
                    DirectFailure::NonZeroExit {
                        exit_code: output.exit_code,
                    },
                    error,
                    Some(&output),
                )
            }
            DirectOutcome::TimedOut(output) => DirectCallResult::failed(
                id,
                name,
                execution_id,
                DirectFailure::Timeout,
                format!(
                    "Spider execution timed out after {} seconds",
                    self.config.engine.direct_call_timeout_seconds
                ),
                Some(&output),
            ),
            DirectOutcome::Internal(message) => DirectCallResult::failed(
                id,
                name,
                execution_id,
                DirectFailure::Internal,
                message,
                None,
            ),
        }
    }

    /// Logs the outcome and bumps exactly one counter
    fn record_direct_outcome(&self, spider: &SpiderDefinition, execution_id: &str, result: &DirectCallResult) {
        let (level, message) = if result.success {
            (
                LogLevel::Info,
                format!(
                    "Direct call succeeded: {} in {:.2}s",
                    result.summary(),
                    result.execution_time
                ),
            )
        } else {
            (
                LogLevel::Error,
                format!(
                    "Direct call failed: {} after {:.2}s",
                    result.summary(),
                    result.execution_time
                ),
            )
        };

        if result.success {
            tracing::info!("Spider {} execution {}: {}", spider.id, execution_id, message);
        } else {
            tracing::warn!("Spider {} execution {}: {}", spider.id, execution_id, message);
        }

        let entry = NewLogEntry::new(spider.id, level, LogSource::ApiCall, message).with_execution(execution_id);
        if let Err(e) = self.store_direct_outcome(spider.id, &entry, result.success) {
            tracing::error!("Failed to record direct call {}: {}", execution_id, e);
        }
    }

    fn store_direct_outcome(&self, spider_id: i64, entry: &NewLogEntry, success: bool) -> Result<()> {
        let mut storage = storage::lock(&self.storage)?;
        storage.append_log(entry)?;
        if success {
            storage.increment_success_count(spider_id)?;
        } else {
            storage.increment_error_count(spider_id)?;
        }
        Ok(())
    }
}

/// Command line and environment shared by both run paths
fn process_spec(program: &Program, program_path: &Path, spider_id: i64, execution_id: &str) -> ProcessSpec {
    let (command, args) = program.command(program_path);
    let spec = ProcessSpec::new(command, args)
        .env("SPIDER_ID", spider_id.to_string())
        .env("EXECUTION_ID", execution_id);

    match program.launcher {
        Launcher::Interpreter(_) => spec
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONIOENCODING", "utf-8"),
        Launcher::RulesWorker(_) => spec,
    }
}
