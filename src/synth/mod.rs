//! Code synthesis
//!
//! Turns a spider definition into a self-contained program for one run:
//! - Script spiders become a Python program wrapping the user code with
//!   runtime helpers (`log_message`, `save_data`, `get_config`)
//! - Rule-based spiders become a `WorkerProgram` document executed by the
//!   rule worker subcommand of this binary
//!
//! Synthesis never executes user code.

mod helpers;
mod sections;
mod worker_program;

pub use sections::ScriptSections;
pub use worker_program::WorkerProgram;

use crate::spider::{InvalidRuleSet, RuleSet, SpiderDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while building a program
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Invalid extraction rules: {0}")]
    InvalidRules(#[from] InvalidRuleSet),

    #[error("Failed to serialize worker program: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Where a run delivers its results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Results are written as files into `OUTPUT_DIR`
    Files,
    /// Results are printed to stdout as one JSON object
    Direct,
}

/// How a program file is executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// `<interpreter> <program>`
    Interpreter(String),
    /// `<worker> worker --ruleset <program>`
    RulesWorker(PathBuf),
}

/// A synthesized program ready to be written and launched
#[derive(Debug, Clone)]
pub struct Program {
    pub source: String,
    pub extension: &'static str,
    pub launcher: Launcher,
}

impl Program {
    /// Builds the command line that runs the program stored at `path`
    pub fn command(&self, path: &Path) -> (String, Vec<String>) {
        let path = path.to_string_lossy().into_owned();
        match &self.launcher {
            Launcher::Interpreter(interpreter) => (interpreter.clone(), vec![path]),
            Launcher::RulesWorker(worker) => (
                worker.to_string_lossy().into_owned(),
                vec!["worker".to_string(), "--ruleset".to_string(), path],
            ),
        }
    }
}

/// Builds programs from spider definitions
#[derive(Debug, Clone)]
pub struct Synthesizer {
    interpreter: String,
    worker: PathBuf,
}

impl Synthesizer {
    /// Creates a synthesizer
    ///
    /// # Arguments
    ///
    /// * `interpreter` - Command used to run script programs
    /// * `worker` - Executable providing the `worker` subcommand
    pub fn new(interpreter: impl Into<String>, worker: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            worker: worker.into(),
        }
    }

    /// Synthesizes the program for one run
    ///
    /// # Arguments
    ///
    /// * `spider` - The spider definition
    /// * `execution_id` - Identifier of this run
    /// * `mode` - Files or direct delivery
    /// * `code_override` - Replaces the stored script body (ignored for rulesets)
    ///
    /// # Returns
    ///
    /// * `Ok(Program)` - Program text and launcher
    /// * `Err(SynthesisError)` - The ruleset config is malformed
    pub fn synthesize(
        &self,
        spider: &SpiderDefinition,
        execution_id: &str,
        mode: RunMode,
        code_override: Option<&str>,
    ) -> Result<Program, SynthesisError> {
        if spider.is_rule_based() {
            let ruleset = RuleSet::from_config(&spider.config)?;
            let program = WorkerProgram {
                spider_id: spider.id,
                execution_id: execution_id.to_string(),
                mode,
                ruleset,
            };
            return Ok(Program {
                source: program.to_json()?,
                extension: "json",
                launcher: Launcher::RulesWorker(self.worker.clone()),
            });
        }

        let body = code_override.unwrap_or(&spider.code);
        let sections = ScriptSections::new(mode, spider.id, execution_id, &spider.config_value(), body);
        Ok(Program {
            source: sections.render(),
            extension: "py",
            launcher: Launcher::Interpreter(self.interpreter.clone()),
        })
    }
}
