//! Rule worker entry point
//!
//! Runs inside the child process of a rule-based spider. Delivery follows the
//! run mode: files mode writes `spider_results.json` into `OUTPUT_DIR`, direct
//! mode prints one JSON summary object on stdout.

use crate::extract::apply::{extract_records, Record};
use crate::extract::fetch::{build_http_client, fetch_page};
use crate::extract::ExtractError;
use crate::synth::{RunMode, WorkerProgram};
use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// File written by files-mode runs
pub const RESULTS_FILE: &str = "spider_results.json";

/// Reads a worker program document
pub fn load_program(path: &Path) -> Result<WorkerProgram, ExtractError> {
    let text = std::fs::read_to_string(path)?;
    Ok(WorkerProgram::from_json(&text)?)
}

/// Fetches the target page and extracts records from it
pub async fn collect_records(program: &WorkerProgram) -> Result<Vec<Record>, ExtractError> {
    let ruleset = &program.ruleset;
    tracing::info!("Fetching {}", ruleset.url);

    let client = build_http_client(ruleset)?;
    let page = fetch_page(&client, ruleset).await?;
    tracing::info!("Fetched {} bytes", page.len());

    let records = extract_records(&page, ruleset);
    tracing::info!("Extracted {} records", records.len());
    Ok(records)
}

/// Runs a worker program and returns the process exit code
///
/// # Arguments
///
/// * `program` - The program to run
/// * `output_dir` - Destination of files-mode results
pub async fn execute(program: &WorkerProgram, output_dir: &Path) -> i32 {
    let outcome = match collect_records(program).await {
        Ok(records) => deliver(program, records, output_dir),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("Rule spider failed: {}", e);
            eprintln!("ERROR: Rule spider failed: {}", e);
            if program.mode == RunMode::Direct {
                println!("{}", failure_summary(program, &e.to_string()));
            }
            1
        }
    }
}

/// Output directory announced by the engine, or the working directory
pub fn output_dir_from_env() -> PathBuf {
    std::env::var_os("OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn deliver(program: &WorkerProgram, records: Vec<Record>, output_dir: &Path) -> Result<(), ExtractError> {
    match program.mode {
        RunMode::Files => {
            std::fs::create_dir_all(output_dir)?;
            let path = output_dir.join(RESULTS_FILE);
            let text = serde_json::to_string_pretty(&records)?;
            std::fs::write(&path, text)?;
            tracing::info!("Data saved to {}", RESULTS_FILE);
        }
        RunMode::Direct => {
            println!("{}", success_summary(program, records));
        }
    }
    Ok(())
}

fn unix_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn success_summary(program: &WorkerProgram, records: Vec<Record>) -> Value {
    let count = records.len();
    if count == 0 {
        return json!({
            "success": false,
            "data": [],
            "count": 0,
            "url": program.ruleset.url,
            "timestamp": unix_timestamp(),
            "spider_id": program.spider_id,
            "execution_id": program.execution_id,
            "message": "No data extracted",
        });
    }

    json!({
        "success": true,
        "data": records,
        "count": count,
        "url": program.ruleset.url,
        "timestamp": unix_timestamp(),
        "spider_id": program.spider_id,
        "execution_id": program.execution_id,
        "message": format!("Extracted {} records", count),
    })
}

fn failure_summary(program: &WorkerProgram, error: &str) -> Value {
    json!({
        "success": false,
        "data": [],
        "count": 0,
        "url": program.ruleset.url,
        "timestamp": unix_timestamp(),
        "spider_id": program.spider_id,
        "execution_id": program.execution_id,
        "error": error,
    })
}
