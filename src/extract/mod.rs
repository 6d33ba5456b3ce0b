//! Rule worker
//!
//! Executes rule-based spiders inside their own child process:
//! - `fetch`: HTTP retrieval with per-attempt timeout, retries and delay
//! - `select`: CSS (scraper) and XPath (sxd-xpath) selector evaluation
//! - `apply`: the item/record policy that turns rules into records
//! - `worker`: program loading and result delivery

mod apply;
mod fetch;
mod mirror;
mod select;
mod worker;

pub use apply::{apply_rules, extract_records, Record};
pub use fetch::{build_http_client, fetch_page};
pub use mirror::Mirror;
pub use select::{Evaluator, Matched, Scope, SelectError};
pub use worker::{collect_records, execute, load_program, output_dir_from_env, RESULTS_FILE};

use thiserror::Error;

/// Errors that abort a rule worker run
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid worker program: {0}")]
    Program(#[from] serde_json::Error),

    #[error("Invalid request header: {0}")]
    InvalidHeader(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request to {url} failed after {attempts} attempts: {source}")]
    Fetch {
        url: String,
        attempts: u32,
        source: reqwest::Error,
    },
}
