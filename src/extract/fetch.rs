//! Page fetching for rule-based spiders
//!
//! Requests are retried on any failure (network error or non-success status),
//! waiting the configured delay between attempts.

use crate::extract::ExtractError;
use crate::spider::RuleSet;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::Duration;

/// Builds the HTTP client for one ruleset
///
/// # Arguments
///
/// * `ruleset` - Supplies the per-attempt timeout and request headers
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(ExtractError)` - A header is invalid or the client failed to build
pub fn build_http_client(ruleset: &RuleSet) -> Result<Client, ExtractError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &ruleset.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ExtractError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| ExtractError::InvalidHeader(name.clone()))?;
        headers.insert(header_name, header_value);
    }

    let client = Client::builder()
        .user_agent(concat!("spider-engine/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .timeout(Duration::from_secs_f64(ruleset.timeout_secs))
        .connect_timeout(Duration::from_secs_f64(ruleset.timeout_secs.min(10.0)))
        .gzip(true)
        .brotli(true)
        .build()?;

    Ok(client)
}

/// Fetches the ruleset target, retrying up to `retries` extra times
///
/// # Returns
///
/// * `Ok(String)` - The response body
/// * `Err(ExtractError::Fetch)` - Every attempt failed
pub async fn fetch_page(client: &Client, ruleset: &RuleSet) -> Result<String, ExtractError> {
    let attempts = ruleset.retries + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match fetch_once(client, &ruleset.url).await {
            Ok(body) => return Ok(body),
            Err(e) if attempt < attempts => {
                tracing::warn!("Request failed, retry {} of {}: {}", attempt, ruleset.retries, e);
                tokio::time::sleep(Duration::from_secs_f64(ruleset.delay_secs)).await;
            }
            Err(e) => {
                tracing::error!("Request failed after {} attempts: {}", attempt, e);
                return Err(ExtractError::Fetch {
                    url: ruleset.url.clone(),
                    attempts: attempt,
                    source: e,
                });
            }
        }
    }
}

async fn fetch_once(client: &Client, url: &str) -> Result<String, reqwest::Error> {
    client.get(url).send().await?.error_for_status()?.text().await
}
