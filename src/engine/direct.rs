//! Direct-call results
//!
//! A direct call runs a spider synchronously and returns its data instead of
//! writing files. The child reports through stdout: the last line that parses
//! as a JSON object is the result.

use crate::supervisor::ProcessOutput;
use serde::Serialize;
use serde_json::{Map, Value};

/// Keys owned by the engine; a spider's copies never reach `extra`
const RESERVED_KEYS: &[&str] = &[
    "spider_id",
    "spider_name",
    "execution_id",
    "execution_time",
    "failure",
    "stdout",
    "stderr",
];

/// Why a direct call did not produce a result object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectFailure {
    /// The wall-clock limit elapsed and the process was killed
    Timeout,
    /// The process exited with a non-zero code
    NonZeroExit { exit_code: i32 },
    /// The process exited cleanly but printed no result object
    ResultParseFailure,
    /// The engine could not build or launch the program
    Internal,
}

/// Outcome of a direct call
#[derive(Debug, Clone, Serialize)]
pub struct DirectCallResult {
    pub success: bool,
    pub spider_id: i64,
    pub spider_name: String,
    pub execution_id: String,
    pub data: Vec<Value>,
    pub count: usize,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock seconds spent in the call
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<DirectFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Fields of the result object that are not modelled above
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DirectCallResult {
    fn empty(spider_id: i64, spider_name: &str, execution_id: &str) -> Self {
        Self {
            success: false,
            spider_id,
            spider_name: spider_name.to_string(),
            execution_id: execution_id.to_string(),
            data: Vec::new(),
            count: 0,
            url: String::new(),
            message: None,
            error: None,
            execution_time: 0.0,
            timestamp: None,
            failure: None,
            stdout: None,
            stderr: None,
            extra: Map::new(),
        }
    }

    /// Builds a result from the object a spider printed
    pub fn from_program_output(
        spider_id: i64,
        spider_name: &str,
        execution_id: &str,
        mut object: Map<String, Value>,
    ) -> Self {
        let mut result = Self::empty(spider_id, spider_name, execution_id);

        result.success = object
            .remove("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        result.data = match object.remove("data") {
            Some(Value::Array(items)) => items,
            None | Some(Value::Null) => Vec::new(),
            Some(other) => vec![other],
        };
        result.count = object
            .remove("count")
            .and_then(|v| v.as_u64())
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(result.data.len());
        result.url = object.remove("url").map(text_of).unwrap_or_default();
        result.message = object.remove("message").map(text_of);
        result.error = object.remove("error").map(text_of);
        result.timestamp = object.remove("timestamp").and_then(|v| v.as_f64());

        for key in RESERVED_KEYS {
            object.remove(*key);
        }
        result.extra = object;
        result
    }

    /// Builds a failed result
    pub fn failed(
        spider_id: i64,
        spider_name: &str,
        execution_id: &str,
        failure: DirectFailure,
        error: impl Into<String>,
        output: Option<&ProcessOutput>,
    ) -> Self {
        let mut result = Self::empty(spider_id, spider_name, execution_id);
        result.failure = Some(failure);
        result.error = Some(error.into());
        if let Some(output) = output {
            result.stdout = Some(output.stdout.clone());
            result.stderr = Some(output.stderr.clone());
        }
        result
    }

    /// Short description of the outcome for logs
    pub fn summary(&self) -> String {
        if self.success {
            format!("extracted {} records", self.count)
        } else {
            self.error
                .clone()
                .or_else(|| self.message.clone())
                .unwrap_or_else(|| "unknown error".to_string())
        }
    }
}

fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Finds the last stdout line holding a JSON object
///
/// # Arguments
///
/// * `stdout` - Everything the child wrote to stdout
///
/// # Returns
///
/// The parsed object, or `None` when no line qualifies
pub fn parse_direct_result(stdout: &str) -> Option<Map<String, Value>> {
    stdout.lines().rev().map(str::trim).find_map(|line| {
        if !(line.starts_with('{') && line.ends_with('}')) {
            return None;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_object_line_wins() {
        let stdout = "noise\n{\"success\": false}\n{\"success\": true, \"data\": [1]}\ntrailing text\n";
        let parsed = parse_direct_result(stdout).unwrap();
        assert_eq!(parsed["success"], true);
    }

    #[test]
    fn test_skips_broken_object_lines() {
        let stdout = "{\"success\": true, \"count\": 2}\n{not json}\n";
        let parsed = parse_direct_result(stdout).unwrap();
        assert_eq!(parsed["count"], 2);
    }

    #[test]
    fn test_no_object() {
        assert!(parse_direct_result("").is_none());
        assert!(parse_direct_result("[1, 2]\nplain\n").is_none());
    }

    #[test]
    fn test_from_program_output_keeps_extras() {
        let object = match json!({
            "success": true,
            "data": [{"a": 1}, {"a": 2}],
            "url": "https://example.com",
            "message": "ok",
            "timestamp": 1.5,
            "spider_id": 9,
            "execution_id": "x",
            "pages": 4
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        let result = DirectCallResult::from_program_output(9, "demo", "x", object);
        assert!(result.success);
        assert_eq!(result.count, 2);
        assert_eq!(result.url, "https://example.com");
        assert_eq!(result.timestamp, Some(1.5));
        assert_eq!(result.extra.len(), 1);
        assert_eq!(result.extra["pages"], 4);

        let serialized = serde_json::to_value(&result).unwrap();
        assert_eq!(serialized["pages"], 4);
        assert_eq!(serialized["spider_name"], "demo");
        assert!(serialized.get("failure").is_none());
    }

    #[test]
    fn test_reserved_keys_not_duplicated() {
        let object = match json!({
            "success": true,
            "spider_name": "evil",
            "execution_time": 9,
            "failure": "none",
            "stdout": "fake",
            "stderr": "fake",
            "rows": 3
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        let result = DirectCallResult::from_program_output(1, "demo", "x", object);
        assert_eq!(result.extra.len(), 1);
        assert!(!result.extra.contains_key("spider_name"));
        assert!(!result.extra.contains_key("execution_time"));

        let text = serde_json::to_string(&result).unwrap();
        assert_eq!(text.matches("\"spider_name\"").count(), 1);
        let serialized: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(serialized["spider_name"], "demo");
        assert_eq!(serialized["execution_time"], 0.0);
        assert!(serialized.get("stdout").is_none());
        assert_eq!(serialized["rows"], 3);
    }

    #[test]
    fn test_failed_result() {
        let output = ProcessOutput {
            stdout: "partial".to_string(),
            stderr: "Traceback".to_string(),
            exit_code: 1,
        };
        let result = DirectCallResult::failed(
            1,
            "demo",
            "x",
            DirectFailure::NonZeroExit { exit_code: 1 },
            "Traceback",
            Some(&output),
        );
        assert!(!result.success);
        assert_eq!(result.summary(), "Traceback");
        assert_eq!(result.stdout.as_deref(), Some("partial"));

        let serialized = serde_json::to_value(&result).unwrap();
        assert_eq!(serialized["failure"]["kind"], "non_zero_exit");
        assert_eq!(serialized["failure"]["exit_code"], 1);
    }
}
