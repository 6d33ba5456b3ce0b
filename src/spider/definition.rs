//! Typed spider definitions built from storage records

use crate::storage::SpiderRecord;
use serde_json::{Map, Value};

/// How a spider's program is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// User-supplied script code
    Script,
    /// Declarative extraction rules stored in the config
    RuleBased,
}

/// A spider as the engine sees it
#[derive(Debug, Clone)]
pub struct SpiderDefinition {
    pub id: i64,
    pub name: String,
    pub source_kind: SourceKind,
    pub code: String,
    /// Parsed configuration, always a JSON object
    pub config: Map<String, Value>,
}

impl SpiderDefinition {
    /// Builds a definition from a stored record
    ///
    /// Configuration text that is not a JSON object is treated as `{}`.
    pub fn from_record(record: &SpiderRecord) -> Self {
        let config = parse_config(&record.config);
        let source_kind = if config.get("type").and_then(Value::as_str) == Some("rules") {
            SourceKind::RuleBased
        } else {
            SourceKind::Script
        };

        Self {
            id: record.id,
            name: record.name.clone(),
            source_kind,
            code: record.code.clone(),
            config,
        }
    }

    pub fn is_rule_based(&self) -> bool {
        self.source_kind == SourceKind::RuleBased
    }

    /// Returns the configuration as a JSON value
    pub fn config_value(&self) -> Value {
        Value::Object(self.config.clone())
    }
}

fn parse_config(text: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            tracing::debug!("Ignoring unparsable spider config: {}", e);
            Map::new()
        }
    }
}
