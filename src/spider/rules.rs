//! Declarative extraction rulesets
//!
//! A rule-based spider stores its target and rules in its config:
//!
//! ```json
//! {
//!   "type": "rules",
//!   "url": "https://example.com/list",
//!   "headers": {"User-Agent": "demo"},
//!   "delay": 1, "timeout": 30, "retries": 3,
//!   "rules": [
//!     {"field": "title", "selector": ".item h2", "selectorType": "css", "type": "text"},
//!     {"field": "link", "selector": "a", "type": "attr", "attr": "href"}
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Seconds to wait between fetch attempts when the config names none
pub const DEFAULT_DELAY_SECS: f64 = 1.0;

/// Per-attempt fetch timeout when the config names none
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// Retry count when the config names none
pub const DEFAULT_RETRIES: u32 = 3;

/// A ruleset config that cannot be turned into a program
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidRuleSet(pub String);

/// Selector dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    #[default]
    Css,
    #[serde(rename = "xpath")]
    XPath,
}

/// A selector expression tagged with its dialect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub kind: SelectorKind,
    pub expression: String,
}

impl Selector {
    pub fn css(expression: impl Into<String>) -> Self {
        Self {
            kind: SelectorKind::Css,
            expression: expression.into(),
        }
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Self {
            kind: SelectorKind::XPath,
            expression: expression.into(),
        }
    }
}

/// What to take from a matched node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extract {
    /// Whitespace-trimmed text content
    Text,
    /// Value of the named attribute, empty when absent
    Attribute(String),
    /// Serialized markup of the node
    Html,
}

/// One field of an output record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub field: String,
    pub selector: Selector,
    pub extract: Extract,
}

impl ExtractionRule {
    /// Rules without a field name or selector contribute nothing
    pub fn is_usable(&self) -> bool {
        !self.field.is_empty() && !self.selector.expression.is_empty()
    }
}

/// Rule shape as stored in spider configs
#[derive(Debug, Deserialize)]
struct StoredRule {
    #[serde(default)]
    field: String,
    #[serde(default)]
    selector: String,
    #[serde(rename = "selectorType", default)]
    selector_type: Option<String>,
    #[serde(rename = "type", default)]
    extract_type: Option<String>,
    #[serde(default)]
    attr: Option<String>,
}

impl StoredRule {
    fn into_rule(self, index: usize) -> Result<ExtractionRule, InvalidRuleSet> {
        let kind = match self.selector_type.as_deref().map(str::to_ascii_lowercase) {
            None => SelectorKind::Css,
            Some(t) if t.is_empty() || t == "css" => SelectorKind::Css,
            Some(t) if t == "xpath" => SelectorKind::XPath,
            Some(t) => {
                return Err(InvalidRuleSet(format!(
                    "rule {} has unknown selectorType '{}'",
                    index, t
                )))
            }
        };

        let extract = match self.extract_type.as_deref().unwrap_or("text") {
            "" | "text" => Extract::Text,
            "html" => Extract::Html,
            "attr" => match self.attr {
                Some(name) if !name.is_empty() => Extract::Attribute(name),
                _ => {
                    return Err(InvalidRuleSet(format!(
                        "rule {} extracts an attribute but names none",
                        index
                    )))
                }
            },
            other => {
                return Err(InvalidRuleSet(format!(
                    "rule {} has unknown type '{}'",
                    index, other
                )))
            }
        };

        Ok(ExtractionRule {
            field: self.field,
            selector: Selector {
                kind,
                expression: self.selector,
            },
            extract,
        })
    }
}

/// Everything the rule worker needs to fetch and extract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub delay_secs: f64,
    pub timeout_secs: f64,
    pub retries: u32,
    pub rules: Vec<ExtractionRule>,
}

impl RuleSet {
    /// Reads a ruleset from a spider config object
    ///
    /// # Arguments
    ///
    /// * `config` - The parsed spider config
    ///
    /// # Returns
    ///
    /// * `Ok(RuleSet)` - The validated ruleset
    /// * `Err(InvalidRuleSet)` - The target or a rule is malformed
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, InvalidRuleSet> {
        let url = match config.get("url").and_then(Value::as_str) {
            Some(u) if !u.trim().is_empty() => u.trim().to_string(),
            _ => return Err(InvalidRuleSet("ruleset has no target url".to_string())),
        };
        Url::parse(&url).map_err(|e| InvalidRuleSet(format!("invalid url '{}': {}", url, e)))?;

        let headers = match config.get("headers") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
            Some(_) => return Err(InvalidRuleSet("headers must be an object".to_string())),
        };

        let delay_secs = non_negative(config, "delay", DEFAULT_DELAY_SECS)?;
        let timeout_secs = non_negative(config, "timeout", DEFAULT_TIMEOUT_SECS)?;
        if timeout_secs == 0.0 {
            return Err(InvalidRuleSet("timeout must be positive".to_string()));
        }

        let retries = match config.get("retries") {
            None | Some(Value::Null) => DEFAULT_RETRIES,
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| InvalidRuleSet("retries must be a non-negative integer".to_string()))?,
        };

        let rules = match config.get("rules") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let stored: StoredRule = serde_json::from_value(item.clone())
                        .map_err(|e| InvalidRuleSet(format!("rule {} is malformed: {}", i, e)))?;
                    stored.into_rule(i)
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(InvalidRuleSet("rules must be a list".to_string())),
        };

        Ok(Self {
            url,
            headers,
            delay_secs,
            timeout_secs,
            retries,
            rules,
        })
    }

    /// Whether any rule needs the XPath dialect
    pub fn uses_xpath(&self) -> bool {
        self.rules
            .iter()
            .any(|r| r.selector.kind == SelectorKind::XPath)
    }
}

fn non_negative(config: &Map<String, Value>, key: &str, default: f64) -> Result<f64, InvalidRuleSet> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => match v.as_f64() {
            Some(n) if n >= 0.0 && Duration::try_from_secs_f64(n).is_ok() => Ok(n),
            _ => Err(InvalidRuleSet(format!(
                "{} must be a non-negative number of seconds",
                key
            ))),
        },
    }
}
