//! Program document executed by the rule worker

use crate::spider::RuleSet;
use crate::synth::RunMode;
use serde::{Deserialize, Serialize};

/// A rule-based spider run, serialized for the worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerProgram {
    pub spider_id: i64,
    pub execution_id: String,
    pub mode: RunMode,
    #[serde(flatten)]
    pub ruleset: RuleSet,
}

impl WorkerProgram {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spider::{Extract, ExtractionRule, Selector};
    use std::collections::BTreeMap;

    #[test]
    fn test_document_shape() {
        let program = WorkerProgram {
            spider_id: 4,
            execution_id: "abc".to_string(),
            mode: RunMode::Direct,
            ruleset: RuleSet {
                url: "https://example.com".to_string(),
                headers: BTreeMap::new(),
                delay_secs: 1.0,
                timeout_secs: 30.0,
                retries: 3,
                rules: vec![ExtractionRule {
                    field: "link".to_string(),
                    selector: Selector::xpath("//a"),
                    extract: Extract::Attribute("href".to_string()),
                }],
            },
        };

        let text = program.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["mode"], "direct");
        assert_eq!(value["url"], "https://example.com");
        assert_eq!(value["rules"][0]["selector"]["kind"], "xpath");
        assert_eq!(value["rules"][0]["extract"]["attribute"], "href");

        assert_eq!(WorkerProgram::from_json(&text).unwrap(), program);
    }
}
