//! Spider definitions
//!
//! A stored spider is either a free-form script or a declarative extraction
//! ruleset. This module turns raw storage records into typed definitions.

mod definition;
mod rules;

pub use definition::{SourceKind, SpiderDefinition};
pub use rules::{
    Extract, ExtractionRule, InvalidRuleSet, RuleSet, Selector, SelectorKind, DEFAULT_DELAY_SECS,
    DEFAULT_RETRIES, DEFAULT_TIMEOUT_SECS,
};
