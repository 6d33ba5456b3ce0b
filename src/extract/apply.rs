//! Rule application
//!
//! The first rule locates the repeating item elements of the page. With at
//! least one item, every rule is evaluated inside each item and one record is
//! produced per item. With no items, all rules are evaluated once against the
//! whole document, producing at most one record.

use crate::extract::mirror::Mirror;
use crate::extract::select::{Evaluator, Matched, Scope};
use crate::spider::{ExtractionRule, RuleSet};
use scraper::Html;
use serde_json::{Map, Value};
use sxd_document::Package;

/// One extracted record, fields in rule order
pub type Record = Map<String, Value>;

/// Parses `page` and applies the rules of `ruleset` to it
pub fn extract_records(page: &str, ruleset: &RuleSet) -> Vec<Record> {
    let html = Html::parse_document(page);
    let package = Package::new();
    let mirror = ruleset.uses_xpath().then(|| Mirror::build(&package, &html));

    let evaluator = Evaluator::new(&html, mirror);
    apply_rules(&evaluator, &ruleset.rules)
}

/// Applies rules to an already prepared page
pub fn apply_rules<'a>(evaluator: &Evaluator<'a, '_>, rules: &[ExtractionRule]) -> Vec<Record> {
    let Some(first) = rules.first() else {
        return Vec::new();
    };

    let items: Vec<_> = match evaluator.select(&first.selector, Scope::Document) {
        Ok(matches) => matches.into_iter().filter_map(Matched::into_element).collect(),
        Err(e) => {
            tracing::error!("Item selector failed: {}", e);
            return Vec::new();
        }
    };

    if items.is_empty() {
        let record = build_record(evaluator, rules, Scope::Document);
        return if record.is_empty() { Vec::new() } else { vec![record] };
    }

    items
        .into_iter()
        .map(|item| build_record(evaluator, rules, Scope::Element(item)))
        .filter(|record| !record.is_empty())
        .collect()
}

fn build_record<'a>(evaluator: &Evaluator<'a, '_>, rules: &[ExtractionRule], scope: Scope<'a>) -> Record {
    let mut record = Record::new();

    for rule in rules.iter().filter(|rule| rule.is_usable()) {
        let value = match evaluator.select(&rule.selector, scope) {
            Ok(matches) => matches
                .first()
                .map(|m| m.extract(&rule.extract))
                .unwrap_or_default(),
            Err(e) => {
                tracing::error!("Failed to extract field {}: {}", rule.field, e);
                String::new()
            }
        };
        record.insert(rule.field.clone(), Value::String(value));
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spider::{Extract, Selector};
    use std::collections::BTreeMap;

    const LISTING: &str = r#"<html><body>
        <div class="item" data-id="1"><h2>First</h2><a href="/1">more</a></div>
        <div class="item" data-id="2"><h2>Second</h2><a href="/2">more</a></div>
        <div class="item" data-id="3"><h2>Third</h2><a href="/3">more</a></div>
        <p class="footer">Footer text</p>
    </body></html>"#;

    fn rule(field: &str, selector: Selector, extract: Extract) -> ExtractionRule {
        ExtractionRule {
            field: field.to_string(),
            selector,
            extract,
        }
    }

    fn ruleset(rules: Vec<ExtractionRule>) -> RuleSet {
        RuleSet {
            url: "https://example.com/list".to_string(),
            headers: BTreeMap::new(),
            delay_secs: 0.0,
            timeout_secs: 5.0,
            retries: 0,
            rules,
        }
    }

    #[test]
    fn test_one_record_per_item() {
        let rules = vec![
            rule("id", Selector::css("div.item"), Extract::Attribute("data-id".to_string())),
            rule("title", Selector::css("h2"), Extract::Text),
        ];

        let records = extract_records(LISTING, &ruleset(rules));
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["id"], "1");
        assert_eq!(records[1]["title"], "Second");
        assert_eq!(records[2]["id"], "3");

        let keys: Vec<_> = records[0].keys().cloned().collect();
        assert_eq!(keys, vec!["id", "title"]);
    }

    #[test]
    fn test_item_itself_matches() {
        let rules = vec![
            rule("block", Selector::css("div.item"), Extract::Text),
            rule("link", Selector::css("a"), Extract::Attribute("href".to_string())),
        ];

        let records = extract_records(LISTING, &ruleset(rules));
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["block"], "Firstmore");
    }

    #[test]
    fn test_no_items_yields_single_record() {
        let rules = vec![
            rule("missing", Selector::css(".nothing"), Extract::Text),
            rule("footer", Selector::css("p.footer"), Extract::Text),
        ];

        let records = extract_records(LISTING, &ruleset(rules));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["missing"], "");
        assert_eq!(records[0]["footer"], "Footer text");
    }

    #[test]
    fn test_invalid_item_selector_yields_nothing() {
        let rules = vec![
            rule("bad", Selector::css("div[["), Extract::Text),
            rule("footer", Selector::css("p.footer"), Extract::Text),
        ];
        assert!(extract_records(LISTING, &ruleset(rules)).is_empty());
    }

    #[test]
    fn test_unusable_rules_skipped() {
        let rules = vec![
            rule("title", Selector::css(".item h2"), Extract::Text),
            rule("", Selector::css("a"), Extract::Text),
            rule("empty", Selector::css(""), Extract::Text),
        ];

        let records = extract_records(LISTING, &ruleset(rules));
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].len(), 1);
    }

    #[test]
    fn test_field_error_sets_empty() {
        let rules = vec![
            rule("title", Selector::css(".item h2"), Extract::Text),
            rule("broken", Selector::css("a[["), Extract::Text),
        ];

        let records = extract_records(LISTING, &ruleset(rules));
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["broken"], "");
    }

    #[test]
    fn test_xpath_rules() {
        let rules = vec![
            rule("title", Selector::xpath("//div[@class='item']"), Extract::Text),
            rule("heading", Selector::xpath(".//h2"), Extract::Text),
            rule("link", Selector::xpath(".//a/@href"), Extract::Text),
            rule("markup", Selector::css("h2"), Extract::Html),
        ];

        let records = extract_records(LISTING, &ruleset(rules));
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["heading"], "First");
        assert_eq!(records[1]["link"], "/2");
        assert_eq!(records[2]["markup"], "<h2>Third</h2>");
    }

    #[test]
    fn test_empty_rules() {
        assert!(extract_records(LISTING, &ruleset(Vec::new())).is_empty());
    }
}
