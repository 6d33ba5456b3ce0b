//! Selector evaluation over a parsed page

use crate::extract::mirror::Mirror;
use crate::spider::{Extract, Selector, SelectorKind};
use scraper::{ElementRef, Html};
use sxd_xpath::nodeset::Node as XNode;
use sxd_xpath::{Context, Factory, Value as XValue};
use thiserror::Error;

/// A selector that could not be evaluated
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("invalid CSS selector '{expression}': {reason}")]
    Css { expression: String, reason: String },

    #[error("invalid XPath '{expression}': {reason}")]
    XPath { expression: String, reason: String },

    #[error("XPath evaluation is not enabled for this page")]
    NoMirror,
}

/// Where a selector is evaluated
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    Document,
    Element(ElementRef<'a>),
}

/// One selector match
#[derive(Debug, Clone)]
pub enum Matched<'a> {
    Element(ElementRef<'a>),
    /// Attribute values, text nodes and scalar XPath results
    Value(String),
}

impl<'a> Matched<'a> {
    pub fn into_element(self) -> Option<ElementRef<'a>> {
        match self {
            Self::Element(element) => Some(element),
            Self::Value(_) => None,
        }
    }

    /// Takes the requested value out of the match
    pub fn extract(&self, extract: &Extract) -> String {
        match (self, extract) {
            (Self::Element(element), Extract::Text) => {
                element.text().collect::<String>().trim().to_string()
            }
            (Self::Element(element), Extract::Attribute(name)) => {
                element.value().attr(name).unwrap_or_default().to_string()
            }
            (Self::Element(element), Extract::Html) => element.html(),
            (Self::Value(value), Extract::Text) => value.trim().to_string(),
            (Self::Value(_), Extract::Attribute(_)) => String::new(),
            (Self::Value(value), Extract::Html) => value.clone(),
        }
    }
}

/// Evaluates selectors of both dialects against one page
pub struct Evaluator<'a, 'd> {
    html: &'a Html,
    mirror: Option<Mirror<'a, 'd>>,
    factory: Factory,
}

impl<'a, 'd> Evaluator<'a, 'd> {
    pub fn new(html: &'a Html, mirror: Option<Mirror<'a, 'd>>) -> Self {
        Self {
            html,
            mirror,
            factory: Factory::new(),
        }
    }

    /// Evaluates a selector, returning matches in document order
    ///
    /// A CSS selector evaluated inside an element that matches none of its
    /// descendants falls back to the element itself when it matches.
    pub fn select(&self, selector: &Selector, scope: Scope<'a>) -> Result<Vec<Matched<'a>>, SelectError> {
        match selector.kind {
            SelectorKind::Css => self.css(&selector.expression, scope),
            SelectorKind::XPath => self.xpath(&selector.expression, scope),
        }
    }

    fn css(&self, expression: &str, scope: Scope<'a>) -> Result<Vec<Matched<'a>>, SelectError> {
        let selector = scraper::Selector::parse(expression).map_err(|e| SelectError::Css {
            expression: expression.to_string(),
            reason: format!("{:?}", e),
        })?;

        let matches = match scope {
            Scope::Document => self.html.select(&selector).map(Matched::Element).collect(),
            Scope::Element(item) => {
                let found: Vec<_> = item.select(&selector).map(Matched::Element).collect();
                if found.is_empty() && selector.matches(&item) {
                    vec![Matched::Element(item)]
                } else {
                    found
                }
            }
        };
        Ok(matches)
    }

    fn xpath(&self, expression: &str, scope: Scope<'a>) -> Result<Vec<Matched<'a>>, SelectError> {
        let mirror = self.mirror.as_ref().ok_or(SelectError::NoMirror)?;
        let invalid = |reason: String| SelectError::XPath {
            expression: expression.to_string(),
            reason,
        };

        let xpath = self
            .factory
            .build(expression)
            .map_err(|e| invalid(e.to_string()))?
            .ok_or_else(|| invalid("empty expression".to_string()))?;

        let context = Context::new();
        let value = match scope {
            Scope::Element(item) => match mirror.mirror_of(item) {
                Some(node) => xpath.evaluate(&context, node),
                None => xpath.evaluate(&context, mirror.document_root()),
            },
            Scope::Document => xpath.evaluate(&context, mirror.document_root()),
        }
        .map_err(|e| invalid(e.to_string()))?;

        let matches = match value {
            XValue::Nodeset(nodes) => nodes
                .document_order()
                .into_iter()
                .map(|node| match node {
                    XNode::Element(element) => mirror
                        .original_of(element)
                        .map(Matched::Element)
                        .unwrap_or_else(|| Matched::Value(node.string_value())),
                    XNode::Root(_) => Matched::Element(mirror.html_root()),
                    other => Matched::Value(other.string_value()),
                })
                .collect(),
            XValue::Boolean(b) => vec![Matched::Value(b.to_string())],
            XValue::Number(n) => vec![Matched::Value(n.to_string())],
            XValue::String(s) => vec![Matched::Value(s)],
        };
        Ok(matches)
    }
}
