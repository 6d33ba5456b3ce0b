//! XML mirror of a parsed HTML page
//!
//! XPath expressions are evaluated with `sxd-xpath`, which works on
//! `sxd-document` trees. The mirror copies elements, attributes and text of a
//! `scraper::Html` page into such a tree and keeps a mapping back to the
//! original elements so matches can still be serialized as HTML.

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Node};
use std::collections::HashMap;
use sxd_document::dom::{self, Document};
use sxd_document::Package;

pub struct Mirror<'a, 'd> {
    document: Document<'d>,
    root: ElementRef<'a>,
    forward: HashMap<NodeId, dom::Element<'d>>,
    reverse: HashMap<dom::Element<'d>, ElementRef<'a>>,
}

impl<'a, 'd> Mirror<'a, 'd> {
    /// Copies `html` into the document owned by `package`
    pub fn build(package: &'d Package, html: &'a Html) -> Self {
        let document = package.as_document();
        let root = html.root_element();

        let top = mirror_element(&document, root);
        document.root().append_child(top);

        let mut pairs = vec![(root, top)];
        let mut stack = vec![(root, top)];

        while let Some((source, target)) = stack.pop() {
            for child in source.children() {
                match child.value() {
                    Node::Text(text) => {
                        target.append_child(document.create_text(&**text));
                    }
                    Node::Element(_) => {
                        if let Some(child_ref) = ElementRef::wrap(child) {
                            let element = mirror_element(&document, child_ref);
                            target.append_child(element);
                            pairs.push((child_ref, element));
                            stack.push((child_ref, element));
                        }
                    }
                    _ => {}
                }
            }
        }

        let forward = pairs.iter().map(|(source, target)| (source.id(), *target)).collect();
        let reverse = pairs.into_iter().map(|(source, target)| (target, source)).collect();

        Self {
            document,
            root,
            forward,
            reverse,
        }
    }

    pub fn document_root(&self) -> dom::Root<'d> {
        self.document.root()
    }

    /// The HTML root element
    pub fn html_root(&self) -> ElementRef<'a> {
        self.root
    }

    /// Finds the mirror of an HTML element
    pub fn mirror_of(&self, element: ElementRef<'a>) -> Option<dom::Element<'d>> {
        self.forward.get(&element.id()).copied()
    }

    /// Finds the HTML element a mirror element was copied from
    pub fn original_of(&self, element: dom::Element<'d>) -> Option<ElementRef<'a>> {
        self.reverse.get(&element).copied()
    }
}

fn mirror_element<'d>(document: &Document<'d>, source: ElementRef<'_>) -> dom::Element<'d> {
    let element = document.create_element(source.value().name());
    for (name, value) in source.value().attrs() {
        element.set_attribute_value(name, value);
    }
    element
}
