//! Document access
//!
//! The engine only needs to run selector and path-expression queries (rooted
//! at the document or at a node) and to read text and attributes.
//! `HtmlDocument` provides that over the scraper crate.

use scraper::{ElementRef, Html, Selector};

use crate::error::LocatorError;
use crate::locator::xpath::PathExpr;
use crate::locator::{Locator, LocatorKind};

/// Read-only view of a rendered document.
pub trait Document {
    /// Handle to one element, valid while the document is borrowed.
    type Node<'a>: Copy
    where
        Self: 'a;

    /// Every element `locator` matches under `scope` (the whole document when
    /// `None`), in document order, up to `limit`.
    fn query<'a>(
        &'a self,
        scope: Option<Self::Node<'a>>,
        locator: &Locator,
        limit: Option<usize>,
    ) -> Result<Vec<Self::Node<'a>>, LocatorError>;

    /// Concatenated text content of `node`, untrimmed.
    fn text<'a>(&'a self, node: Self::Node<'a>) -> String;

    fn attr<'a>(&'a self, node: Self::Node<'a>, name: &str) -> Option<String>;
}

/// A parsed HTML document.
pub struct HtmlDocument {
    html: Html,
}

impl HtmlDocument {
    /// Parse a full HTML document
    pub fn parse(source: &str) -> Self {
        Self {
            html: Html::parse_document(source),
        }
    }

    /// Parse an HTML fragment (no implied `<head>`/`<body>`)
    pub fn parse_fragment(source: &str) -> Self {
        Self {
            html: Html::parse_fragment(source),
        }
    }

    pub fn html(&self) -> &Html {
        &self.html
    }
}

impl From<Html> for HtmlDocument {
    fn from(html: Html) -> Self {
        Self { html }
    }
}

impl Document for HtmlDocument {
    type Node<'a> = ElementRef<'a>;

    fn query<'a>(
        &'a self,
        scope: Option<ElementRef<'a>>,
        locator: &Locator,
        limit: Option<usize>,
    ) -> Result<Vec<ElementRef<'a>>, LocatorError> {
        let take = limit.unwrap_or(usize::MAX);
        match locator.kind {
            LocatorKind::Selector => {
                let selector = Selector::parse(&locator.expression).map_err(|e| {
                    LocatorError::InvalidSelector {
                        expression: locator.expression.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let nodes = match scope {
                    Some(el) => el.select(&selector).take(take).collect(),
                    None => self.html.select(&selector).take(take).collect(),
                };
                Ok(nodes)
            }
            LocatorKind::PathExpression => {
                let path = PathExpr::compile(&locator.expression)?;
                Ok(path.select(&self.html, scope, limit))
            }
        }
    }

    fn text<'a>(&'a self, node: ElementRef<'a>) -> String {
        node.text().collect()
    }

    fn attr<'a>(&'a self, node: ElementRef<'a>, name: &str) -> Option<String> {
        node.value().attr(name).map(String::from)
    }
}

/// Instrumented fake for exercising resolution order without real markup.
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::*;

    /// Each entry is `(expression, text)`; a query matches every entry whose
    /// expression equals the locator's, and records the expression it was asked for.
    pub struct CountingDocument {
        entries: Vec<(String, String)>,
        queried: RefCell<Vec<String>>,
    }

    impl CountingDocument {
        pub fn new(entries: &[(&str, &str)]) -> Self {
            Self {
                entries: entries
                    .iter()
                    .map(|(e, t)| (e.to_string(), t.to_string()))
                    .collect(),
                queried: RefCell::new(Vec::new()),
            }
        }

        pub fn queried(&self) -> Vec<String> {
            self.queried.borrow().clone()
        }
    }

    impl Document for CountingDocument {
        type Node<'a> = usize;

        fn query<'a>(
            &'a self,
            _scope: Option<usize>,
            locator: &Locator,
            limit: Option<usize>,
        ) -> Result<Vec<usize>, LocatorError> {
            self.queried.borrow_mut().push(locator.expression.clone());
            Ok(self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, (expr, _))| *expr == locator.expression)
                .map(|(i, _)| i)
                .take(limit.unwrap_or(usize::MAX))
                .collect())
        }

        fn text<'a>(&'a self, node: usize) -> String {
            self.entries[node].1.clone()
        }

        fn attr<'a>(&'a self, _node: usize, _name: &str) -> Option<String> {
            None
        }
    }
}
