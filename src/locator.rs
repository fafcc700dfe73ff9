//! Locators and prioritized resolution
//!
//! A field names several locators; they are tried strictly left to right and
//! the first one that yields usable content wins. Later locators are never
//! evaluated. A malformed expression is logged and treated as "no match" so a
//! template typo only costs one field.

pub mod xpath;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::document::Document;

/// Query language of a locator expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocatorKind {
    /// CSS selector
    Selector,
    /// XPath-style path expression
    PathExpression,
}

/// An expression identifying zero or more elements of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LocatorRepr", into = "LocatorRepr")]
pub struct Locator {
    pub kind: LocatorKind,
    pub expression: String,
}

impl Locator {
    pub fn css(expression: impl Into<String>) -> Self {
        Self {
            kind: LocatorKind::Selector,
            expression: expression.into(),
        }
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Self {
            kind: LocatorKind::PathExpression,
            expression: expression.into(),
        }
    }

    /// Classify a bare expression: path expressions start with `/` or `.`
    pub fn infer(expression: impl Into<String>) -> Self {
        let expression = expression.into();
        let trimmed = expression.trim_start();
        if trimmed.starts_with('/') || trimmed.starts_with("./") || trimmed.starts_with("..") {
            Self::xpath(expression)
        } else {
            Self::css(expression)
        }
    }
}

/// Wire form: `{"css": ".."}`, `{"xpath": ".."}` or a bare string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum LocatorRepr {
    Css { css: String },
    XPath { xpath: String },
    Bare(String),
}

impl From<LocatorRepr> for Locator {
    fn from(repr: LocatorRepr) -> Self {
        match repr {
            LocatorRepr::Css { css } => Locator::css(css),
            LocatorRepr::XPath { xpath } => Locator::xpath(xpath),
            LocatorRepr::Bare(expression) => Locator::infer(expression),
        }
    }
}

impl From<Locator> for LocatorRepr {
    fn from(locator: Locator) -> Self {
        match locator.kind {
            LocatorKind::Selector => LocatorRepr::Css {
                css: locator.expression,
            },
            LocatorKind::PathExpression => LocatorRepr::XPath {
                xpath: locator.expression,
            },
        }
    }
}

/// Resolve the first element matched by `locator`.
pub fn resolve<'a, D: Document>(
    document: &'a D,
    scope: Option<D::Node<'a>>,
    locator: &Locator,
) -> Option<D::Node<'a>> {
    resolve_all(document, scope, locator, Some(1)).into_iter().next()
}

/// Resolve every element matched by `locator`, in document order, up to `limit`.
pub fn resolve_all<'a, D: Document>(
    document: &'a D,
    scope: Option<D::Node<'a>>,
    locator: &Locator,
    limit: Option<usize>,
) -> Vec<D::Node<'a>> {
    match document.query(scope, locator, limit) {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!(error = %e, "malformed locator, treating as no match");
            Vec::new()
        }
    }
}

/// Try `locators` in order and return the first non-empty value `accept`
/// produces from a locator's matches.
///
/// Locators after the winning one are not queried.
pub fn resolve_first_of<'a, D, T, F>(
    document: &'a D,
    scope: Option<D::Node<'a>>,
    locators: &[Locator],
    limit: Option<usize>,
    mut accept: F,
) -> Option<T>
where
    D: Document,
    F: FnMut(&[D::Node<'a>]) -> Option<T>,
{
    for locator in locators {
        let nodes = resolve_all(document, scope, locator, limit);
        if nodes.is_empty() {
            continue;
        }
        if let Some(value) = accept(&nodes) {
            return Some(value);
        }
    }
    None
}
