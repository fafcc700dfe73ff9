//! Field normalization
//!
//! Turns matched elements into typed values. Anything that normalizes to
//! nothing is `None` so the record omits the field.

use std::sync::LazyLock;

use regex::Regex;

use crate::document::Document;
use crate::record::Value;
use crate::template::ExtractKind;

/// Digits with optional grouping separators and an optional decimal part
static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:,\d+)*(?:\.\d+)?").unwrap());

/// Trim surrounding whitespace; `None` when nothing is left.
pub fn normalize_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Attribute values are trimmed but otherwise kept verbatim.
pub fn normalize_attribute(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Pull the first amount out of `raw` and tag it with `symbol`.
///
/// Text without any amount ("询价", "price on request") is kept as plain text
/// rather than dropped.
pub fn normalize_currency(raw: &str, symbol: &str) -> Option<Value> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    match AMOUNT_RE.find(text) {
        Some(m) => Some(Value::Currency {
            amount: m.as_str().to_string(),
            symbol: symbol.to_string(),
        }),
        None => Some(Value::Text(text.to_string())),
    }
}

/// Normalize one locator's matches according to `kind`.
///
/// Scalar kinds read the first match; collections read every match (the
/// caller already capped them) and drop empties, keeping document order.
pub fn normalize<'a, D: Document>(
    document: &'a D,
    nodes: &[D::Node<'a>],
    kind: &ExtractKind,
    currency_symbol: &str,
) -> Option<Value> {
    let first = *nodes.first()?;
    match kind {
        ExtractKind::PlainText => normalize_text(&document.text(first)).map(Value::Text),
        ExtractKind::Attribute { name } => {
            normalize_attribute(document.attr(first, name).as_deref()).map(Value::Text)
        }
        ExtractKind::CurrencyAmount => normalize_currency(&document.text(first), currency_symbol),
        ExtractKind::TextCollection => collect(
            nodes
                .iter()
                .filter_map(|node| normalize_text(&document.text(*node))),
        ),
        ExtractKind::AttributeCollection { name } => collect(
            nodes
                .iter()
                .filter_map(|node| normalize_attribute(document.attr(*node, name).as_deref())),
        ),
    }
}

fn collect(items: impl Iterator<Item = String>) -> Option<Value> {
    let items: Vec<String> = items.collect();
    (!items.is_empty()).then_some(Value::List(items))
}
