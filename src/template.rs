//! Site templates
//!
//! A template is plain data: which URLs it claims, how to tell detail pages
//! from listings and streams, and where each field lives. New sites are added
//! by writing a template, never by adding code.

use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::TemplateError;
use crate::locator::{self, Locator};
use crate::record::RESERVED_KEYS;

/// Default cap on repeated items per listing/stream page.
pub const DEFAULT_LIST_ITEM_LIMIT: usize = 20;

/// Default marker prefixed to currency amounts.
pub const DEFAULT_CURRENCY_SYMBOL: &str = "¥";

/// Classification of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageKind {
    /// A single item
    Detail,
    /// Many repeated items
    Listing,
    /// Live/stream page with repeated items
    Stream,
    Unknown,
}

/// How a field's matched elements turn into a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExtractKind {
    #[default]
    PlainText,
    Attribute { name: String },
    CurrencyAmount,
    TextCollection,
    AttributeCollection { name: String },
}

impl ExtractKind {
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            ExtractKind::TextCollection | ExtractKind::AttributeCollection { .. }
        )
    }
}

/// Rule for one named field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    pub name: String,
    /// Tried in order; the first one producing content wins
    pub locators: Vec<Locator>,
    #[serde(default, rename = "extract")]
    pub kind: ExtractKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

impl FieldRule {
    pub fn new(name: impl Into<String>, kind: ExtractKind, locators: Vec<Locator>) -> Self {
        Self {
            name: name.into(),
            locators,
            kind,
            max_items: None,
        }
    }

    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    /// How many matches to ask each locator for.
    pub fn query_limit(&self) -> Option<usize> {
        if self.kind.is_collection() {
            self.max_items
        } else {
            Some(1)
        }
    }
}

/// A predicate over a URL's host and path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UrlMatcher {
    HostContains(String),
    /// Host equals the suffix or ends with `.suffix`
    HostSuffix(String),
    PathPrefix(String),
    PathContains(String),
}

impl UrlMatcher {
    /// `host` is expected lowercased.
    pub fn matches(&self, host: &str, path: &str) -> bool {
        match self {
            UrlMatcher::HostContains(needle) => host.contains(&needle.to_ascii_lowercase()),
            UrlMatcher::HostSuffix(suffix) => {
                let suffix = suffix.to_ascii_lowercase();
                host == suffix || host.ends_with(&format!(".{suffix}"))
            }
            UrlMatcher::PathPrefix(prefix) => path.starts_with(prefix.as_str()),
            UrlMatcher::PathContains(needle) => path.contains(needle.as_str()),
        }
    }
}

/// A predicate over a document, used for page-kind classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PagePredicate {
    /// The locator matches at least one element
    Exists(Locator),
    All(Vec<PagePredicate>),
    Any(Vec<PagePredicate>),
    Not(Box<PagePredicate>),
}

impl PagePredicate {
    pub fn eval<D: Document>(&self, document: &D) -> bool {
        match self {
            PagePredicate::Exists(loc) => locator::resolve(document, None, loc).is_some(),
            PagePredicate::All(preds) => preds.iter().all(|p| p.eval(document)),
            PagePredicate::Any(preds) => preds.iter().any(|p| p.eval(document)),
            PagePredicate::Not(pred) => !pred.eval(document),
        }
    }
}

/// Page-kind predicates, checked in the order detail, listing, stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageClassifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<PagePredicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing: Option<PagePredicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<PagePredicate>,
}

impl PageClassifiers {
    pub fn in_priority_order(&self) -> [(PageKind, Option<&PagePredicate>); 3] {
        [
            (PageKind::Detail, self.detail.as_ref()),
            (PageKind::Listing, self.listing.as_ref()),
            (PageKind::Stream, self.stream.as_ref()),
        ]
    }
}

/// Derives an identifier field from the page URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemIdRule {
    pub field: String,
    /// Regexes tried in order; capture group 1 is the identifier
    pub patterns: Vec<ItemIdPattern>,
}

impl ItemIdRule {
    pub fn extract(&self, url: &str) -> Option<String> {
        self.patterns.iter().find_map(|pattern| {
            let id = pattern.0.captures(url)?.get(1)?.as_str();
            (!id.is_empty()).then(|| id.to_string())
        })
    }
}

/// An item-id regex, compiled when the template is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemIdPattern(Regex);

impl ItemIdPattern {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for ItemIdPattern {
    type Err = regex::Error;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        Regex::new(pattern).map(Self)
    }
}

impl TryFrom<String> for ItemIdPattern {
    type Error = regex::Error;

    fn try_from(pattern: String) -> Result<Self, Self::Error> {
        pattern.parse()
    }
}

impl From<ItemIdPattern> for String {
    fn from(pattern: ItemIdPattern) -> Self {
        pattern.0.as_str().to_string()
    }
}

impl PartialEq for ItemIdPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ItemIdPattern {}

/// Extraction rules for one site family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// The template claims a URL when any matcher fires
    pub url_matchers: Vec<UrlMatcher>,
    #[serde(default)]
    pub page_classifiers: PageClassifiers,
    pub fields: Vec<FieldRule>,
    /// Repeated-item root for listing and stream pages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_item_selector: Option<Locator>,
    #[serde(default = "default_list_item_limit")]
    pub list_item_limit: usize,
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemIdRule>,
    /// Identifying fields that alone do not make a detail record worth keeping
    #[serde(default)]
    pub metadata_fields: Vec<String>,
    /// A listing item is kept only if one of these is present (any field when empty)
    #[serde(default)]
    pub primary_fields: Vec<String>,
}

fn default_list_item_limit() -> usize {
    DEFAULT_LIST_ITEM_LIMIT
}

fn default_currency_symbol() -> String {
    DEFAULT_CURRENCY_SYMBOL.to_string()
}

impl Template {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            url_matchers: Vec::new(),
            page_classifiers: PageClassifiers::default(),
            fields: Vec::new(),
            list_item_selector: None,
            list_item_limit: DEFAULT_LIST_ITEM_LIMIT,
            currency_symbol: default_currency_symbol(),
            item_id: None,
            metadata_fields: Vec::new(),
            primary_fields: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `host` (lowercased) and `path` are claimed by this template.
    pub fn matches_url(&self, host: &str, path: &str) -> bool {
        self.url_matchers.iter().any(|m| m.matches(host, path))
    }

    /// Check structural invariants; run once when the template is registered.
    pub fn validate(&self) -> Result<(), TemplateError> {
        let invalid = |reason: String| TemplateError::Invalid {
            template: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty template id".into()));
        }
        if self.url_matchers.is_empty() {
            return Err(invalid("no url matchers".into()));
        }

        let mut seen = Vec::with_capacity(self.fields.len());
        for rule in &self.fields {
            if rule.name.trim().is_empty() {
                return Err(invalid("field with empty name".into()));
            }
            if RESERVED_KEYS.contains(&rule.name.as_str()) {
                return Err(invalid(format!("field name `{}` is reserved", rule.name)));
            }
            if seen.contains(&rule.name.as_str()) {
                return Err(invalid(format!("duplicate field `{}`", rule.name)));
            }
            if rule.locators.is_empty() {
                return Err(invalid(format!("field `{}` has no locators", rule.name)));
            }
            seen.push(rule.name.as_str());
        }

        let repeats = self.page_classifiers.listing.is_some() || self.page_classifiers.stream.is_some();
        if repeats && self.list_item_selector.is_none() {
            return Err(invalid("listing/stream classifier without a list item selector".into()));
        }

        if let Some(rule) = &self.item_id {
            if RESERVED_KEYS.contains(&rule.field.as_str()) {
                return Err(invalid(format!("item id field `{}` is reserved", rule.field)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Template {
        let mut t = Template::new("shop");
        t.url_matchers.push(UrlMatcher::HostSuffix("shop.example".into()));
        t.fields.push(FieldRule::new(
            "title",
            ExtractKind::PlainText,
            vec![Locator::css("h1")],
        ));
        t
    }

    #[test]
    fn test_url_matchers() {
        assert!(UrlMatcher::HostContains("taobao.com".into()).matches("item.taobao.com", "/"));
        assert!(UrlMatcher::HostSuffix("jd.com".into()).matches("jd.com", "/"));
        assert!(UrlMatcher::HostSuffix("jd.com".into()).matches("item.jd.com", "/"));
        assert!(!UrlMatcher::HostSuffix("jd.com".into()).matches("notjd.com", "/"));
        assert!(UrlMatcher::PathPrefix("/item/".into()).matches("x.com", "/item/42"));
        assert!(UrlMatcher::PathContains("detail".into()).matches("x.com", "/a/detail/1"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let t: Template = serde_json::from_str(
            r##"{
                "id": "shop",
                "urlMatchers": [{"hostContains": "shop"}],
                "pageClassifiers": {"detail": {"exists": {"css": "#product"}}},
                "fields": [
                    {"name": "title", "locators": ["h1", "//title"]},
                    {"name": "price", "locators": [{"css": ".price"}], "extract": {"type": "currencyAmount"}},
                    {"name": "images", "locators": ["img"], "extract": {"type": "attributeCollection", "name": "src"}, "maxItems": 5}
                ]
            }"##,
        )
        .unwrap();

        assert_eq!(t.list_item_limit, DEFAULT_LIST_ITEM_LIMIT);
        assert_eq!(t.currency_symbol, "¥");
        assert_eq!(t.field("title").unwrap().kind, ExtractKind::PlainText);
        assert_eq!(t.field("title").unwrap().query_limit(), Some(1));
        let images = t.field("images").unwrap();
        assert_eq!(images.kind, ExtractKind::AttributeCollection { name: "src".into() });
        assert_eq!(images.query_limit(), Some(5));
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_templates() {
        let mut t = minimal();
        t.fields[0].locators.clear();
        assert!(matches!(t.validate(), Err(TemplateError::Invalid { .. })));

        let mut t = minimal();
        t.fields.push(FieldRule::new("url", ExtractKind::PlainText, vec![Locator::css("a")]));
        assert!(t.validate().is_err());

        let mut t = minimal();
        t.fields.push(t.fields[0].clone());
        assert!(t.validate().is_err());

        let mut t = minimal();
        t.page_classifiers.listing = Some(PagePredicate::Exists(Locator::css("ul")));
        assert!(t.validate().is_err());

        let mut t = minimal();
        t.item_id = Some(ItemIdRule {
            field: "url".into(),
            patterns: Vec::new(),
        });
        assert!(t.validate().is_err());

        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn test_item_id_patterns_in_order() {
        let rule = ItemIdRule {
            field: "itemId".into(),
            patterns: [r"id=(\d+)", r"item/(\d+)", r"/(\d{10,})"]
                .iter()
                .map(|p| p.parse().unwrap())
                .collect(),
        };
        assert_eq!(rule.extract("https://x.com/item.htm?id=42&y=1").as_deref(), Some("42"));
        assert_eq!(rule.extract("https://x.com/item/77").as_deref(), Some("77"));
        assert_eq!(rule.extract("https://x.com/1234567890123.html").as_deref(), Some("1234567890123"));
        assert_eq!(rule.extract("https://x.com/about"), None);
    }

    #[test]
    fn test_bad_item_id_pattern_fails_to_load() {
        let err = serde_json::from_str::<ItemIdRule>(r#"{"field": "itemId", "patterns": ["(unclosed"]}"#).unwrap_err();
        assert!(err.to_string().contains("regex parse error"));

        let rule: ItemIdRule = serde_json::from_str(r#"{"field": "itemId", "patterns": ["/(\\d+)"]}"#).unwrap();
        assert_eq!(serde_json::to_value(&rule).unwrap()["patterns"][0], r"/(\d+)");
    }
}
