//! Template-driven extraction
//!
//! The engine holds no mutable state: the registry is built up front and
//! shared read-only, so one engine can serve any number of callers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::classifier;
use crate::document::Document;
use crate::error::TemplateError;
use crate::locator;
use crate::normalizer;
use crate::record::{Record, Value};
use crate::registry::TemplateRegistry;
use crate::template::{PageKind, Template};

#[derive(Debug, Clone)]
pub struct ExtractionEngine {
    registry: Arc<TemplateRegistry>,
}

impl ExtractionEngine {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    /// Extract every record `document` holds, picking the template from `url`.
    ///
    /// An unsupported site or an unrecognized page yields an empty list.
    pub fn extract<D: Document>(&self, document: &D, url: &str) -> Result<Vec<Record>, TemplateError> {
        let Some(id) = classifier::classify_id(&self.registry, url) else {
            return Ok(Vec::new());
        };
        let template = self.registry.lookup(id)?;
        Ok(extract_records(document, url, template, Utc::now()))
    }

    /// Extract using an explicitly named template, skipping URL classification.
    pub fn extract_with_template<D: Document>(
        &self,
        document: &D,
        url: &str,
        template_id: &str,
    ) -> Result<Vec<Record>, TemplateError> {
        let template = self.registry.lookup(template_id)?;
        Ok(extract_records(document, url, template, Utc::now()))
    }
}

/// Run `template` over `document`; every record shares `captured_at`.
pub fn extract_records<D: Document>(
    document: &D,
    url: &str,
    template: &Template,
    captured_at: DateTime<Utc>,
) -> Vec<Record> {
    let kind = classifier::classify_page_kind(document, template);
    let records = match kind {
        PageKind::Detail => extract_detail(document, url, template, captured_at)
            .into_iter()
            .collect(),
        PageKind::Listing | PageKind::Stream => extract_items(document, url, template, kind, captured_at),
        PageKind::Unknown => {
            debug!(template = %template.id, url, "page kind not recognized");
            Vec::new()
        }
    };
    debug!(template = %template.id, ?kind, records = records.len(), "extraction finished");
    records
}

fn extract_detail<D: Document>(
    document: &D,
    url: &str,
    template: &Template,
    captured_at: DateTime<Utc>,
) -> Option<Record> {
    let mut record = Record::new(&template.id, PageKind::Detail, url, captured_at);
    fill_fields(document, None, template, &mut record);

    let substantive = record
        .fields
        .keys()
        .any(|name| !template.metadata_fields.contains(name));
    if !substantive {
        debug!(template = %template.id, url, "detail page produced no content fields, discarding");
        return None;
    }

    if let Some(rule) = &template.item_id {
        if !record.has(&rule.field) {
            record.set(rule.field.clone(), rule.extract(url).map(Value::Text));
        }
    }
    Some(record)
}

fn extract_items<D: Document>(
    document: &D,
    url: &str,
    template: &Template,
    kind: PageKind,
    captured_at: DateTime<Utc>,
) -> Vec<Record> {
    let Some(item_locator) = &template.list_item_selector else {
        return Vec::new();
    };
    let items = locator::resolve_all(document, None, item_locator, Some(template.list_item_limit));

    let total = items.len();
    let records: Vec<Record> = items
        .into_iter()
        .filter_map(|item| {
            let mut record = Record::new(&template.id, kind, url, captured_at);
            fill_fields(document, Some(item), template, &mut record);
            keep_item(template, &record).then_some(record)
        })
        .collect();

    if records.len() < total {
        debug!(
            template = %template.id,
            dropped = total - records.len(),
            "items without primary fields discarded"
        );
    }
    records
}

fn keep_item(template: &Template, record: &Record) -> bool {
    if template.primary_fields.is_empty() {
        !record.is_empty()
    } else {
        template.primary_fields.iter().any(|name| record.has(name))
    }
}

/// Resolve every field rule under `scope` into `record`.
fn fill_fields<'a, D: Document>(
    document: &'a D,
    scope: Option<D::Node<'a>>,
    template: &Template,
    record: &mut Record,
) {
    for rule in &template.fields {
        let value = locator::resolve_first_of(document, scope, &rule.locators, rule.query_limit(), |nodes| {
            normalizer::normalize(document, nodes, &rule.kind, &template.currency_symbol)
        });
        record.set(rule.name.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HtmlDocument;
    use crate::history::{HistoryPolicy, HistoryStore};
    use crate::locator::Locator;
    use crate::storage::MemoryStore;
    use crate::template::{ExtractKind, FieldRule, PagePredicate, UrlMatcher};

    fn example_template() -> Template {
        let mut t = Template::new("example");
        t.url_matchers.push(UrlMatcher::HostSuffix("example.com".into()));
        t.page_classifiers.detail = Some(PagePredicate::Exists(Locator::css("#item")));
        t.page_classifiers.listing = Some(PagePredicate::Exists(Locator::css("ul.results")));
        t.list_item_selector = Some(Locator::css("ul.results > li"));
        t.fields = vec![
            FieldRule::new("title", ExtractKind::PlainText, vec![Locator::css("h1"), Locator::css(".name")]),
            FieldRule::new("price", ExtractKind::CurrencyAmount, vec![Locator::css(".price")]),
            FieldRule::new("shop", ExtractKind::PlainText, vec![Locator::css(".shop")]),
            FieldRule::new(
                "sales",
                ExtractKind::PlainText,
                vec![Locator::xpath(".//span[@class=\"sales\"]")],
            ),
            FieldRule::new(
                "image",
                ExtractKind::Attribute { name: "src".into() },
                vec![Locator::css("img.main")],
            ),
        ];
        t.primary_fields = vec!["title".into(), "price".into()];
        t
    }

    fn engine() -> ExtractionEngine {
        let mut registry = TemplateRegistry::new();
        registry.register(example_template()).unwrap();
        ExtractionEngine::new(Arc::new(registry))
    }

    const DETAIL: &str = r#"
        <div id="item">
            <h1>  Ceramic   Mug </h1>
            <div class="price">¥39.90</div>
            <div class="shop">   </div>
        </div>"#;

    #[test]
    fn test_unsupported_url_yields_nothing() {
        let doc = HtmlDocument::parse(DETAIL);
        assert!(engine().extract(&doc, "https://unknown.org/item/1").unwrap().is_empty());
        assert!(engine().extract(&doc, "::not a url::").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_page_kind_yields_nothing() {
        let doc = HtmlDocument::parse("<p>about us</p>");
        assert!(engine().extract(&doc, "https://item.example.com/about").unwrap().is_empty());
    }

    #[test]
    fn test_detail_two_of_five_fields_then_history() {
        let doc = HtmlDocument::parse(DETAIL);
        let records = engine().extract(&doc, "https://item.example.com/123456").unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        let names: Vec<&str> = record.fields.keys().map(String::as_str).collect();
        assert_eq!(names, ["title", "price"]);
        assert_eq!(record.get("title"), Some(&Value::Text("Ceramic   Mug".into())));
        assert_eq!(
            record.get("price"),
            Some(&Value::Currency {
                amount: "39.90".into(),
                symbol: "¥".into()
            })
        );
        assert_eq!(record.template_id, "example");
        assert_eq!(record.page_kind, PageKind::Detail);
        assert_eq!(record.source_url, "https://item.example.com/123456");

        let json = serde_json::to_value(record).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["title", "price", "url", "template", "pageKind", "capturedAt"]);

        let history = HistoryStore::new(Arc::new(MemoryStore::new()), "dataHistory", HistoryPolicy::auto());
        history.insert(record.clone()).unwrap();
        let entry = history.insert(record.clone()).unwrap();
        let listed = history.list(None).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, entry.id);
        let stored = &listed[0].record;
        assert_eq!(stored.source_url, record.source_url);
        assert_eq!(stored.captured_at, record.captured_at);
        assert_eq!(stored.get("title"), record.get("title"));
        // the flat stored form keeps currency as its display string
        assert_eq!(stored.get("price"), Some(&Value::Text("¥39.90".into())));
    }

    #[test]
    fn test_no_field_is_stored_empty() {
        let doc = HtmlDocument::parse(
            r#"<div id="item"><h1> </h1><span class="name">Fallback</span><img class="main" src=""></div>"#,
        );
        let records = engine().extract(&doc, "https://example.com/x").unwrap();
        let record = &records[0];
        assert_eq!(record.get("title"), Some(&Value::Text("Fallback".into())));
        assert!(record.fields.values().all(|v| !v.is_empty()));
        assert!(!record.has("image"));
    }

    #[test]
    fn test_detail_with_only_metadata_is_discarded() {
        let mut template = example_template();
        template.item_id = Some(crate::template::ItemIdRule {
            field: "itemId".into(),
            patterns: vec![r"/(\d+)".parse().unwrap()],
        });
        template.metadata_fields = vec!["itemId".into()];

        let empty = HtmlDocument::parse(r#"<div id="item"></div>"#);
        let at = Utc::now();
        assert!(extract_records(&empty, "https://example.com/42", &template, at).is_empty());

        let full = HtmlDocument::parse(DETAIL);
        let records = extract_records(&full, "https://example.com/42", &template, at);
        assert_eq!(records[0].get("itemId"), Some(&Value::Text("42".into())));
    }

    #[test]
    fn test_extraction_is_idempotent_except_capture_time() {
        let doc = HtmlDocument::parse(DETAIL);
        let engine = engine();
        let first = engine.extract(&doc, "https://example.com/1").unwrap();
        let mut second = engine.extract(&doc, "https://example.com/1").unwrap();
        for (a, b) in first.iter().zip(second.iter_mut()) {
            b.captured_at = a.captured_at;
        }
        assert_eq!(first, second);
    }

    #[test]
    fn test_listing_items_scoped_and_filtered() {
        let doc = HtmlDocument::parse(
            r#"<ul class="results">
                <li><span class="name">A</span><span class="price">¥10</span><span class="sales">5 sold</span></li>
                <li><span class="shop">Only a shop</span></li>
                <li><span class="price">询价</span></li>
            </ul>"#,
        );
        let records = engine().extract(&doc, "https://example.com/search?q=mug").unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].page_kind, PageKind::Listing);
        assert_eq!(records[0].get("title"), Some(&Value::Text("A".into())));
        assert_eq!(records[0].get("sales"), Some(&Value::Text("5 sold".into())));
        assert_eq!(records[1].get("price"), Some(&Value::Text("询价".into())));
        assert!(!records[1].has("title"));
        assert_eq!(records[0].captured_at, records[1].captured_at);
    }

    #[test]
    fn test_listing_respects_item_limit() {
        let mut template = example_template();
        template.list_item_limit = 2;
        let items: String = (0..5)
            .map(|i| format!("<li><span class=\"name\">Item {i}</span></li>"))
            .collect();
        let doc = HtmlDocument::parse(&format!("<ul class=\"results\">{items}</ul>"));
        let records = extract_records(&doc, "https://example.com/list", &template, Utc::now());
        let titles: Vec<String> = records.iter().map(|r| r.get("title").unwrap().to_string()).collect();
        assert_eq!(titles, ["Item 0", "Item 1"]);
    }

    #[test]
    fn test_explicit_template_lookup() {
        let doc = HtmlDocument::parse(DETAIL);
        let engine = engine();
        let records = engine
            .extract_with_template(&doc, "https://elsewhere.org/p", "example")
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            engine.extract_with_template(&doc, "https://elsewhere.org/p", "missing"),
            Err(TemplateError::NotFound("missing".into()))
        );
    }

    #[test]
    fn test_builtin_taobao_detail_paths() {
        let doc = HtmlDocument::parse(
            r#"<div id="tbpcDetail_SkuPanelBody">
                <div>badge</div>
                <div><div><div><div><span>Stoneware Teapot</span></div></div></div></div>
                <div><div><div><div><div><div><span>¥</span><span>到手价</span><span>1,299.00</span></div></div></div></div></div></div>
            </div>"#,
        );
        let engine = ExtractionEngine::new(Arc::new(TemplateRegistry::with_builtin().unwrap()));
        let records = engine
            .extract(&doc, "https://item.taobao.com/item.htm?id=652310254851")
            .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.template_id, "taobao");
        assert_eq!(record.get("title"), Some(&Value::Text("Stoneware Teapot".into())));
        assert_eq!(record.get("price").map(ToString::to_string).as_deref(), Some("¥1,299.00"));
        assert_eq!(record.get("itemId"), Some(&Value::Text("652310254851".into())));
        let names: Vec<&str> = record.fields.keys().map(String::as_str).collect();
        assert_eq!(names, ["title", "price", "itemId"]);
    }
}
