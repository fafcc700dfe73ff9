//! Site and page-kind classification

use tracing::debug;
use url::Url;

use crate::document::Document;
use crate::registry::TemplateRegistry;
use crate::template::{PageKind, Template};

/// Find the template that claims `url`.
///
/// Templates are tried in registration order and the first match wins.
/// `None` means the site is unsupported, which is not an error; URLs that do
/// not parse or have no host are unsupported too.
pub fn classify<'r>(registry: &'r TemplateRegistry, url: &str) -> Option<&'r Template> {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(url, error = %e, "unparseable url, treating as unsupported");
            return None;
        }
    };
    let host = parsed.host_str()?.to_ascii_lowercase();
    let path = parsed.path();

    let found = registry.all().iter().find(|t| t.matches_url(&host, path));
    if found.is_none() {
        debug!(url, host = %host, "no template claims this site");
    }
    found
}

/// Id of the template that claims `url`, if any.
pub fn classify_id<'r>(registry: &'r TemplateRegistry, url: &str) -> Option<&'r str> {
    classify(registry, url).map(|t| t.id.as_str())
}

/// Decide what kind of page `document` is under `template`.
///
/// Priority is fixed: detail, then listing, then stream.
pub fn classify_page_kind<D: Document>(document: &D, template: &Template) -> PageKind {
    template
        .page_classifiers
        .in_priority_order()
        .into_iter()
        .find_map(|(kind, predicate)| predicate.filter(|p| p.eval(document)).map(|_| kind))
        .unwrap_or(PageKind::Unknown)
}
