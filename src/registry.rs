//! Template registry
//!
//! Built once at load time, then shared read-only (behind `Arc`) by every
//! extraction. Registration order is classification order.

use tracing::{debug, warn};

use crate::error::TemplateError;
use crate::locator::xpath::PathExpr;
use crate::locator::{Locator, LocatorKind};
use crate::template::Template;

const BUILTIN_TEMPLATES: &str = include_str!("builtin_templates.json");

#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: Vec<Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the bundled site templates.
    pub fn with_builtin() -> Result<Self, TemplateError> {
        let mut registry = Self::new();
        registry.register_all(builtin_templates()?)?;
        Ok(registry)
    }

    /// Validate and add `template`; ids must be unique.
    pub fn register(&mut self, template: Template) -> Result<(), TemplateError> {
        template.validate()?;
        if self.templates.iter().any(|t| t.id == template.id) {
            return Err(TemplateError::Duplicate(template.id));
        }
        lint_locators(&template);
        debug!(template = %template.id, fields = template.fields.len(), "registered template");
        self.templates.push(template);
        Ok(())
    }

    pub fn register_all(
        &mut self,
        templates: impl IntoIterator<Item = Template>,
    ) -> Result<(), TemplateError> {
        for template in templates {
            self.register(template)?;
        }
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Result<&Template, TemplateError> {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    /// Every template, in registration order.
    pub fn all(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Parse the bundled template definitions.
pub fn builtin_templates() -> Result<Vec<Template>, TemplateError> {
    parse_templates(BUILTIN_TEMPLATES)
}

/// Parse a JSON array of template definitions.
pub fn parse_templates(json: &str) -> Result<Vec<Template>, TemplateError> {
    serde_json::from_str(json).map_err(|e| TemplateError::Parse(e.to_string()))
}

/// Malformed locators only degrade their field at extraction time, but a
/// template author should hear about them at load time.
fn lint_locators(template: &Template) {
    let locators = template
        .fields
        .iter()
        .flat_map(|f| f.locators.iter())
        .chain(template.list_item_selector.iter());
    for locator in locators {
        if let Err(reason) = check_locator(locator) {
            warn!(template = %template.id, expression = %locator.expression, %reason, "locator will never match");
        }
    }
}

fn check_locator(locator: &Locator) -> Result<(), String> {
    match locator.kind {
        LocatorKind::Selector => scraper::Selector::parse(&locator.expression)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        LocatorKind::PathExpression => PathExpr::compile(&locator.expression)
            .map(|_| ())
            .map_err(|e| e.to_string()),
    }
}
