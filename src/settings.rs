//! User settings
//!
//! Each setting is stored under its own key in the key-value store, so a
//! partial update only rewrites the keys it names.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::info;

use crate::error::{SettingsError, StoreError, TemplateError};
use crate::history::{HistoryPolicy, DEFAULT_AUTO_CAPACITY, DEFAULT_RETENTION_DAYS};
use crate::registry::TemplateRegistry;
use crate::storage::KeyValueStore;
use crate::template::Template;

/// Store keys, one per `Settings` field.
pub const SETTING_KEYS: &[&str] = &[
    "autoCollect",
    "showNotifications",
    "storageDays",
    "maxHistoryItems",
    "enabledTemplates",
    "customTemplates",
];

/// Longest accepted retention window, in days
pub const MAX_STORAGE_DAYS: u32 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Accept collection requests that come from page loads
    pub auto_collect: bool,
    pub show_notifications: bool,
    /// Retention window of the auto log, in days
    pub storage_days: u32,
    /// Capacity of the auto log
    pub max_history_items: usize,
    /// Built-in template ids allowed to auto-collect
    pub enabled_templates: Vec<String>,
    /// User-defined templates, registered after the built-in ones
    pub custom_templates: Vec<Template>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_collect: false,
            show_notifications: true,
            storage_days: DEFAULT_RETENTION_DAYS,
            max_history_items: DEFAULT_AUTO_CAPACITY,
            enabled_templates: vec!["douyin".into(), "taobao".into(), "jd".into()],
            custom_templates: Vec::new(),
        }
    }
}

impl Settings {
    pub fn history_policy(&self) -> HistoryPolicy {
        HistoryPolicy::new(self.max_history_items, self.storage_days)
    }

    /// Whether `template_id` may auto-collect. Custom templates always may.
    pub fn is_enabled(&self, template_id: &str) -> bool {
        self.enabled_templates.iter().any(|id| id == template_id)
            || self.custom_templates.iter().any(|t| t.id == template_id)
    }

    /// Built-in templates followed by the custom ones.
    pub fn build_registry(&self) -> Result<TemplateRegistry, TemplateError> {
        let mut registry = TemplateRegistry::with_builtin()?;
        registry.register_all(self.custom_templates.iter().cloned())?;
        Ok(registry)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.max_history_items == 0 {
            return Err(SettingsError::OutOfRange {
                key: "maxHistoryItems",
                reason: "must be at least 1".into(),
            });
        }
        if self.storage_days > MAX_STORAGE_DAYS {
            return Err(SettingsError::OutOfRange {
                key: "storageDays",
                reason: format!("must be at most {MAX_STORAGE_DAYS}"),
            });
        }
        self.build_registry()?;
        Ok(())
    }
}

/// Reads and writes `Settings` through a key-value store.
#[derive(Clone)]
pub struct SettingsProvider {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsProvider {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Write defaults for keys that are not stored yet; existing values stay.
    pub fn ensure_defaults(&self) -> Result<(), SettingsError> {
        let stored = self.store.get(SETTING_KEYS)?;
        let missing: Map<String, JsonValue> = defaults()?
            .into_iter()
            .filter(|(key, _)| !stored.contains_key(key))
            .collect();
        if !missing.is_empty() {
            info!(keys = ?missing.keys().collect::<Vec<_>>(), "writing default settings");
            self.store.set(missing)?;
        }
        Ok(())
    }

    /// Current settings; keys never written fall back to defaults.
    pub fn get(&self) -> Result<Settings, SettingsError> {
        let mut merged = defaults()?;
        merged.extend(self.store.get(SETTING_KEYS)?);
        Ok(serde_json::from_value(JsonValue::Object(merged))?)
    }

    /// Apply a partial update and return the resulting settings.
    ///
    /// Unknown keys and invalid values reject the whole update; only the keys
    /// present in `partial` are written.
    pub fn update(&self, partial: Map<String, JsonValue>) -> Result<Settings, SettingsError> {
        if let Some(unknown) = partial.keys().find(|k| !SETTING_KEYS.contains(&k.as_str())) {
            return Err(SettingsError::UnknownKey(unknown.clone()));
        }

        let mut merged = match serde_json::to_value(self.get()?)? {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        merged.extend(partial.clone());
        let settings: Settings = serde_json::from_value(JsonValue::Object(merged))?;
        settings.validate()?;

        info!(keys = ?partial.keys().collect::<Vec<_>>(), "settings updated");
        self.store.set(partial)?;
        Ok(settings)
    }
}

fn defaults() -> Result<Map<String, JsonValue>, StoreError> {
    match serde_json::to_value(Settings::default())? {
        JsonValue::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}
