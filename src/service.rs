//! Command surface
//!
//! `Collector` owns the settings, the extraction engine and both history
//! logs, and answers JSON commands of the form `{"action": "...", ...}` with
//! `{"success": bool, "data"?: ..., "error"?: "..."}`.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::classifier;
use crate::document::HtmlDocument;
use crate::engine::ExtractionEngine;
use crate::error::{Error, Result};
use crate::export::{self, ExportFormat};
use crate::history::{
    HistoryEntry, HistoryPolicy, HistoryStore, AUTO_HISTORY_KEY, SESSION_HISTORY_KEY,
};
use crate::record::Record;
use crate::settings::SettingsProvider;
use crate::storage::{JsonFileStore, KeyValueStore, MemoryStore};

/// Who asked for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectSource {
    /// Explicit user request; goes to the main log
    #[default]
    Manual,
    /// Page-load trigger; honors `autoCollect` and `enabledTemplates`
    Auto,
    /// Popup request; goes to the session log
    Popup,
}

/// Which history log a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryLog {
    #[default]
    Auto,
    Session,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    CollectData {
        url: String,
        html: String,
        /// Skip URL classification and use this template
        #[serde(default)]
        template: Option<String>,
        #[serde(default)]
        source: CollectSource,
    },
    /// Store an already extracted record in the main log
    SaveData { record: Record },
    GetSettings,
    UpdateSettings { settings: Map<String, JsonValue> },
    ExportData {
        #[serde(default = "default_export_format")]
        format: String,
        #[serde(default)]
        log: HistoryLog,
    },
    GetHistory {
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        log: HistoryLog,
    },
    ClearHistory {
        #[serde(default)]
        log: HistoryLog,
    },
    /// Sweep expired entries from both logs
    Cleanup,
}

fn default_export_format() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: JsonValue) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Result of a `collectData` command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectOutcome {
    pub supported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub records: Vec<HistoryEntry>,
    /// Why nothing was collected for a supported site
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<&'static str>,
}

pub struct Collector {
    settings: SettingsProvider,
    engine: RwLock<Arc<ExtractionEngine>>,
    auto_history: HistoryStore,
    session_history: HistoryStore,
}

impl Collector {
    /// Load settings (writing defaults for missing keys), build the template
    /// registry and sweep expired history.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let settings = SettingsProvider::new(store.clone());
        settings.ensure_defaults()?;
        let current = settings.get()?;
        let engine = ExtractionEngine::new(Arc::new(current.build_registry()?));

        let collector = Self {
            settings,
            engine: RwLock::new(Arc::new(engine)),
            auto_history: HistoryStore::new(store.clone(), AUTO_HISTORY_KEY, current.history_policy()),
            session_history: HistoryStore::new(store, SESSION_HISTORY_KEY, HistoryPolicy::session()),
        };
        let removed = collector.cleanup(Utc::now())?;
        info!(templates = collector.engine()?.registry().len(), removed, "collector ready");
        Ok(collector)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Collector persisted to a JSON file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(Arc::new(JsonFileStore::new(path)))
    }

    pub fn engine(&self) -> Result<Arc<ExtractionEngine>> {
        Ok(self.engine.read().map_err(|_| Error::Poisoned)?.clone())
    }

    pub fn history(&self, log: HistoryLog) -> &HistoryStore {
        match log {
            HistoryLog::Auto => &self.auto_history,
            HistoryLog::Session => &self.session_history,
        }
    }

    /// Parse and run one JSON command. Always returns a JSON response.
    pub fn handle_json(&self, request: &str) -> String {
        let response = match serde_json::from_str::<Command>(request) {
            Ok(command) => self.handle(command),
            Err(e) => Response::err(Error::InvalidCommand(e.to_string())),
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(r#"{{"success":false,"error":"failed to encode response: {e}"}}"#)
        })
    }

    pub fn handle(&self, command: Command) -> Response {
        match self.dispatch(command) {
            Ok(data) => Response::ok(data),
            Err(e) => {
                warn!(error = %e, "command failed");
                Response::err(e)
            }
        }
    }

    fn dispatch(&self, command: Command) -> Result<JsonValue> {
        match command {
            Command::CollectData {
                url,
                html,
                template,
                source,
            } => Ok(serde_json::to_value(self.collect(&url, &html, template.as_deref(), source)?)?),
            Command::SaveData { record } => Ok(serde_json::to_value(self.auto_history.insert(record)?)?),
            Command::GetSettings => Ok(serde_json::to_value(self.settings.get()?)?),
            Command::UpdateSettings { settings } => self.update_settings(settings),
            Command::ExportData { format, log } => self.export(&format, log),
            Command::GetHistory { limit, log } => Ok(serde_json::to_value(self.history(log).list(limit)?)?),
            Command::ClearHistory { log } => {
                self.history(log).clear()?;
                Ok(json!({ "cleared": self.history(log).key() }))
            }
            Command::Cleanup => Ok(json!({ "removed": self.cleanup(Utc::now())? })),
        }
    }

    /// Extract records from `html` and store them in the log for `source`.
    pub fn collect(
        &self,
        url: &str,
        html: &str,
        template_hint: Option<&str>,
        source: CollectSource,
    ) -> Result<CollectOutcome> {
        let engine = self.engine()?;
        let template_id = match template_hint {
            Some(id) => Some(id.to_string()),
            None => classifier::classify_id(engine.registry(), url).map(String::from),
        };
        let Some(template_id) = template_id else {
            debug!(url, "unsupported site");
            return Ok(CollectOutcome {
                supported: false,
                template: None,
                records: Vec::new(),
                skipped: None,
            });
        };

        if source == CollectSource::Auto {
            let settings = self.settings.get()?;
            let skipped = if !settings.auto_collect {
                Some("auto collection is disabled")
            } else if !settings.is_enabled(&template_id) {
                Some("template is not enabled")
            } else {
                None
            };
            if let Some(reason) = skipped {
                debug!(url, template = %template_id, reason, "auto collection skipped");
                return Ok(CollectOutcome {
                    supported: true,
                    template: Some(template_id),
                    records: Vec::new(),
                    skipped,
                });
            }
        }

        let document = HtmlDocument::parse(html);
        let records = engine.extract_with_template(&document, url, &template_id)?;

        let log = match source {
            CollectSource::Popup => &self.session_history,
            CollectSource::Manual | CollectSource::Auto => &self.auto_history,
        };
        let stored = records
            .into_iter()
            .map(|record| log.insert(record))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        info!(url, template = %template_id, records = stored.len(), log = log.key(), "collected");

        Ok(CollectOutcome {
            supported: true,
            template: Some(template_id),
            records: stored,
            skipped: None,
        })
    }

    /// Sweep both logs as of `now`; returns the total removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.auto_history.sweep_expired(now)? + self.session_history.sweep_expired(now)?)
    }

    fn update_settings(&self, partial: Map<String, JsonValue>) -> Result<JsonValue> {
        let templates_changed = partial.contains_key("customTemplates");
        let settings = self.settings.update(partial)?;
        self.auto_history.reconfigure(settings.history_policy())?;

        if templates_changed {
            let engine = ExtractionEngine::new(Arc::new(settings.build_registry()?));
            *self.engine.write().map_err(|_| Error::Poisoned)? = Arc::new(engine);
            info!(templates = settings.custom_templates.len(), "custom templates reloaded");
        }
        Ok(serde_json::to_value(settings)?)
    }

    fn export(&self, format: &str, log: HistoryLog) -> Result<JsonValue> {
        let parsed: ExportFormat = format.parse().map_err(Error::Export)?;
        let entries = self.history(log).list(None)?;
        let content = export::export(&entries, format)?;
        let file_name = format!(
            "page-harvest-{}.{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            parsed.extension()
        );
        Ok(json!({
            "format": parsed.to_string(),
            "mimeType": parsed.mime_type(),
            "fileName": file_name,
            "count": entries.len(),
            "content": content,
        }))
    }
}
