//! Extracted records
//!
//! A record is an ordered set of named values plus the stamps the engine adds
//! (source URL, capture time, template, page kind). Fields that came out empty
//! are never stored: a present key always means the field had content.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::template::PageKind;

/// Keys the persisted and exported forms use for stamps; templates may not
/// declare fields with these names.
pub const RESERVED_KEYS: &[&str] = &[
    "id",
    "url",
    "template",
    "pageKind",
    "capturedAt",
    "timestamp",
    "expiresAt",
];

/// A normalized field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    /// Numeric substring as it appeared (grouping kept) and the currency marker
    Currency { amount: String, symbol: String },
    List(Vec<String>),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Text(s) => s.is_empty(),
            Value::Currency { amount, .. } => amount.is_empty(),
            Value::List(items) => items.is_empty(),
        }
    }

    /// Scalar values export to CSV; lists do not.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::List(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Currency { amount, symbol } => write!(f, "{symbol}{amount}"),
            Value::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            other => serializer.collect_str(other),
        }
    }
}

/// Structured result of one extraction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "serde_json::Map<String, serde_json::Value>")]
pub struct Record {
    pub fields: IndexMap<String, Value>,
    pub source_url: String,
    pub captured_at: DateTime<Utc>,
    pub template_id: String,
    pub page_kind: PageKind,
}

impl Record {
    pub fn new(
        template_id: impl Into<String>,
        page_kind: PageKind,
        source_url: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            fields: IndexMap::new(),
            source_url: source_url.into(),
            captured_at,
            template_id: template_id.into(),
            page_kind,
        }
    }

    /// Store `value` under `name` unless it is absent or empty.
    ///
    /// Returns whether the field was stored.
    pub fn set(&mut self, name: impl Into<String>, value: Option<Value>) -> bool {
        match value {
            Some(v) if !v.is_empty() => {
                self.fields.insert(name.into(), v);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Write fields then stamps into an open map, so wrappers can add keys
    /// around them.
    pub(crate) fn serialize_entries<M: SerializeMap>(&self, map: &mut M) -> Result<(), M::Error> {
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry("url", &self.source_url)?;
        map.serialize_entry("template", &self.template_id)?;
        map.serialize_entry("pageKind", &self.page_kind)?;
        map.serialize_entry("capturedAt", &self.captured_at)?;
        Ok(())
    }

    /// Rebuild a record from its flat object form, ignoring `skip` keys.
    ///
    /// Stored currency values come back as text: the flat form keeps only
    /// their display string.
    ///
    /// With `stored_at` set, missing stamps are tolerated: `capturedAt`
    /// falls back to it and `url`/`template` to empty strings.
    pub(crate) fn from_object(
        object: serde_json::Map<String, serde_json::Value>,
        skip: &[&str],
        stored_at: Option<DateTime<Utc>>,
    ) -> Result<Self, RecordFormatError> {
        let mut fields = IndexMap::new();
        let mut source_url = None;
        let mut template_id = None;
        let mut page_kind = None;
        let mut captured_at = None;

        for (key, raw) in object {
            match key.as_str() {
                "url" => source_url = raw.as_str().map(String::from),
                "template" => template_id = raw.as_str().map(String::from),
                "pageKind" => {
                    page_kind = Some(
                        serde_json::from_value(raw)
                            .map_err(|e| RecordFormatError(format!("pageKind: {e}")))?,
                    )
                }
                "capturedAt" => {
                    captured_at = Some(
                        serde_json::from_value(raw)
                            .map_err(|e| RecordFormatError(format!("capturedAt: {e}")))?,
                    )
                }
                k if skip.contains(&k) => {}
                _ => {
                    if let Some(value) = value_from_json(raw) {
                        fields.insert(key, value);
                    }
                }
            }
        }

        let lenient = stored_at.is_some();
        let stamp = |value: Option<String>, key: &str| match value {
            Some(v) => Ok(v),
            None if lenient => Ok(String::new()),
            None => Err(RecordFormatError(format!("missing {key}"))),
        };

        Ok(Self {
            fields,
            source_url: stamp(source_url, "url")?,
            captured_at: captured_at
                .or(stored_at)
                .ok_or_else(|| RecordFormatError("missing capturedAt".into()))?,
            template_id: stamp(template_id, "template")?,
            page_kind: page_kind.unwrap_or(PageKind::Unknown),
        })
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 4))?;
        self.serialize_entries(&mut map)?;
        map.end()
    }
}

impl TryFrom<serde_json::Map<String, serde_json::Value>> for Record {
    type Error = RecordFormatError;

    fn try_from(object: serde_json::Map<String, serde_json::Value>) -> Result<Self, Self::Error> {
        Record::from_object(object, &[], None)
    }
}

fn value_from_json(raw: serde_json::Value) -> Option<Value> {
    let value = match raw {
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Number(n) => Value::Text(n.to_string()),
        serde_json::Value::Bool(b) => Value::Text(b.to_string()),
        serde_json::Value::Array(items) => Value::List(
            items
                .into_iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

/// A persisted record object that cannot be read back.
#[derive(Debug, Error)]
#[error("malformed record: {0}")]
pub struct RecordFormatError(pub String);
