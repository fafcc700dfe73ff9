//! Template-driven record extraction for e-commerce pages
//!
//! Given an already rendered HTML document and its URL:
//! - picks the site template that claims the URL
//! - classifies the page as detail, listing or stream
//! - resolves each field through prioritized CSS / XPath locators
//! - normalizes text, attributes, prices and collections into records
//! - keeps records in bounded, time-retained history logs
//! - exports history as JSON or CSV
//!
//! Hosts drive it through `Collector` (JSON commands) or the C FFI.

pub mod classifier;
pub mod document;
pub mod engine;
pub mod error;
pub mod export;
pub mod ffi;
pub mod history;
pub mod locator;
pub mod logging;
pub mod normalizer;
pub mod record;
pub mod registry;
pub mod service;
pub mod settings;
pub mod storage;
pub mod template;

pub use document::{Document, HtmlDocument};
pub use engine::ExtractionEngine;
pub use error::{Error, Result};
pub use export::ExportFormat;
pub use ffi::*;
pub use history::{HistoryEntry, HistoryPolicy, HistoryStore};
pub use locator::{Locator, LocatorKind};
pub use record::{Record, Value};
pub use registry::TemplateRegistry;
pub use service::{Collector, Command, Response};
pub use settings::{Settings, SettingsProvider};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};
pub use template::{ExtractKind, FieldRule, PageKind, Template};
