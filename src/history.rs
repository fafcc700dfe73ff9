//! Bounded, time-retained history logs
//!
//! Each log is one JSON array under its own key in the key-value store,
//! newest first. Inserts evict from the tail past capacity; expired entries
//! are only removed by an explicit sweep.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::record::{Record, RecordFormatError};
use crate::storage::KeyValueStore;

/// Store key of the log fed by collection commands
pub const AUTO_HISTORY_KEY: &str = "dataHistory";
/// Store key of the short log shown for the current session
pub const SESSION_HISTORY_KEY: &str = "sessionHistory";

pub const DEFAULT_AUTO_CAPACITY: usize = 100;
pub const DEFAULT_SESSION_CAPACITY: usize = 50;
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Capacity and retention window of one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPolicy {
    pub capacity: usize,
    pub retention: Duration,
}

impl HistoryPolicy {
    pub fn new(capacity: usize, retention_days: u32) -> Self {
        Self {
            capacity,
            retention: Duration::days(i64::from(retention_days)),
        }
    }

    pub fn auto() -> Self {
        Self::new(DEFAULT_AUTO_CAPACITY, DEFAULT_RETENTION_DAYS)
    }

    pub fn session() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY, DEFAULT_RETENTION_DAYS)
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, JsonValue>")]
pub struct HistoryEntry {
    /// Epoch milliseconds at insert, bumped past the previous head on ties
    pub id: u64,
    pub record: Record,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Serialize for HistoryEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.id)?;
        self.record.serialize_entries(&mut map)?;
        map.serialize_entry("timestamp", &self.stored_at)?;
        map.serialize_entry("expiresAt", &self.expires_at)?;
        map.end()
    }
}

impl HistoryEntry {
    /// Rebuild an entry from its persisted object.
    ///
    /// Entries written as `{id, ...fields, timestamp}` only are still
    /// readable: their deadline is `timestamp + retention` and the missing
    /// record stamps are defaulted.
    pub(crate) fn from_stored(
        object: Map<String, JsonValue>,
        retention: Duration,
    ) -> Result<Self, RecordFormatError> {
        let id = object
            .get("id")
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| RecordFormatError("missing id".into()))?;
        let stamp = |key: &str| -> Result<Option<DateTime<Utc>>, RecordFormatError> {
            object
                .get(key)
                .cloned()
                .map(|raw| {
                    serde_json::from_value(raw).map_err(|e| RecordFormatError(format!("{key}: {e}")))
                })
                .transpose()
        };
        let stored_at =
            stamp("timestamp")?.ok_or_else(|| RecordFormatError("missing timestamp".into()))?;
        let expires_at = match stamp("expiresAt")? {
            Some(deadline) => deadline,
            None => stored_at
                .checked_add_signed(retention)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        let record = Record::from_object(object, &["id", "timestamp", "expiresAt"], Some(stored_at))?;
        Ok(Self {
            id,
            record,
            stored_at,
            expires_at,
        })
    }
}

impl TryFrom<Map<String, JsonValue>> for HistoryEntry {
    type Error = RecordFormatError;

    fn try_from(object: Map<String, JsonValue>) -> Result<Self, Self::Error> {
        Self::from_stored(object, Duration::days(i64::from(DEFAULT_RETENTION_DAYS)))
    }
}

/// One history log over a shared key-value store.
///
/// Mutations are read-modify-write of the whole log under the write lock;
/// `list` takes the read lock. A write that fails to persist leaves the
/// stored log as it was.
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
    policy: RwLock<HistoryPolicy>,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, policy: HistoryPolicy) -> Self {
        Self {
            store,
            key: key.into(),
            policy: RwLock::new(policy),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> Result<HistoryPolicy, StoreError> {
        Ok(*self.policy.read().map_err(|_| StoreError::Poisoned)?)
    }

    /// Apply a new policy. A smaller capacity takes effect on the next insert.
    pub fn reconfigure(&self, policy: HistoryPolicy) -> Result<(), StoreError> {
        let mut current = self.policy.write().map_err(|_| StoreError::Poisoned)?;
        if *current != policy {
            info!(key = %self.key, capacity = policy.capacity, retention_days = policy.retention.num_days(), "history policy changed");
        }
        *current = policy;
        Ok(())
    }

    pub fn insert(&self, record: Record) -> Result<HistoryEntry, StoreError> {
        self.insert_at(record, Utc::now())
    }

    /// Prepend `record` as of `now`, evicting the oldest entries past capacity.
    pub fn insert_at(&self, record: Record, now: DateTime<Utc>) -> Result<HistoryEntry, StoreError> {
        let policy = self.policy.write().map_err(|_| StoreError::Poisoned)?;
        let expires_at = now
            .checked_add_signed(policy.retention)
            .ok_or(StoreError::RetentionOutOfRange {
                days: policy.retention.num_days(),
            })?;
        let mut entries = self.load(policy.retention)?;

        let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let id = match entries.first() {
            Some(head) if head.id >= now_ms => head.id + 1,
            _ => now_ms,
        };
        let entry = HistoryEntry {
            id,
            record,
            stored_at: now,
            expires_at,
        };
        entries.insert(0, entry.clone());

        if entries.len() > policy.capacity {
            let evicted = entries.len() - policy.capacity;
            entries.truncate(policy.capacity);
            info!(key = %self.key, evicted, capacity = policy.capacity, "history over capacity, evicted oldest");
        }

        self.save(&entries)?;
        Ok(entry)
    }

    /// Remove entries whose deadline is at or before `now`.
    ///
    /// Deadlines are not ordered once the retention window has changed, so
    /// the whole log is scanned.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let policy = self.policy.write().map_err(|_| StoreError::Poisoned)?;
        let mut entries = self.load(policy.retention)?;

        let before = entries.len();
        entries.retain(|e| e.expires_at > now);
        let removed = before - entries.len();

        if removed > 0 {
            self.save(&entries)?;
            info!(key = %self.key, removed, "expired history swept");
        }
        Ok(removed)
    }

    /// Newest-first entries, at most `limit` of them.
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>, StoreError> {
        let policy = self.policy.read().map_err(|_| StoreError::Poisoned)?;
        let mut entries = self.load(policy.retention)?;
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.list(None)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let _policy = self.policy.write().map_err(|_| StoreError::Poisoned)?;
        self.save(&[])?;
        info!(key = %self.key, "history cleared");
        Ok(())
    }

    fn load(&self, retention: Duration) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut found = self.store.get(&[self.key.as_str()])?;
        let items = match found.remove(&self.key) {
            None | Some(JsonValue::Null) => return Ok(Vec::new()),
            Some(JsonValue::Array(items)) => items,
            Some(other) => {
                return Err(StoreError::Corrupt {
                    key: self.key.clone(),
                    reason: format!("expected an array, found {other}"),
                })
            }
        };

        Ok(items
            .into_iter()
            .filter_map(|item| match entry_from_json(item, retention) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(key = %self.key, error = %e, "dropping unreadable history entry");
                    None
                }
            })
            .collect())
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<(), StoreError> {
        let mut update = Map::new();
        update.insert(self.key.clone(), serde_json::to_value(entries)?);
        self.store.set(update)
    }
}

fn entry_from_json(item: JsonValue, retention: Duration) -> Result<HistoryEntry, RecordFormatError> {
    match item {
        JsonValue::Object(object) => HistoryEntry::from_stored(object, retention),
        other => Err(RecordFormatError(format!("expected an object, found {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::storage::testing::FlakyStore;
    use crate::storage::MemoryStore;
    use crate::template::PageKind;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn record(title: &str) -> Record {
        let mut r = Record::new("shop", PageKind::Detail, format!("https://shop.example/{title}"), at(0));
        r.set("title", Some(Value::Text(title.into())));
        r
    }

    fn titles(store: &HistoryStore) -> Vec<String> {
        store
            .list(None)
            .unwrap()
            .iter()
            .map(|e| e.record.get("title").unwrap().to_string())
            .collect()
    }

    fn log(capacity: usize, retention_days: u32) -> HistoryStore {
        HistoryStore::new(
            Arc::new(MemoryStore::new()),
            AUTO_HISTORY_KEY,
            HistoryPolicy::new(capacity, retention_days),
        )
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = log(3, 30);
        for (i, t) in ["a", "b", "c", "d"].into_iter().enumerate() {
            store.insert_at(record(t), at(i as i64)).unwrap();
        }
        assert_eq!(titles(&store), ["d", "c", "b"]);
    }

    #[test]
    fn test_ids_strictly_increase() {
        let store = log(10, 30);
        let first = store.insert_at(record("a"), at(5)).unwrap();
        let same_ms = store.insert_at(record("b"), at(5)).unwrap();
        let clock_back = store.insert_at(record("c"), at(1)).unwrap();
        assert_eq!(same_ms.id, first.id + 1);
        assert_eq!(clock_back.id, first.id + 2);
        assert_eq!(first.id, at(5).timestamp_millis() as u64);
    }

    #[test]
    fn test_sweep_with_zero_retention() {
        let store = log(10, 0);
        store.insert_at(record("a"), at(0)).unwrap();
        store.insert_at(record("b"), at(1)).unwrap();

        assert_eq!(store.sweep_expired(at(1)).unwrap(), 2);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_sweep_keeps_live_entries() {
        let store = log(10, 1);
        store.insert_at(record("old"), at(0)).unwrap();
        store.insert_at(record("new"), at(86_400)).unwrap();

        assert_eq!(store.sweep_expired(at(86_400)).unwrap(), 1);
        assert_eq!(titles(&store), ["new"]);
        assert_eq!(store.sweep_expired(at(86_400)).unwrap(), 0);
    }

    #[test]
    fn test_sweep_after_retention_shrinks() {
        let store = log(10, 30);
        store.insert_at(record("old"), at(0)).unwrap();
        store.reconfigure(HistoryPolicy::new(10, 1)).unwrap();
        store.insert_at(record("new"), at(60)).unwrap();

        // "new" expires first although it sits nearer the head
        assert_eq!(store.sweep_expired(at(2 * 86_400)).unwrap(), 1);
        assert_eq!(titles(&store), ["old"]);
    }

    #[test]
    fn test_retention_past_date_range_is_an_error() {
        let store = log(10, u32::MAX);
        assert!(matches!(
            store.insert_at(record("a"), at(0)),
            Err(StoreError::RetentionOutOfRange { .. })
        ));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_reads_entries_without_stamps() {
        let kv = Arc::new(MemoryStore::new());
        let mut seeded = Map::new();
        seeded.insert(
            AUTO_HISTORY_KEY.into(),
            serde_json::json!([{"id": 1717200000000u64, "title": "legacy", "timestamp": "2024-06-01T00:00:00Z"}]),
        );
        kv.set(seeded).unwrap();
        let store = HistoryStore::new(kv, AUTO_HISTORY_KEY, HistoryPolicy::new(10, 7));

        let listed = store.list(None).unwrap();
        assert_eq!(listed.len(), 1);
        let legacy = &listed[0];
        assert_eq!(legacy.record.get("title"), Some(&Value::Text("legacy".into())));
        assert_eq!(legacy.record.captured_at, at(0));
        assert_eq!(legacy.record.source_url, "");
        assert_eq!(legacy.expires_at, at(7 * 86_400));

        store.insert_at(record("fresh"), at(10)).unwrap();
        assert_eq!(titles(&store), ["fresh", "legacy"]);
        assert_eq!(store.sweep_expired(at(7 * 86_400)).unwrap(), 1);
        assert_eq!(titles(&store), ["fresh"]);
    }

    #[test]
    fn test_failed_persist_leaves_log_unchanged() {
        let kv = Arc::new(FlakyStore::default());
        let store = HistoryStore::new(kv.clone(), AUTO_HISTORY_KEY, HistoryPolicy::new(5, 30));
        store.insert_at(record("kept"), at(0)).unwrap();

        kv.fail_writes(true);
        assert!(matches!(store.insert_at(record("lost"), at(1)), Err(StoreError::Io(_))));
        assert!(store.clear().is_err());
        assert_eq!(titles(&store), ["kept"]);
    }

    #[test]
    fn test_persisted_layout() {
        let kv = Arc::new(MemoryStore::new());
        let store = HistoryStore::new(kv.clone(), AUTO_HISTORY_KEY, HistoryPolicy::auto());
        store.insert_at(record("mug"), at(0)).unwrap();

        let raw = kv.get(&[AUTO_HISTORY_KEY]).unwrap();
        let first = &raw[AUTO_HISTORY_KEY][0];
        let keys: Vec<&String> = first.as_object().unwrap().keys().collect();
        assert_eq!(
            keys,
            ["id", "title", "url", "template", "pageKind", "capturedAt", "timestamp", "expiresAt"]
        );
        assert_eq!(first["expiresAt"], "2024-07-01T00:00:00Z");
    }

    #[test]
    fn test_reconfigure_shrinks_on_next_insert() {
        let store = log(5, 30);
        for i in 0..5 {
            store.insert_at(record(&i.to_string()), at(i)).unwrap();
        }
        store.reconfigure(HistoryPolicy::new(2, 30)).unwrap();
        assert_eq!(store.len().unwrap(), 5);

        store.insert_at(record("5"), at(5)).unwrap();
        assert_eq!(titles(&store), ["5", "4"]);
        assert_eq!(store.list(Some(1)).unwrap().len(), 1);
    }
}
