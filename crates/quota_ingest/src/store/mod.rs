//! The canonical in-memory summary map and the document-store adapters
//! behind it.
//!
//! `SummaryStore` owns every `Summary`. Handlers borrow one mutably for the
//! duration of a single packet (under the map's writer lock) and publish
//! through the store afterwards; they never retain references across publish
//! boundaries. The external store is reached through the [`DocumentStore`]
//! trait so that tests and local development can run against
//! [`MemoryStore`] while production uses [`RedisJsonStore`].

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisJsonStore;

use crate::area::AreaMap;
use crate::error::FeedError;
use crate::summary::{company_key, summary_key, Summary, COMPANY_AREA, KEY_PREFIX};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Field type in the search index schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Full-text field.
    Text,
    /// Tag field (exact-match tokens).
    Tag,
}

/// One field of a search index schema.
#[derive(Debug, Clone, Copy)]
pub struct IndexField {
    /// JSON path inside the document.
    pub json_path: &'static str,
    /// Name the field is queried under.
    pub alias: &'static str,
    /// How the field is indexed.
    pub kind: IndexKind,
}

/// Name of the summary search index.
pub const OUTPUT_INDEX: &str = "outputIdx";

/// Schema of the summary search index: identity as text, branches as tags.
pub const OUTPUT_INDEX_SCHEMA: [IndexField; 3] = [
    IndexField {
        json_path: "$.stock_id",
        alias: "stock_id",
        kind: IndexKind::Text,
    },
    IndexField {
        json_path: "$.area_center",
        alias: "area_center",
        kind: IndexKind::Text,
    },
    IndexField {
        json_path: "$.belong_branches.*",
        alias: "branches",
        kind: IndexKind::Tag,
    },
];

/// Synchronous JSON-document store interface.
///
/// `get_json` follows the RedisJSON convention for the `"$"` path: the reply
/// is a JSON array holding the matched documents (one, for whole-document
/// reads).
pub trait DocumentStore: Send + Sync {
    /// Reads the JSON at `path` inside the document under `key`.
    fn get_json(&self, key: &str, path: &str) -> Result<String, FeedError>;
    /// Writes the JSON at `path` inside the document under `key`.
    fn set_json(&self, key: &str, path: &str, json: &str) -> Result<(), FeedError>;
    /// Deletes the document under `key`.
    fn del(&self, key: &str) -> Result<(), FeedError>;
    /// Lists keys matching a glob pattern.
    fn keys(&self, pattern: &str) -> Result<Vec<String>, FeedError>;
    /// Creates a search index over documents with the given key prefix.
    fn create_index(
        &self,
        name: &str,
        prefix: &str,
        schema: &[IndexField],
    ) -> Result<(), FeedError>;
    /// Drops a search index, leaving the documents in place.
    fn drop_index(&self, name: &str) -> Result<(), FeedError>;
}

/// Cache-through store of quota summaries.
///
/// A single reader/writer lock guards the whole map: the consumer thread is
/// the only writer, and the lock keeps read probes (rollup computation,
/// health checks) consistent without per-key locking.
pub struct SummaryStore {
    store: Arc<dyn DocumentStore>,
    cache: RwLock<HashMap<String, Summary>>,
    areas: Arc<AreaMap>,
}

impl SummaryStore {
    pub fn new(store: Arc<dyn DocumentStore>, areas: Arc<AreaMap>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            areas,
        }
    }

    /// Startup: optionally bootstrap the search index, then load the
    /// existing snapshot. Errors here are fatal.
    pub fn init(&self, bootstrap_index: bool) -> Result<(), FeedError> {
        if bootstrap_index {
            self.ensure_index()?;
        }
        self.load_all()
    }

    /// Ensures the summary search index exists. When creation reports that
    /// the index is already there, it is dropped and recreated so schema
    /// changes take effect.
    pub fn ensure_index(&self) -> Result<(), FeedError> {
        match self
            .store
            .create_index(OUTPUT_INDEX, KEY_PREFIX, &OUTPUT_INDEX_SCHEMA)
        {
            Ok(()) => {
                info!(index = OUTPUT_INDEX, "search index created");
                Ok(())
            }
            Err(FeedError::CommandFailed(msg))
                if msg.to_ascii_lowercase().contains("already exists") =>
            {
                warn!(index = OUTPUT_INDEX, "index exists, dropping and recreating");
                self.store.drop_index(OUTPUT_INDEX)?;
                self.store
                    .create_index(OUTPUT_INDEX, KEY_PREFIX, &OUTPUT_INDEX_SCHEMA)?;
                info!(index = OUTPUT_INDEX, "search index recreated");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Replaces the cache with every `summary:*` document in the store.
    /// Individual malformed documents are skipped; a failed key listing is
    /// fatal.
    pub fn load_all(&self) -> Result<(), FeedError> {
        let keys = self
            .store
            .keys(&format!("{KEY_PREFIX}*"))
            .map_err(|e| FeedError::LoadFailed(e.to_string()))?;

        let mut cache = self.write_cache();
        cache.clear();
        let mut loaded = 0usize;
        for key in keys {
            let json = match self.store.get_json(&key, "$") {
                Ok(json) => json,
                Err(e) => {
                    warn!(key = %key, error = %e, "snapshot read failed, skipping");
                    continue;
                }
            };
            match parse_document(&json) {
                Ok(summary) => {
                    cache.insert(key, summary);
                    loaded += 1;
                }
                Err(e) => warn!(key = %key, error = %e, "snapshot parse failed, skipping"),
            }
        }
        info!(loaded, cached = cache.len(), "summary snapshot loaded");
        Ok(())
    }

    /// Applies `f` to the summary under `key`, creating an empty one on
    /// first reference. The mutation runs against a draft: when `f` fails,
    /// the cached summary is left exactly as it was. Returns the updated
    /// summary for publishing.
    pub fn try_mutate<E>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Summary) -> Result<(), E>,
    ) -> Result<Summary, E> {
        let mut cache = self.write_cache();
        let entry = cache.entry(key.to_string()).or_default();
        let mut draft = entry.clone();
        f(&mut draft)?;
        *entry = draft.clone();
        Ok(draft)
    }

    /// Overwrites the summary under `key` and publishes it.
    pub fn set(&self, key: &str, summary: Summary) -> Result<(), FeedError> {
        self.write_cache().insert(key.to_string(), summary.clone());
        self.sync(key, &summary)
    }

    /// Publishes a summary document under `key`. The cache is not touched;
    /// callers mutate first via [`try_mutate`](SummaryStore::try_mutate).
    pub fn sync(&self, key: &str, summary: &Summary) -> Result<(), FeedError> {
        let json = serde_json::to_string(summary)
            .map_err(|e| FeedError::Parse(format!("serialize {key}: {e}")))?;
        self.store.set_json(key, "$", &json)?;
        debug!(key = %key, "published");
        Ok(())
    }

    /// Recomputes and publishes the company rollup for `stock_id`: the
    /// componentwise sum of every cached area summary for that stock, under
    /// `summary:ALL:<stock_id>`, carrying the union of all branches.
    ///
    /// Computed under the writer lock so the rollup observes a consistent
    /// snapshot across the area keys.
    pub fn update_company_rollup(&self, stock_id: &str) -> Result<(), FeedError> {
        let all_key = company_key(stock_id);
        let rollup = {
            let mut cache = self.write_cache();

            let mut company = Summary {
                stock_id: stock_id.to_string(),
                area_center: COMPANY_AREA.to_string(),
                belong_branches: self.areas.all_branches(),
                ..Summary::default()
            };
            for office in self.areas.back_office_ids() {
                let key = summary_key(office, stock_id);
                if let Some(area_summary) = cache.get(&key) {
                    company.accumulate(area_summary).map_err(|e| {
                        FeedError::Unexpected(format!("company rollup for {stock_id}: {e}"))
                    })?;
                }
            }

            cache.insert(all_key.clone(), company.clone());
            company
        };
        self.sync(&all_key, &rollup)
    }

    /// Deletes a summary from both the cache and the external store.
    pub fn remove(&self, key: &str) -> Result<(), FeedError> {
        self.store.del(key)?;
        self.write_cache().remove(key);
        Ok(())
    }

    /// Read probe: a clone of the cached summary under `key`.
    pub fn get(&self, key: &str) -> Option<Summary> {
        self.read_cache().get(key).cloned()
    }

    /// Number of cached summaries.
    pub fn len(&self) -> usize {
        self.read_cache().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.read_cache().is_empty()
    }

    /// The area mapping this store was built with.
    pub fn areas(&self) -> &AreaMap {
        &self.areas
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Summary>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Summary>> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parses a whole-document `get_json` reply: an array of one object.
fn parse_document(json: &str) -> Result<Summary, FeedError> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| FeedError::Parse(e.to_string()))?;
    let doc = match value {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.remove(0),
        serde_json::Value::Array(_) => {
            return Err(FeedError::Parse("empty document array".into()))
        }
        other => other,
    };
    serde_json::from_value(doc).map_err(|e| FeedError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::QuotaInputs;

    fn areas() -> Arc<AreaMap> {
        Arc::new(
            AreaMap::from_json(r#"{ "A01": ["8801", "8802"], "A02": ["8810"] }"#).unwrap(),
        )
    }

    fn store_pair() -> (Arc<MemoryStore>, SummaryStore) {
        let mem = Arc::new(MemoryStore::new());
        let summaries = SummaryStore::new(Arc::clone(&mem) as Arc<dyn DocumentStore>, areas());
        (mem, summaries)
    }

    fn area_summary(area: &str, stock: &str, margin_qty: i64) -> Summary {
        let mut s = Summary {
            stock_id: stock.into(),
            area_center: area.into(),
            inputs: QuotaInputs {
                margin_qty,
                ..QuotaInputs::default()
            },
            ..Summary::default()
        };
        s.recompute().unwrap();
        s
    }

    #[test]
    fn test_try_mutate_creates_on_first_reference() {
        let (_, summaries) = store_pair();
        assert!(summaries.get("summary:A01:2330").is_none());

        let updated = summaries
            .try_mutate::<FeedError>("summary:A01:2330", |s| {
                s.stock_id = "2330".into();
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.stock_id, "2330");
        assert_eq!(summaries.len(), 1);
    }

    #[test]
    fn test_try_mutate_failure_leaves_summary_unchanged() {
        let (_, summaries) = store_pair();
        summaries
            .set("summary:A01:2330", area_summary("A01", "2330", 95))
            .unwrap();

        let before = summaries.get("summary:A01:2330").unwrap();
        let result = summaries.try_mutate("summary:A01:2330", |s| {
            s.stock_id = "poisoned".into();
            s.inputs.margin_qty = -1;
            Err(FeedError::Unexpected("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(summaries.get("summary:A01:2330").unwrap(), before);
    }

    #[test]
    fn test_set_publishes() {
        let (mem, summaries) = store_pair();
        summaries
            .set("summary:A01:2330", area_summary("A01", "2330", 95))
            .unwrap();
        assert_eq!(mem.publish_count(), 1);
        assert_eq!(mem.publishes()[0].0, "summary:A01:2330");
    }

    #[test]
    fn test_rollup_sums_known_areas() {
        let (mem, summaries) = store_pair();
        summaries
            .set("summary:A01:2330", area_summary("A01", "2330", 95))
            .unwrap();
        summaries
            .set("summary:A02:2330", area_summary("A02", "2330", 40))
            .unwrap();
        // A summary outside the configured id set must not contribute.
        summaries
            .set("summary:ZZZ:2330", area_summary("ZZZ", "2330", 1_000))
            .unwrap();

        summaries.update_company_rollup("2330").unwrap();

        let rollup = summaries.get("summary:ALL:2330").unwrap();
        assert_eq!(rollup.area_center, "ALL");
        assert_eq!(rollup.margin_available_qty, 135);
        assert_eq!(rollup.belong_branches, ["8801", "8802", "8810"]);

        // The rollup was also published.
        let (last_key, _) = mem.publishes().last().cloned().unwrap();
        assert_eq!(last_key, "summary:ALL:2330");
    }

    #[test]
    fn test_rollup_with_missing_area_counts_zero() {
        let (_, summaries) = store_pair();
        summaries
            .set("summary:A02:2330", area_summary("A02", "2330", 40))
            .unwrap();
        summaries.update_company_rollup("2330").unwrap();
        assert_eq!(
            summaries.get("summary:ALL:2330").unwrap().margin_available_qty,
            40
        );
    }

    #[test]
    fn test_load_all_skips_malformed_documents() {
        let (mem, summaries) = store_pair();
        mem.set_json("summary:A01:2330", "$", r#"{"stock_id":"2330","area_center":"A01","margin_available_amount":1,"margin_available_qty":2,"short_available_amount":0,"short_available_qty":0,"after_margin_available_amount":0,"after_margin_available_qty":0,"after_short_available_amount":0,"after_short_available_qty":0,"belong_branches":[]}"#).unwrap();
        mem.set_json("summary:A02:2330", "$", r#"{"garbage": true}"#)
            .unwrap();
        mem.set_json("other:key", "$", r#"{}"#).unwrap();

        summaries.load_all().unwrap();
        assert_eq!(summaries.len(), 1);
        let loaded = summaries.get("summary:A01:2330").unwrap();
        assert_eq!(loaded.margin_available_qty, 2);
        // Raw inputs are not part of the document; they restart at zero.
        assert_eq!(loaded.inputs, QuotaInputs::default());
    }

    #[test]
    fn test_ensure_index_recreates_existing() {
        let (mem, summaries) = store_pair();
        summaries.ensure_index().unwrap();
        // Second bootstrap hits "already exists" and must drop + recreate.
        summaries.ensure_index().unwrap();
        assert_eq!(mem.index_created_count(), 2);
        assert_eq!(mem.index_dropped_count(), 1);
    }

    #[test]
    fn test_remove_deletes_everywhere() {
        let (mem, summaries) = store_pair();
        summaries
            .set("summary:A01:2330", area_summary("A01", "2330", 95))
            .unwrap();
        summaries.remove("summary:A01:2330").unwrap();
        assert!(summaries.get("summary:A01:2330").is_none());
        assert!(mem.get_json("summary:A01:2330", "$").is_err());
    }

    #[test]
    fn test_publish_failure_keeps_memory_state() {
        let (mem, summaries) = store_pair();
        mem.fail_publishes(true);
        let err = summaries
            .set("summary:A01:2330", area_summary("A01", "2330", 95))
            .unwrap_err();
        assert!(matches!(err, FeedError::CommandFailed(_)));
        // In-memory state stands; the next publish converges.
        assert!(summaries.get("summary:A01:2330").is_some());

        mem.fail_publishes(false);
        let again = summaries.get("summary:A01:2330").unwrap();
        summaries.sync("summary:A01:2330", &again).unwrap();
        assert_eq!(mem.publish_count(), 1);
    }

    #[test]
    fn test_parse_document_array_convention() {
        let doc = r#"[{"stock_id":"2330","area_center":"ALL","margin_available_amount":0,"margin_available_qty":135,"short_available_amount":0,"short_available_qty":0,"after_margin_available_amount":0,"after_margin_available_qty":0,"after_short_available_amount":0,"after_short_available_qty":0,"belong_branches":["8801"]}]"#;
        let summary = parse_document(doc).unwrap();
        assert_eq!(summary.margin_available_qty, 135);
        assert!(parse_document("[]").is_err());
        assert!(parse_document("not json").is_err());
    }
}
