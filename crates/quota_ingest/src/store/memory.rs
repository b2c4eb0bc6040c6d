//! In-process document store for tests and local development.

use super::{DocumentStore, IndexField};
use crate::error::FeedError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// A `DocumentStore` backed by a `HashMap`, with an ordered publish log.
///
/// Mirrors the store conventions the service relies on: whole-document reads
/// under the `"$"` path come back as a one-element JSON array, and creating
/// an index that already exists fails with "Index already exists".
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, String>>,
    publishes: Mutex<Vec<(String, String)>>,
    indexes: Mutex<Vec<String>>,
    index_created: AtomicUsize,
    index_dropped: AtomicUsize,
    fail_publishes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful publish in order, as `(key, document)` pairs.
    pub fn publishes(&self) -> Vec<(String, String)> {
        self.lock(&self.publishes).clone()
    }

    /// Number of successful publishes so far.
    pub fn publish_count(&self) -> usize {
        self.lock(&self.publishes).len()
    }

    /// When set, every `set_json` fails with `CommandFailed`.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::Release);
    }

    /// How many times an index was created.
    pub fn index_created_count(&self) -> usize {
        self.index_created.load(Ordering::Acquire)
    }

    /// How many times an index was dropped.
    pub fn index_dropped_count(&self) -> usize {
        self.index_dropped.load(Ordering::Acquire)
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for MemoryStore {
    fn get_json(&self, key: &str, _path: &str) -> Result<String, FeedError> {
        self.lock(&self.docs)
            .get(key)
            .map(|doc| format!("[{doc}]"))
            .ok_or_else(|| FeedError::KeyNotFound(key.to_string()))
    }

    fn set_json(&self, key: &str, _path: &str, json: &str) -> Result<(), FeedError> {
        if self.fail_publishes.load(Ordering::Acquire) {
            return Err(FeedError::CommandFailed("injected publish failure".into()));
        }
        self.lock(&self.docs)
            .insert(key.to_string(), json.to_string());
        self.lock(&self.publishes)
            .push((key.to_string(), json.to_string()));
        Ok(())
    }

    fn del(&self, key: &str) -> Result<(), FeedError> {
        self.lock(&self.docs).remove(key);
        Ok(())
    }

    fn keys(&self, pattern: &str) -> Result<Vec<String>, FeedError> {
        let docs = self.lock(&self.docs);
        let mut keys: Vec<String> = match pattern.strip_suffix('*') {
            Some(prefix) => docs
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
            None => docs.keys().filter(|k| *k == pattern).cloned().collect(),
        };
        keys.sort();
        Ok(keys)
    }

    fn create_index(
        &self,
        name: &str,
        _prefix: &str,
        _schema: &[IndexField],
    ) -> Result<(), FeedError> {
        let mut indexes = self.lock(&self.indexes);
        if indexes.iter().any(|i| i == name) {
            return Err(FeedError::CommandFailed("Index already exists".into()));
        }
        indexes.push(name.to_string());
        self.index_created.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn drop_index(&self, name: &str) -> Result<(), FeedError> {
        let mut indexes = self.lock(&self.indexes);
        match indexes.iter().position(|i| i == name) {
            Some(pos) => {
                indexes.remove(pos);
                self.index_dropped.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            None => Err(FeedError::CommandFailed(format!("Unknown index name {name}"))),
        }
    }
}
