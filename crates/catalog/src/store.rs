//! Keyed persistence for cached layer payloads.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use runtime::BoxFuture;

use crate::error::PayloadStoreError;

/// Opaque keyed blob store. Expiry is decided by the caller.
pub trait LayerPayloadStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, PayloadStoreError>>;
    fn put<'a>(&'a self, key: &'a str, blob: String) -> BoxFuture<'a, Result<(), PayloadStoreError>>;
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, PayloadStoreError>>;
}

#[derive(Debug, Default)]
pub struct InMemoryPayloadStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Overwrites a raw blob, bypassing any envelope the cache writes.
    pub fn insert_raw(&self, key: impl Into<String>, blob: impl Into<String>) {
        self.entries.lock().insert(key.into(), blob.into());
    }
}

impl LayerPayloadStore for InMemoryPayloadStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, PayloadStoreError>> {
        let found = self.entries.lock().get(key).cloned();
        Box::pin(async move { Ok(found) })
    }

    fn put<'a>(&'a self, key: &'a str, blob: String) -> BoxFuture<'a, Result<(), PayloadStoreError>> {
        self.entries.lock().insert(key.to_string(), blob);
        Box::pin(async { Ok(()) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, PayloadStoreError>> {
        let removed = self.entries.lock().remove(key).is_some();
        Box::pin(async move { Ok(removed) })
    }
}
