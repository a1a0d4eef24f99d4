// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory persistence for versioned records.
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::ops::Bound;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::traits::{INITIAL_VERSION, Mutation, RecordStore, Versioned, WriteError, WriteSet};

/// Records held by a [`MemoryStore`], ordered by key.
#[derive(Clone, Debug)]
pub struct InnerMemoryStore<T> {
    records: BTreeMap<String, Versioned<T>>,
}

/// An in-memory record store.
///
/// `MemoryStore` supports usage in asynchronous and multi-threaded contexts by wrapping an
/// `InnerMemoryStore` with an `RwLock` and `Arc`. Every clone shares the same records.
///
/// This does not persist data permanently, all changes are lost when the process ends. Use this
/// only in development or test contexts.
#[derive(Clone, Debug)]
pub struct MemoryStore<T> {
    inner: Arc<RwLock<InnerMemoryStore<T>>>,
}

impl<T> MemoryStore<T> {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        let inner = InnerMemoryStore {
            records: BTreeMap::new(),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Obtain a read-lock on the store.
    pub fn read_store(&self) -> RwLockReadGuard<'_, InnerMemoryStore<T>> {
        self.inner
            .read()
            .expect("acquire shared read access on store")
    }

    /// Obtain a write-lock on the store.
    pub fn write_store(&self) -> RwLockWriteGuard<'_, InnerMemoryStore<T>> {
        self.inner
            .write()
            .expect("acquire exclusive write access on store")
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.read_store().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_store().records.is_empty()
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecordStore<T> for MemoryStore<T>
where
    T: Clone,
{
    type Error = Infallible;

    async fn read(&self, key: &str) -> Result<Option<Versioned<T>>, Self::Error> {
        Ok(self.read_store().records.get(key).cloned())
    }

    async fn commit(&self, set: WriteSet<T>) -> Result<(), WriteError<Self::Error>> {
        set.validate::<Self::Error>()?;

        // Hold the write-lock for checking _and_ applying, nobody can sneak in between.
        let mut store = self.write_store();

        for mutation in set.iter() {
            let found = store.records.get(mutation.key()).map(|record| record.version);
            if !mutation.expected().matches(found) {
                return Err(WriteError::VersionConflict {
                    key: mutation.key().to_owned(),
                    expected: mutation.expected(),
                    found,
                });
            }
        }

        for mutation in set {
            if let Mutation::Put { key, value, .. } = mutation {
                let version = store
                    .records
                    .get(&key)
                    .map_or(INITIAL_VERSION, |record| record.version + 1);
                store.records.insert(key, Versioned::new(value, version));
            }
        }

        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Versioned<T>)>, Self::Error> {
        let store = self.read_store();
        let lower = match after {
            Some(after) if after >= prefix => Bound::Excluded(after),
            _ => Bound::Included(prefix),
        };
        let page = store
            .records
            .range::<str, _>((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect();
        Ok(page)
    }
}
