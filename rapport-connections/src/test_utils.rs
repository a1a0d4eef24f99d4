// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rapport_store::{MemoryStore, RecordStore, Versioned, WriteError, WriteSet};
use thiserror::Error;

use crate::config::ManagerConfig;
use crate::directory::MemoryDirectory;
use crate::identity::ActorId;
use crate::manager::ConnectionManager;
use crate::record::ConnectionRecord;

pub type TestManager = ConnectionManager<MemoryStore<ConnectionRecord>, MemoryDirectory>;

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Set of registered participants sharing one in-memory connection manager.
#[derive(Clone, Debug)]
pub struct TestNetwork {
    pub directory: MemoryDirectory,
    pub manager: TestManager,
}

impl TestNetwork {
    pub fn new(names: &[&str]) -> Self {
        Self::from_config(names, ManagerConfig::default())
    }

    pub fn from_config(names: &[&str], config: ManagerConfig) -> Self {
        let directory: MemoryDirectory = names.iter().map(|name| actor(name)).collect();
        let manager =
            ConnectionManager::from_config(MemoryStore::new(), directory.clone(), config);
        Self { directory, manager }
    }

    /// Returns the identity of a participant, registered or not.
    pub fn actor(&self, name: &str) -> ActorId {
        actor(name)
    }

    /// Creates another manager on top of the same participants, backed by the given store.
    pub fn manager_with<S>(
        &self,
        store: S,
        config: ManagerConfig,
    ) -> ConnectionManager<S, MemoryDirectory>
    where
        S: RecordStore<ConnectionRecord>,
    {
        ConnectionManager::from_config(store, self.directory.clone(), config)
    }
}

fn actor(name: &str) -> ActorId {
    ActorId::new(name).expect("valid actor id")
}

#[derive(Debug, Error)]
pub enum FaultyStoreError<E> {
    #[error("store is offline")]
    Offline,

    #[error("{0}")]
    Inner(E),
}

/// Store wrapper to simulate concurrent writers and outages.
///
/// Injected conflicts reject the next commits as if another writer changed the records in the
/// meantime, nothing gets written then. While offline every read and commit fails.
#[derive(Clone, Debug)]
pub struct FaultyStore<S> {
    inner: S,
    conflicts: Arc<AtomicUsize>,
    offline: Arc<AtomicBool>,
    commits: Arc<AtomicUsize>,
}

impl<S> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            conflicts: Arc::new(AtomicUsize::new(0)),
            offline: Arc::new(AtomicBool::new(false)),
            commits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Rejects the next `count` commits with a version conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of commits attempted so far, including rejected ones.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    fn take_conflict(&self) -> bool {
        self.conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
            .is_ok()
    }
}

impl<T, S> RecordStore<T> for FaultyStore<S>
where
    S: RecordStore<T>,
{
    type Error = FaultyStoreError<S::Error>;

    async fn read(&self, key: &str) -> Result<Option<Versioned<T>>, Self::Error> {
        if self.is_offline() {
            return Err(FaultyStoreError::Offline);
        }
        self.inner.read(key).await.map_err(FaultyStoreError::Inner)
    }

    async fn commit(&self, set: WriteSet<T>) -> Result<(), WriteError<Self::Error>> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.is_offline() {
            return Err(WriteError::Store(FaultyStoreError::Offline));
        }

        if self.take_conflict() {
            if let Some(mutation) = set.iter().next() {
                return Err(WriteError::VersionConflict {
                    key: mutation.key().to_owned(),
                    expected: mutation.expected(),
                    found: None,
                });
            }
        }

        self.inner
            .commit(set)
            .await
            .map_err(|err| err.map_store(FaultyStoreError::Inner))
    }

    async fn list(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Versioned<T>)>, Self::Error> {
        if self.is_offline() {
            return Err(FaultyStoreError::Offline);
        }
        self.inner
            .list(prefix, after, limit)
            .await
            .map_err(FaultyStoreError::Inner)
    }
}
