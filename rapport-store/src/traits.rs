// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Monotonically increasing version of a stored record.
///
/// Versions start at `1` when a record gets created and are incremented by exactly one with every
/// successful write.
pub type Version = u64;

/// Version assigned to freshly created records.
pub const INITIAL_VERSION: Version = 1;

/// Value as it was read from the store, together with the version it had at that point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Version,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }
}

/// Condition a mutation places on the current state of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expected {
    /// The record must not exist yet.
    Absent,

    /// The record must exist and still carry exactly this version.
    Version(Version),
}

impl Expected {
    /// Condition matching what was observed during a read.
    pub fn from_observed(version: Option<Version>) -> Self {
        match version {
            Some(version) => Self::Version(version),
            None => Self::Absent,
        }
    }

    /// Returns `true` if the version found in the store satisfies this condition.
    pub fn matches(&self, found: Option<Version>) -> bool {
        match (self, found) {
            (Expected::Absent, None) => true,
            (Expected::Version(expected), Some(found)) => *expected == found,
            _ => false,
        }
    }
}

impl Display for Expected {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expected::Absent => write!(f, "absent"),
            Expected::Version(version) => write!(f, "version {version}"),
        }
    }
}

/// Single conditioned change inside a [`WriteSet`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation<T> {
    /// Write `value` to `key` if the condition holds. Creates the record when `expected` is
    /// `Absent`.
    Put {
        key: String,
        value: T,
        expected: Expected,
    },

    /// Do not change the record but make the whole set fail if it moved away from the condition.
    Assert { key: String, expected: Expected },
}

impl<T> Mutation<T> {
    pub fn key(&self) -> &str {
        match self {
            Mutation::Put { key, .. } => key,
            Mutation::Assert { key, .. } => key,
        }
    }

    pub fn expected(&self) -> Expected {
        match self {
            Mutation::Put { expected, .. } => *expected,
            Mutation::Assert { expected, .. } => *expected,
        }
    }
}

/// Group of conditioned mutations which are committed all together or not at all.
///
/// Stores check every condition before applying any change. If one of them does not hold, the
/// whole set is rejected and the store remains untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteSet<T> {
    mutations: Vec<Mutation<T>>,
}

impl<T> WriteSet<T> {
    pub fn new() -> Self {
        Self {
            mutations: Vec::new(),
        }
    }

    /// Adds a conditioned write.
    pub fn put(mut self, key: impl Into<String>, value: T, expected: Expected) -> Self {
        self.mutations.push(Mutation::Put {
            key: key.into(),
            value,
            expected,
        });
        self
    }

    /// Adds a condition on a record without changing it.
    pub fn assert(mut self, key: impl Into<String>, expected: Expected) -> Self {
        self.mutations.push(Mutation::Assert {
            key: key.into(),
            expected,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation<T>> {
        self.mutations.iter()
    }

    /// Makes sure every key is only addressed once.
    pub fn validate<E>(&self) -> Result<(), WriteError<E>> {
        let mut seen = HashSet::with_capacity(self.mutations.len());
        for mutation in &self.mutations {
            if !seen.insert(mutation.key()) {
                return Err(WriteError::DuplicateKey(mutation.key().to_owned()));
            }
        }
        Ok(())
    }
}

impl<T> Default for WriteSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntoIterator for WriteSet<T> {
    type Item = Mutation<T>;

    type IntoIter = std::vec::IntoIter<Mutation<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

/// Reasons why a write or write set was not applied.
#[derive(Debug, Error)]
pub enum WriteError<E> {
    /// Tried to create a record which already exists.
    #[error("record '{0}' already exists")]
    AlreadyExists(String),

    /// Record changed since it was read, the write was rejected.
    #[error("record '{key}' changed concurrently, expected {expected} but found {}", display_found(.found))]
    VersionConflict {
        key: String,
        expected: Expected,
        found: Option<Version>,
    },

    /// The same key was addressed more than once in one write set. This indicates a bug in the
    /// caller.
    #[error("key '{0}' is addressed more than once in write set")]
    DuplicateKey(String),

    /// Underlying storage layer failed.
    #[error(transparent)]
    Store(E),
}

impl<E> From<E> for WriteError<E> {
    fn from(err: E) -> Self {
        WriteError::Store(err)
    }
}

impl<E> WriteError<E> {
    /// Returns `true` if the write failed because of a concurrent change and might succeed when
    /// re-attempted with fresh state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            WriteError::AlreadyExists(_) | WriteError::VersionConflict { .. }
        )
    }

    /// Converts the error of the underlying storage layer, keeping all other variants.
    pub fn map_store<F>(self, op: impl FnOnce(E) -> F) -> WriteError<F> {
        match self {
            WriteError::AlreadyExists(key) => WriteError::AlreadyExists(key),
            WriteError::VersionConflict {
                key,
                expected,
                found,
            } => WriteError::VersionConflict {
                key,
                expected,
                found,
            },
            WriteError::DuplicateKey(key) => WriteError::DuplicateKey(key),
            WriteError::Store(err) => WriteError::Store(op(err)),
        }
    }
}

fn display_found(found: &Option<Version>) -> String {
    match found {
        Some(version) => format!("version {version}"),
        None => "no record".to_string(),
    }
}

/// Interface for versioned records addressed by string keys.
///
/// Every record carries a [`Version`] which allows optimistic concurrency control: readers
/// remember the version they have seen and condition their following writes on it. A write is
/// rejected when someone else changed the record in between.
///
/// Implementations need to guarantee that [`RecordStore::commit`] applies all mutations of a set
/// atomically, concurrent readers never observe a partially applied set.
pub trait RecordStore<T> {
    type Error: Error;

    /// Returns the record stored under this key, or `None` if it does not exist.
    fn read(&self, key: &str) -> impl Future<Output = Result<Option<Versioned<T>>, Self::Error>>;

    /// Atomically applies all mutations of the set if all their conditions hold.
    fn commit(&self, set: WriteSet<T>) -> impl Future<Output = Result<(), WriteError<Self::Error>>>;

    /// Returns up to `limit` records whose keys start with `prefix`, ordered by key.
    ///
    /// Paging is possible by passing the last key of the previous page as `after`, only keys
    /// strictly greater than it are returned then.
    fn list(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<(String, Versioned<T>)>, Self::Error>>;

    /// Creates a new record.
    ///
    /// Returns the version of the created record or `AlreadyExists` if the key was taken.
    fn create(
        &self,
        key: &str,
        value: T,
    ) -> impl Future<Output = Result<Version, WriteError<Self::Error>>> {
        async move {
            let set = WriteSet::new().put(key, value, Expected::Absent);
            match self.commit(set).await {
                Ok(()) => Ok(INITIAL_VERSION),
                Err(WriteError::VersionConflict { key, .. }) => Err(WriteError::AlreadyExists(key)),
                Err(err) => Err(err),
            }
        }
    }

    /// Overwrites an existing record if it still carries the expected version.
    ///
    /// Returns the new version of the record.
    fn write_if_version(
        &self,
        key: &str,
        value: T,
        expected: Version,
    ) -> impl Future<Output = Result<Version, WriteError<Self::Error>>> {
        async move {
            let set = WriteSet::new().put(key, value, Expected::Version(expected));
            self.commit(set).await?;
            Ok(expected + 1)
        }
    }
}
