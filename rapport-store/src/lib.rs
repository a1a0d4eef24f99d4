// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interfaces and implementations of versioned record stores.
//!
//! A record store keeps arbitrary values under string keys. Every record carries a version which
//! is incremented with each write, allowing callers to implement optimistic concurrency control:
//! read the records you're interested in, compute the changes and commit them conditioned on the
//! versions you have seen. If anyone else changed one of the records in the meantime, the whole
//! commit gets rejected and can be re-attempted with fresh state.
//!
//! ## Write sets
//!
//! Changes which need to strictly _all_ occur or _none_ occur are grouped into one [`WriteSet`].
//! Each mutation in the set is conditioned on the record being absent or having a certain
//! version. Mutations can also _assert_ a record's version without changing it, which is useful
//! when a computed change depends on records it does not touch.
//!
//! ```rust
//! # use rapport_store::{Expected, MemoryStore, RecordStore, WriteSet};
//! # async fn run() {
//! let store = MemoryStore::<String>::new();
//!
//! let set = WriteSet::new()
//!     .put("panda", "bamboo".to_string(), Expected::Absent)
//!     .put("penguin", "fish".to_string(), Expected::Absent);
//! store.commit(set).await.unwrap();
//!
//! let panda = store.read("panda").await.unwrap().unwrap();
//! assert_eq!(panda.version, 1);
//! # }
//! ```
//!
//! ## Store implementations
//!
//! An in-memory storage solution is provided in the form of a `MemoryStore`, gated by the
//! `memory` feature flag.
//!
//! A SQLite storage solution is provided in the form of a `SqliteStore`, gated by the `sqlite`
//! feature flag. Values are encoded as CBOR.
//!
//! Both feature flags are enabled by default.
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod traits;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteError, SqliteStore, SqliteStoreBuilder};
pub use traits::{
    Expected, INITIAL_VERSION, Mutation, RecordStore, Version, Versioned, WriteError, WriteSet,
};
