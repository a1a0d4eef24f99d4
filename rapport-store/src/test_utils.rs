// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};

/// Simple value to exercise store backends with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    pub name: String,
}

impl TestRecord {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

/// Macro to run the same test logic against all store backend implementations.
///
/// The SQLite backend can store any serializable value, reads in the test body therefore need
/// explicit type annotations.
///
/// This macro takes the stored value type and a closure that will be executed against each store
/// type:
/// - In-memory store (`MemoryStore`)
/// - SQLite store (`SqliteStore`)
///
/// ## Example
///
/// ```rust
/// # use rapport_store::{RecordStore, Versioned, assert_all_stores};
/// # use rapport_store::test_utils::TestRecord;
/// # async fn run() {
/// assert_all_stores!(TestRecord, |store| async {
///     store.create("a", TestRecord::new("panda")).await.unwrap();
///     let record: Option<Versioned<TestRecord>> = store.read("a").await.unwrap();
///     assert!(record.is_some());
/// });
/// # }
/// ```
#[macro_export]
macro_rules! assert_all_stores {
    ($value:ty, |$store:ident| $test_body:expr) => {
        // Test with MemoryStore.
        {
            let $store = $crate::memory::MemoryStore::<$value>::default();
            $test_body.await;
        }

        // Test with SqliteStore.
        {
            let $store = $crate::sqlite::SqliteStore::temporary().await;
            $test_body.await;
        }
    };
}
