// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;
use std::convert::Infallible;
use std::error::Error;
use std::sync::{Arc, RwLock};

use crate::identity::ActorId;

/// Interface answering which identities exist.
pub trait Directory {
    type Error: Error;

    /// Returns `true` if the identity is known.
    fn contains(&self, id: &ActorId) -> impl Future<Output = Result<bool, Self::Error>>;
}

/// In-memory directory of known identities.
///
/// Clones share the same set of identities.
#[derive(Clone, Debug, Default)]
pub struct MemoryDirectory {
    actors: Arc<RwLock<HashSet<ActorId>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an identity. Returns `false` if it was already known.
    pub fn insert(&self, id: ActorId) -> bool {
        self.actors
            .write()
            .expect("acquire exclusive write access on directory")
            .insert(id)
    }

    /// Forgets an identity. Returns `false` if it was not known.
    pub fn remove(&self, id: &ActorId) -> bool {
        self.actors
            .write()
            .expect("acquire exclusive write access on directory")
            .remove(id)
    }
}

impl FromIterator<ActorId> for MemoryDirectory {
    fn from_iter<I: IntoIterator<Item = ActorId>>(iter: I) -> Self {
        Self {
            actors: Arc::new(RwLock::new(iter.into_iter().collect())),
        }
    }
}

impl Directory for MemoryDirectory {
    type Error = Infallible;

    async fn contains(&self, id: &ActorId) -> Result<bool, Self::Error> {
        Ok(self
            .actors
            .read()
            .expect("acquire shared read access on directory")
            .contains(id))
    }
}
