// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping from participant pairs to the storage keys of both their views.
//!
//! Records of one owner are grouped under a common namespace which is spread over two levels of
//! shards, derived from the BLAKE3 hash of the owner's identity:
//!
//! ```text
//! <root>/<shard 1>/<shard 2>/<owner>/<other>
//! contacts/4f/a2/panda/penguin
//! ```
use crate::identity::ActorId;

/// Default root all connection records live under.
pub const DEFAULT_ROOT: &str = "contacts";

/// Storage keys of both views on a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairKeys {
    /// Key of the record owned by the actor, pointing at the target.
    pub actor: String,

    /// Key of the record owned by the target, pointing at the actor.
    pub target: String,
}

/// Deterministic, side-effect free mapping from (actor, target) to storage keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairPathResolver {
    root: String,
}

impl PairPathResolver {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_owned(),
        }
    }

    /// Key prefix shared by all records owned by this participant.
    pub fn namespace(&self, owner: &ActorId) -> String {
        let hash = blake3::hash(owner.as_str().as_bytes());
        let shard = hash.as_bytes();
        format!("{}/{:02x}/{:02x}/{}/", self.root, shard[0], shard[1], owner)
    }

    /// Key of the record owned by `owner` pointing at `other`.
    pub fn key(&self, owner: &ActorId, other: &ActorId) -> String {
        let mut key = self.namespace(owner);
        key.push_str(other.as_str());
        key
    }

    /// Resolves the keys of both views.
    ///
    /// Resolving (B, A) yields the keys of (A, B) swapped. As long as actor and target differ,
    /// the two keys never collide.
    pub fn resolve(&self, actor: &ActorId, target: &ActorId) -> PairKeys {
        PairKeys {
            actor: self.key(actor, target),
            target: self.key(target, actor),
        }
    }
}

impl Default for PairPathResolver {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}
