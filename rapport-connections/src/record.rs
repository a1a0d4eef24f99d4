// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::identity::ActorId;
use crate::state::ConnectionState;

/// One participant's view on a connection with another participant.
///
/// Every connection is represented by two records, one owned by each side. They don't need to
/// hold the same state as each participant has its own perspective (one side is `Pending` while
/// the other one is `Invited` for example).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Participant owning this view.
    pub owner: ActorId,

    /// Participant this view points at.
    pub other: ActorId,

    pub state: ConnectionState,

    /// Relationship types as seen by the owner, for example "colleague" or "supervisor".
    pub types: BTreeSet<String>,

    /// Free-form properties the owner attached to this connection.
    pub properties: BTreeMap<String, String>,

    /// UNIX timestamp in seconds when this record was created.
    pub created_at: u64,

    /// UNIX timestamp in seconds of the last change.
    pub updated_at: u64,
}

impl ConnectionRecord {
    pub fn new(owner: ActorId, other: ActorId, timestamp: u64) -> Self {
        Self {
            owner,
            other,
            state: ConnectionState::None,
            types: BTreeSet::new(),
            properties: BTreeMap::new(),
            created_at: timestamp,
            updated_at: timestamp,
        }
    }
}

/// Additional parameters handed in with an operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    /// Relationship types without regard to point of view.
    ///
    /// Affect the actor's view with every operation and the other side's view only when inviting.
    pub types: BTreeSet<String>,

    /// Relationship types from the inviting actor's point of view (only for invite).
    pub to_relationships: BTreeSet<String>,

    /// Relationship types from the invited participant's point of view (only for invite).
    pub from_relationships: BTreeSet<String>,

    /// Properties to attach to the actor's view.
    pub properties: BTreeMap<String, String>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, value: &str) -> Self {
        insert_tag(&mut self.types, value);
        self
    }

    pub fn with_to_relationship(mut self, value: &str) -> Self {
        insert_tag(&mut self.to_relationships, value);
        self
    }

    pub fn with_from_relationship(mut self, value: &str) -> Self {
        insert_tag(&mut self.from_relationships, value);
        self
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Type tags for the actor's own view.
    pub(crate) fn actor_types(&self, inviting: bool) -> impl Iterator<Item = &String> {
        let to_relationships = inviting.then_some(&self.to_relationships);
        self.types.iter().chain(to_relationships.into_iter().flatten())
    }

    /// Type tags for the other side's view, only applied when inviting.
    pub(crate) fn other_types(&self) -> impl Iterator<Item = &String> {
        self.types.iter().chain(self.from_relationships.iter())
    }
}

/// Adds a relationship type, ignoring surrounding whitespace and empty values.
pub(crate) fn insert_tag(tags: &mut BTreeSet<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        tags.insert(value.to_owned());
    }
}

pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}
