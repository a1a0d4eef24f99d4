// SPDX-License-Identifier: MIT OR Apache-2.0

//! Applying operations to both sides of a connection.
use std::error::Error;

use futures_util::stream::{self, Stream, TryStreamExt};
use rapport_store::{Expected, RecordStore, Versioned, WriteSet};
use tracing::{debug, error, trace, warn};

use crate::config::ManagerConfig;
use crate::directory::Directory;
use crate::error::ConnectionError;
use crate::identity::ActorId;
use crate::operation::Operation;
use crate::policy::authorize;
use crate::record::{Attributes, ConnectionRecord, current_timestamp, insert_tag};
use crate::resolver::{PairKeys, PairPathResolver};
use crate::state::{ConnectionState, is_consistent, transition};

/// Manages the two-sided connection records between participants.
///
/// Every mutating operation reads both sides, decides on the new states and commits both records
/// together, guarded by the versions which were read. If another operation changed one of the
/// records in the meantime, the commit is rejected and the whole evaluation starts again from a
/// fresh read, up to [`ManagerConfig::max_attempts`] times.
#[derive(Clone, Debug)]
pub struct ConnectionManager<S, D> {
    store: S,
    directory: D,
    resolver: PairPathResolver,
    config: ManagerConfig,
}

impl<S, D> ConnectionManager<S, D>
where
    S: RecordStore<ConnectionRecord>,
    D: Directory,
{
    pub fn new(store: S, directory: D) -> Self {
        Self::from_config(store, directory, ManagerConfig::default())
    }

    pub fn from_config(store: S, directory: D, config: ManagerConfig) -> Self {
        Self {
            store,
            directory,
            resolver: PairPathResolver::new(&config.root),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn resolver(&self) -> &PairPathResolver {
        &self.resolver
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Applies an operation of `actor` directed at `target` and returns the actor's new state.
    ///
    /// Either both records are updated or none of them is. `Noop` never writes and returns the
    /// actor's current state without any further checks.
    pub async fn apply(
        &self,
        actor: &ActorId,
        target: &ActorId,
        operation: Operation,
        attributes: &Attributes,
    ) -> Result<ConnectionState, ConnectionError> {
        let keys = self.resolver.resolve(actor, target);

        if operation == Operation::Noop {
            let current = self.read(&keys.actor).await?;
            return Ok(state_of(&current));
        }

        if actor == target {
            debug!(%actor, %operation, "rejected operation directed at actor itself");
            return Err(ConnectionError::InvalidTarget(format!(
                "'{actor}' can't {operation} itself"
            )));
        }

        let known = self
            .directory
            .contains(target)
            .await
            .map_err(store_unavailable)?;
        if !known {
            debug!(%actor, %target, %operation, "rejected operation directed at unknown target");
            return Err(ConnectionError::UnknownTarget(target.clone()));
        }

        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let set = self
                .prepare(actor, target, &keys, operation, attributes)
                .await?;
            let actor_state = set.actor_state;

            match self.store.commit(set.writes).await {
                Ok(()) => {
                    debug!(%actor, %target, %operation, %actor_state, attempt, "applied operation");
                    return Ok(actor_state);
                }
                Err(err) if err.is_conflict() => {
                    trace!(%actor, %target, %operation, attempt, %err, "concurrent change, retry");
                }
                Err(err) => {
                    error!(
                        %actor,
                        %target,
                        %operation,
                        %err,
                        "committing connection records failed"
                    );
                    return Err(ConnectionError::StoreUnavailable(err.to_string()));
                }
            }
        }

        warn!(%actor, %target, %operation, max_attempts, "giving up after repeated conflicts");
        Err(ConnectionError::Conflict {
            actor: actor.clone(),
            target: target.clone(),
            attempts: max_attempts,
        })
    }

    /// Reads both sides and computes the guarded write set for one attempt.
    async fn prepare(
        &self,
        actor: &ActorId,
        target: &ActorId,
        keys: &PairKeys,
        operation: Operation,
        attributes: &Attributes,
    ) -> Result<PreparedWrite, ConnectionError> {
        let actor_side = self.read(&keys.actor).await?;
        let target_side = self.read(&keys.target).await?;
        let actor_state = state_of(&actor_side);
        let target_state = state_of(&target_side);

        authorize(actor, actor_state, target_state, operation).map_err(|reason| {
            debug!(%actor, %target, %operation, %reason, "rejected unauthorized operation");
            ConnectionError::Forbidden {
                actor: actor.clone(),
                target: target.clone(),
                operation,
                reason,
            }
        })?;

        let invalid = || ConnectionError::InvalidTransition {
            target: target.clone(),
            operation,
            actor_state,
            target_state,
        };

        let Some(next) = transition(operation, actor_state, target_state) else {
            debug!(
                %actor,
                %target,
                %operation,
                %actor_state,
                %target_state,
                "rejected operation invalid for current state"
            );
            return Err(invalid());
        };
        if !is_consistent(next.actor, next.other_or(target_state)) {
            warn!(
                %actor,
                %target,
                %operation,
                %actor_state,
                %target_state,
                "refusing to write inconsistent connection states"
            );
            return Err(invalid());
        }

        let now = current_timestamp();
        let actor_expected = expected(&actor_side);
        let target_expected = expected(&target_side);

        let mut actor_record = updated(actor_side, actor, target, next.actor, now);
        if next.actor != ConnectionState::None {
            for tag in attributes.actor_types(operation == Operation::Invite) {
                insert_tag(&mut actor_record.types, tag);
            }
            actor_record.properties.extend(
                attributes
                    .properties
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            );
        }

        let writes = WriteSet::new().put(keys.actor.clone(), actor_record, actor_expected);
        let writes = match next.other {
            Some(other_state) => {
                let mut target_record = updated(target_side, target, actor, other_state, now);
                if operation == Operation::Invite {
                    for tag in attributes.other_types() {
                        insert_tag(&mut target_record.types, tag);
                    }
                }
                writes.put(keys.target.clone(), target_record, target_expected)
            }
            // Unchanged, but the decision was based on it.
            None => writes.assert(keys.target.clone(), target_expected),
        };

        Ok(PreparedWrite {
            writes,
            actor_state: next.actor,
        })
    }

    /// Returns the record `owner` holds about `other`, including `None` tombstones.
    pub async fn get_record(
        &self,
        owner: &ActorId,
        other: &ActorId,
    ) -> Result<Option<ConnectionRecord>, ConnectionError> {
        let record = self.read(&self.resolver.key(owner, other)).await?;
        Ok(record.map(|record| record.value))
    }

    /// Returns the current states of both views on a connection, `(owner's, other's)`.
    pub async fn states(
        &self,
        owner: &ActorId,
        other: &ActorId,
    ) -> Result<(ConnectionState, ConnectionState), ConnectionError> {
        let keys = self.resolver.resolve(owner, other);
        let owner_side = self.read(&keys.actor).await?;
        let other_side = self.read(&keys.target).await?;
        Ok((state_of(&owner_side), state_of(&other_side)))
    }

    /// Streams all records of `owner` regardless of their state, `None` tombstones included.
    pub fn list_all<'a>(
        &'a self,
        owner: &ActorId,
    ) -> impl Stream<Item = Result<ConnectionRecord, ConnectionError>> + use<'a, S, D> {
        self.list_filtered(owner, None, None)
    }

    /// Streams all records of `owner` in the given state, ordered by the other participant.
    ///
    /// Records are fetched lazily in pages of [`ManagerConfig::page_size`].
    pub fn list_by_state<'a>(
        &'a self,
        owner: &ActorId,
        state: ConnectionState,
    ) -> impl Stream<Item = Result<ConnectionRecord, ConnectionError>> + use<'a, S, D> {
        self.list_by_state_after(owner, state, None)
    }

    /// Like [`list_by_state`](Self::list_by_state), but only yields records pointing at
    /// participants ordered after `after`. Used to resume an interrupted listing.
    pub fn list_by_state_after<'a>(
        &'a self,
        owner: &ActorId,
        state: ConnectionState,
        after: Option<&ActorId>,
    ) -> impl Stream<Item = Result<ConnectionRecord, ConnectionError>> + use<'a, S, D> {
        self.list_filtered(owner, Some(state), after)
    }

    fn list_filtered<'a>(
        &'a self,
        owner: &ActorId,
        state: Option<ConnectionState>,
        after: Option<&ActorId>,
    ) -> impl Stream<Item = Result<ConnectionRecord, ConnectionError>> + use<'a, S, D> {
        let prefix = self.resolver.namespace(owner);
        let start = after.map(|other| self.resolver.key(owner, other));
        let page_size = self.config.page_size.max(1);

        stream::try_unfold(Some(start), move |cursor| {
            let prefix = prefix.clone();
            async move {
                let Some(after) = cursor else {
                    return Ok::<_, ConnectionError>(None);
                };

                let page = self
                    .store
                    .list(&prefix, after.as_deref(), page_size)
                    .await
                    .map_err(store_unavailable)?;

                let next = if page.len() < page_size {
                    None
                } else {
                    page.last().map(|(key, _)| Some(key.clone()))
                };

                let records: Vec<Result<ConnectionRecord, ConnectionError>> = page
                    .into_iter()
                    .map(|(_, record)| record.value)
                    .filter(|record| state.is_none_or(|state| record.state == state))
                    .map(Ok)
                    .collect();

                Ok(Some((stream::iter(records), next)))
            }
        })
        .try_flatten()
    }

    async fn read(
        &self,
        key: &str,
    ) -> Result<Option<Versioned<ConnectionRecord>>, ConnectionError> {
        self.store.read(key).await.map_err(|err| {
            error!(key, %err, "reading connection record failed");
            ConnectionError::StoreUnavailable(err.to_string())
        })
    }
}

struct PreparedWrite {
    writes: WriteSet<ConnectionRecord>,
    actor_state: ConnectionState,
}

fn state_of(record: &Option<Versioned<ConnectionRecord>>) -> ConnectionState {
    record
        .as_ref()
        .map(|record| record.value.state)
        .unwrap_or_default()
}

fn expected(record: &Option<Versioned<ConnectionRecord>>) -> Expected {
    Expected::from_observed(record.as_ref().map(|record| record.version))
}

/// Moves a record into its next state. Records returning to `None` are kept as tombstones without
/// any relationship data.
fn updated(
    current: Option<Versioned<ConnectionRecord>>,
    owner: &ActorId,
    other: &ActorId,
    state: ConnectionState,
    now: u64,
) -> ConnectionRecord {
    let mut record = current
        .map(|record| record.value)
        .unwrap_or_else(|| ConnectionRecord::new(owner.clone(), other.clone(), now));

    record.state = state;
    record.updated_at = now;
    if state == ConnectionState::None {
        record.types.clear();
        record.properties.clear();
    }

    record
}

fn store_unavailable<E: Error>(err: E) -> ConnectionError {
    error!(%err, "backend failed");
    ConnectionError::StoreUnavailable(err.to_string())
}
