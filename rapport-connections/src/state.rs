// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-side connection states and the transition table driving them.
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::Operation;

/// State of a connection from the point of view of one participant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No relationship.
    #[default]
    None,

    /// I invited them and wait for their response.
    Pending,

    /// They invited me.
    Invited,

    /// We're connected.
    Connected,

    /// I dismissed their invitation without rejecting it.
    Ignored,

    /// I blocked them.
    Blocked,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 6] = [
        ConnectionState::None,
        ConnectionState::Pending,
        ConnectionState::Invited,
        ConnectionState::Connected,
        ConnectionState::Ignored,
        ConnectionState::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::None => "none",
            ConnectionState::Pending => "pending",
            ConnectionState::Invited => "invited",
            ConnectionState::Connected => "connected",
            ConnectionState::Ignored => "ignored",
            ConnectionState::Blocked => "blocked",
        }
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = UnknownState;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ConnectionState::ALL
            .into_iter()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| UnknownState(value.to_owned()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown connection state '{0}'")]
pub struct UnknownState(pub String);

/// Returns `true` if both sides of a pair can hold these states at the same time.
///
/// The relation is symmetric, the order of the arguments does not matter.
pub fn is_consistent(a: ConnectionState, b: ConnectionState) -> bool {
    use ConnectionState::*;

    matches!(
        (a, b),
        (None, None)
            | (Pending, Invited)
            | (Invited, Pending)
            | (Connected, Connected)
            | (Ignored, Pending)
            | (Pending, Ignored)
            | (Blocked, None)
            | (None, Blocked)
            | (Blocked, Blocked)
    )
}

/// New states of both sides after an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// New state of the actor's side.
    pub actor: ConnectionState,

    /// New state of the other side, `None` if it stays as it is.
    pub other: Option<ConnectionState>,
}

impl Transition {
    fn both(actor: ConnectionState, other: ConnectionState) -> Self {
        Self {
            actor,
            other: Some(other),
        }
    }

    fn actor_only(actor: ConnectionState) -> Self {
        Self { actor, other: None }
    }

    /// Resulting state of the other side given its current state.
    pub fn other_or(&self, current: ConnectionState) -> ConnectionState {
        self.other.unwrap_or(current)
    }
}

/// Computes the outcome of an operation given the current state of both sides.
///
/// Returns `None` when the operation is not allowed from the actor's current state. Whether the
/// actor is _permitted_ to perform it is decided separately by the authorization policy.
///
/// A `Block` resets the other side to `None`, except when the other side has already blocked the
/// actor: that block belongs to the other participant and is kept.
pub fn transition(
    operation: Operation,
    actor: ConnectionState,
    other: ConnectionState,
) -> Option<Transition> {
    use ConnectionState::*;

    match (operation, actor) {
        (Operation::Invite, None) if other == None => Some(Transition::both(Pending, Invited)),
        (Operation::Accept, Invited) => Some(Transition::both(Connected, Connected)),
        (Operation::Reject, Invited) => Some(Transition::both(None, None)),
        (Operation::Ignore, Invited) => Some(Transition::actor_only(Ignored)),
        (Operation::Block, _) => match other {
            Blocked => Some(Transition::actor_only(Blocked)),
            _ => Some(Transition::both(Blocked, None)),
        },
        (Operation::Remove, Connected | Pending) => Some(Transition::both(None, None)),
        (Operation::Cancel, Pending) => Some(Transition::both(None, None)),
        (Operation::Noop, _) => Some(Transition::actor_only(actor)),
        _ => Option::None,
    }
}
