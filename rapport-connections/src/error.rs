// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::ActorId;
use crate::operation::Operation;
use crate::policy::Denial;
use crate::state::ConnectionState;

/// Errors returned when applying an operation or reading connections.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The target identity is not known.
    #[error("unknown target '{0}'")]
    UnknownTarget(ActorId),

    /// The operation can't be directed at this target, for example the actor itself.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The operation is not allowed from the current state.
    #[error("can't {operation} connection with '{target}' while it is {actor_state} ({target_state} on their side)")]
    InvalidTransition {
        target: ActorId,
        operation: Operation,
        actor_state: ConnectionState,
        target_state: ConnectionState,
    },

    /// The actor is not permitted to perform the operation.
    #[error("'{actor}' may not {operation} '{target}': {reason}")]
    Forbidden {
        actor: ActorId,
        target: ActorId,
        operation: Operation,
        reason: Denial,
    },

    /// Concurrent changes kept invalidating the operation until we gave up.
    #[error("connection between '{actor}' and '{target}' kept changing, gave up after {attempts} attempts")]
    Conflict {
        actor: ActorId,
        target: ActorId,
        attempts: usize,
    },

    /// Record store or identity directory failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::UnknownTarget(_) => ErrorKind::UnknownTarget,
            ConnectionError::InvalidTarget(_) => ErrorKind::InvalidTarget,
            ConnectionError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            ConnectionError::Forbidden { .. } => ErrorKind::Forbidden,
            ConnectionError::Conflict { .. } => ErrorKind::Conflict,
            ConnectionError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
        }
    }

    /// Returns `true` if re-attempting the same operation later might succeed.
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

/// Category of a [`ConnectionError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownTarget,
    InvalidTarget,
    InvalidTransition,
    Forbidden,
    Conflict,
    StoreUnavailable,
}

impl ErrorKind {
    /// Transient errors may be retried with backoff, permanent ones must not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Conflict | ErrorKind::StoreUnavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownTarget => "unknown_target",
            ErrorKind::InvalidTarget => "invalid_target",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::StoreUnavailable => "store_unavailable",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
