// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operations participants can perform on a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Invite the other participant to connect.
    Invite,

    /// Accept the invitation from the other participant.
    Accept,

    /// Refuse the invitation from the other participant.
    Reject,

    /// Dismiss the invitation from the other participant without telling them.
    Ignore,

    /// Ignore this and any future invitations from the other participant.
    Block,

    /// Remove the invitation or connection, allowing future connections.
    Remove,

    /// Withdraw a pending invitation to the other participant.
    Cancel,

    /// Do nothing.
    Noop,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::Invite,
        Operation::Accept,
        Operation::Reject,
        Operation::Ignore,
        Operation::Block,
        Operation::Remove,
        Operation::Cancel,
        Operation::Noop,
    ];

    /// Parses an operation selector, falling back to `Noop` for anything unknown.
    ///
    /// Callers probing selectors we don't know about receive a harmless no-op instead of an
    /// error.
    pub fn parse(selector: &str) -> Self {
        selector.parse().unwrap_or(Operation::Noop)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Invite => "invite",
            Operation::Accept => "accept",
            Operation::Reject => "reject",
            Operation::Ignore => "ignore",
            Operation::Block => "block",
            Operation::Remove => "remove",
            Operation::Cancel => "cancel",
            Operation::Noop => "noop",
        }
    }

    /// Returns `true` if this operation may change connection state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Operation::Noop)
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|operation| operation.as_str() == value)
            .ok_or_else(|| UnknownOperation(value.to_owned()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown operation '{0}'")]
pub struct UnknownOperation(pub String);
