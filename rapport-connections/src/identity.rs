// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of an identity in bytes.
pub const MAX_ACTOR_ID_LEN: usize = 256;

/// Opaque, unique identifier of a participant.
///
/// Identities get embedded into storage keys, this is why they can't be empty, can't contain
/// slashes or control characters and can't start with a dot.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorId(String);

impl ActorId {
    pub fn new(value: &str) -> Result<Self, ActorIdError> {
        if value.is_empty() {
            return Err(ActorIdError::Empty);
        }

        if value.len() > MAX_ACTOR_ID_LEN {
            return Err(ActorIdError::TooLong(value.len()));
        }

        if value.starts_with('.') {
            return Err(ActorIdError::LeadingDot);
        }

        if let Some(c) = value.chars().find(|c| *c == '/' || c.is_ascii_control()) {
            return Err(ActorIdError::InvalidCharacter(c));
        }

        Ok(Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActorId {
    type Err = ActorIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for ActorId {
    type Error = ActorIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ActorId> for String {
    fn from(actor_id: ActorId) -> Self {
        actor_id.0
    }
}

impl AsRef<str> for ActorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActorIdError {
    #[error("identity can't be empty")]
    Empty,

    #[error("identity is {0} bytes long, maximum is {max}", max = MAX_ACTOR_ID_LEN)]
    TooLong(usize),

    #[error("identity can't start with a dot")]
    LeadingDot,

    #[error("identity contains invalid character {0:?}")]
    InvalidCharacter(char),
}
