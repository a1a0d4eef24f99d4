// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authorization rules for connection operations.
//!
//! The policy only looks at recorded states, it does not know about the transition table. An
//! operation can be permitted by the policy and still be invalid for the current state.
use thiserror::Error;
use tracing::trace;

use crate::identity::ActorId;
use crate::operation::Operation;
use crate::state::ConnectionState;

/// Reason why an actor may not perform an operation.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Denial {
    /// The actor blocked the target and may only refresh the block.
    #[error("actor has blocked the target, only '{}' is permitted", Operation::Block)]
    ActorBlocked,

    /// The target blocked the actor.
    #[error("target has blocked the actor")]
    BlockedByTarget,
}

/// Decides whether an actor may perform an operation.
///
/// `actor_state` is the actor's own view on the connection and `target_state` is the target's
/// view pointing back at the actor. Both are read from the store.
///
/// Self-targeting is rejected before the policy is consulted.
pub fn authorize(
    actor: &ActorId,
    actor_state: ConnectionState,
    target_state: ConnectionState,
    operation: Operation,
) -> Result<(), Denial> {
    let result = match operation {
        Operation::Noop => Ok(()),
        Operation::Block => Ok(()),
        _ if actor_state == ConnectionState::Blocked => Err(Denial::ActorBlocked),
        _ if target_state == ConnectionState::Blocked => Err(Denial::BlockedByTarget),
        _ => Ok(()),
    };

    if let Err(denial) = result {
        trace!(%actor, %operation, %actor_state, %target_state, %denial, "operation denied");
    }

    result
}

#[cfg(test)]
mod tests {
    use crate::identity::ActorId;
    use crate::operation::Operation;
    use crate::state::ConnectionState;

    use super::{Denial, authorize};

    #[test]
    fn blocked_actor_may_only_block() {
        let actor = ActorId::new("panda").unwrap();

        for operation in Operation::ALL {
            let result = authorize(
                &actor,
                ConnectionState::Blocked,
                ConnectionState::None,
                operation,
            );

            match operation {
                Operation::Block | Operation::Noop => assert_eq!(result, Ok(())),
                _ => assert_eq!(result, Err(Denial::ActorBlocked)),
            }
        }
    }

    #[test]
    fn blocking_target_denies_everything_but_block() {
        let actor = ActorId::new("panda").unwrap();

        for operation in Operation::ALL {
            let result = authorize(
                &actor,
                ConnectionState::None,
                ConnectionState::Blocked,
                operation,
            );

            match operation {
                Operation::Block | Operation::Noop => assert_eq!(result, Ok(())),
                _ => assert_eq!(result, Err(Denial::BlockedByTarget)),
            }
        }
    }

    #[test]
    fn unblocked_pairs_are_permitted() {
        let actor = ActorId::new("panda").unwrap();

        for actor_state in ConnectionState::ALL {
            if actor_state == ConnectionState::Blocked {
                continue;
            }

            for target_state in ConnectionState::ALL {
                if target_state == ConnectionState::Blocked {
                    continue;
                }

                for operation in Operation::ALL {
                    assert_eq!(
                        authorize(&actor, actor_state, target_state, operation),
                        Ok(())
                    );
                }
            }
        }
    }
}
