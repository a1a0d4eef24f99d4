// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two-sided contact relationships between participants.
//!
//! Every connection between two participants is represented by two records, one owned by each
//! side. Participants change them with operations like `invite`, `accept` or `block`, the
//! [`ConnectionManager`] takes care of computing the new state of _both_ sides and writing them
//! in one step, so that no reader ever sees a half-applied operation.
//!
//! ```text
//!   panda                  penguin
//!   ─────                  ───────
//!   None      invite  ──►  None
//!   Pending   ◄── accept   Invited
//!   Connected              Connected
//! ```
//!
//! ## Concurrency
//!
//! The manager holds no locks. Both records are read together with their versions, the
//! operation is validated against the states which were read and the changes are committed to
//! the [`RecordStore`](rapport_store::RecordStore) conditioned on these versions. If another
//! operation on the same pair won the race, the commit is rejected and the operation is
//! evaluated again from a fresh read, until it either succeeds, becomes invalid or the
//! configured number of attempts is exhausted.
//!
//! ## Blocking
//!
//! A participant who was blocked can't do anything with the connection anymore, while the
//! blocking participant can only refresh the block. Blocks are final, there is no operation to
//! lift them.
//!
//! ## Example
//!
//! ```rust
//! # use rapport_connections::{ActorId, Attributes, ConnectionManager, ConnectionRecord};
//! # use rapport_connections::{ConnectionState, MemoryDirectory, Operation};
//! # use rapport_store::MemoryStore;
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let panda = ActorId::new("panda")?;
//! let penguin = ActorId::new("penguin")?;
//!
//! let directory: MemoryDirectory = [panda.clone(), penguin.clone()].into_iter().collect();
//! let manager = ConnectionManager::new(MemoryStore::<ConnectionRecord>::new(), directory);
//!
//! let attributes = Attributes::new().with_type("colleague");
//! let state = manager
//!     .apply(&panda, &penguin, Operation::Invite, &attributes)
//!     .await?;
//! assert_eq!(state, ConnectionState::Pending);
//!
//! let state = manager
//!     .apply(&penguin, &panda, Operation::Accept, &Attributes::new())
//!     .await?;
//! assert_eq!(state, ConnectionState::Connected);
//! # Ok(())
//! # }
//! ```
mod config;
mod directory;
mod dispatcher;
mod error;
mod identity;
mod manager;
mod operation;
pub mod policy;
mod record;
pub mod resolver;
mod state;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_PAGE_SIZE, DispatchConfig, ManagerConfig};
pub use directory::{Directory, MemoryDirectory};
pub use dispatcher::{DispatchError, Dispatcher, Failure, Method, Outcome, Request};
pub use error::{ConnectionError, ErrorKind};
pub use identity::{ActorId, ActorIdError, MAX_ACTOR_ID_LEN};
pub use manager::ConnectionManager;
pub use operation::{Operation, UnknownOperation};
pub use record::{Attributes, ConnectionRecord};
pub use state::{ConnectionState, Transition, UnknownState, is_consistent, transition};
