// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entry point turning incoming requests into connection operations.
//!
//! Requests address a connection through a virtual path of the form
//! `<target>.<selector>[.<extension>]`, for example `penguin.invite.json`. Unknown or missing
//! selectors are treated as `noop`, which never changes any state. Only `Post` requests are
//! allowed to change state, any other request is treated as `noop` regardless of its selector.
use std::collections::BTreeMap;

use rapport_store::RecordStore;
use serde::Serialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::directory::Directory;
use crate::error::{ConnectionError, ErrorKind};
use crate::identity::ActorId;
use crate::manager::ConnectionManager;
use crate::operation::Operation;
use crate::record::{Attributes, ConnectionRecord, insert_tag};
use crate::state::ConnectionState;

const TYPES_PARAMETER: &str = "types";
const TO_RELATIONSHIPS_PARAMETER: &str = "to_relationships";
const FROM_RELATIONSHIPS_PARAMETER: &str = "from_relationships";

/// How a request was sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Method {
    /// Reading request, never changes any state.
    #[default]
    Get,

    /// Request allowed to apply the operation named by its selector.
    Post,
}

/// Incoming request for a connection operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    /// Authenticated participant sending the request, `None` for anonymous requests.
    pub actor: Option<ActorId>,

    pub method: Method,

    /// Identity of the participant the operation is directed at.
    pub target: String,

    /// Operation selector, `None` if the request didn't name any.
    pub selector: Option<String>,

    /// Request parameters, every name can occur multiple times.
    pub parameters: BTreeMap<String, Vec<String>>,
}

impl Request {
    pub fn new(
        actor: Option<ActorId>,
        method: Method,
        target: &str,
        selector: Option<&str>,
    ) -> Self {
        Self {
            actor,
            method,
            target: target.to_owned(),
            selector: selector.map(str::to_owned),
            parameters: BTreeMap::new(),
        }
    }

    /// Builds a request from a virtual path like `penguin.invite.json`.
    ///
    /// The first dot-separated segment is the target and the second the selector, everything
    /// after is ignored. Identities containing dots can't be addressed this way, use
    /// [`Request::new`] for them.
    pub fn from_path(actor: Option<ActorId>, method: Method, path: &str) -> Self {
        let path = path.trim_start_matches('/');
        let mut segments = path.split('.');
        let target = segments.next().unwrap_or_default();
        let selector = segments.next().filter(|selector| !selector.is_empty());
        Self::new(actor, method, target, selector)
    }

    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        self.parameters
            .entry(name.to_owned())
            .or_default()
            .push(value.to_owned());
        self
    }

    /// Operation to apply, `Noop` for anything but `Post` requests.
    pub fn operation(&self) -> Operation {
        if self.method != Method::Post {
            return Operation::Noop;
        }

        self.selector
            .as_deref()
            .map(Operation::parse)
            .unwrap_or(Operation::Noop)
    }

    /// Collects the operation attributes from the request parameters.
    ///
    /// Relationship types take all values of their parameter, any other parameter contributes
    /// its first value as a property.
    pub fn attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();

        for (name, values) in &self.parameters {
            let tags = match name.as_str() {
                TYPES_PARAMETER => &mut attributes.types,
                TO_RELATIONSHIPS_PARAMETER => &mut attributes.to_relationships,
                FROM_RELATIONSHIPS_PARAMETER => &mut attributes.from_relationships,
                _ => {
                    if let Some(value) = values.first() {
                        attributes.properties.insert(name.clone(), value.clone());
                    }
                    continue;
                }
            };

            for value in values {
                insert_tag(tags, value);
            }
        }

        attributes
    }
}

/// Errors occurring while interpreting a request, before any operation is applied.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("request is not authenticated")]
    Unauthenticated,

    #[error("invalid target '{0}'")]
    InvalidTarget(String),
}

/// Externally visible result of a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Outcome {
    /// HTTP-style status code.
    pub status: u16,

    /// Actor's state after the operation, only set on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ConnectionState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Machine readable category, for example `forbidden`.
    pub kind: &'static str,

    pub message: String,

    /// `true` if the same request might succeed when sent again later.
    pub retryable: bool,
}

impl Outcome {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const CONFLICT: u16 = 409;
    pub const SERVICE_UNAVAILABLE: u16 = 503;

    pub fn success(state: Option<ConnectionState>) -> Self {
        Self {
            status: Self::OK,
            state,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl From<&ConnectionError> for Outcome {
    fn from(err: &ConnectionError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::UnknownTarget => Outcome::NOT_FOUND,
            ErrorKind::InvalidTarget | ErrorKind::InvalidTransition => Outcome::BAD_REQUEST,
            ErrorKind::Forbidden => Outcome::FORBIDDEN,
            ErrorKind::Conflict => Outcome::CONFLICT,
            ErrorKind::StoreUnavailable => Outcome::SERVICE_UNAVAILABLE,
        };

        Self {
            status,
            state: None,
            error: Some(Failure {
                kind: kind.as_str(),
                message: err.to_string(),
                retryable: kind.is_transient(),
            }),
        }
    }
}

impl From<&DispatchError> for Outcome {
    fn from(err: &DispatchError) -> Self {
        let (status, kind) = match err {
            DispatchError::Unauthenticated => (Outcome::UNAUTHORIZED, "unauthenticated"),
            DispatchError::InvalidTarget(_) => {
                (Outcome::BAD_REQUEST, ErrorKind::InvalidTarget.as_str())
            }
        };

        Self {
            status,
            state: None,
            error: Some(Failure {
                kind,
                message: err.to_string(),
                retryable: false,
            }),
        }
    }
}

/// Validated request, ready to be applied.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Command {
    actor: ActorId,
    target: Option<ActorId>,
    operation: Operation,
    attributes: Attributes,
}

impl TryFrom<&Request> for Command {
    type Error = DispatchError;

    fn try_from(request: &Request) -> Result<Self, Self::Error> {
        let actor = request
            .actor
            .clone()
            .ok_or(DispatchError::Unauthenticated)?;
        let operation = request.operation();

        let target = match ActorId::new(&request.target) {
            Ok(target) => Some(target),
            // A noop is answered even without a usable target.
            Err(_) if operation == Operation::Noop => None,
            Err(_) => return Err(DispatchError::InvalidTarget(request.target.clone())),
        };

        Ok(Self {
            actor,
            target,
            operation,
            attributes: request.attributes(),
        })
    }
}

/// Routes requests to the connection manager and retries transient failures.
#[derive(Clone, Debug)]
pub struct Dispatcher<S, D> {
    manager: ConnectionManager<S, D>,
    config: DispatchConfig,
}

impl<S, D> Dispatcher<S, D>
where
    S: RecordStore<ConnectionRecord>,
    D: Directory,
{
    pub fn new(manager: ConnectionManager<S, D>) -> Self {
        Self::from_config(manager, DispatchConfig::default())
    }

    pub fn from_config(manager: ConnectionManager<S, D>, config: DispatchConfig) -> Self {
        Self { manager, config }
    }

    pub fn manager(&self) -> &ConnectionManager<S, D> {
        &self.manager
    }

    /// Handles a request and maps its result to an [`Outcome`].
    pub async fn dispatch(&self, request: &Request) -> Outcome {
        let command = match Command::try_from(request) {
            Ok(command) => command,
            Err(err) => {
                debug!(request_target = %request.target, %err, "rejected request");
                return Outcome::from(&err);
            }
        };

        let Some(target) = &command.target else {
            return Outcome::success(None);
        };

        match self.apply_with_retries(&command, target).await {
            Ok(state) => Outcome::success(Some(state)),
            Err(err) => Outcome::from(&err),
        }
    }

    async fn apply_with_retries(
        &self,
        command: &Command,
        target: &ActorId,
    ) -> Result<ConnectionState, ConnectionError> {
        let Command {
            actor,
            operation,
            attributes,
            ..
        } = command;

        if operation.is_mutating() {
            info!(%actor, %target, %operation, "dispatching connection operation");
        }

        let mut backoff = self.config.initial_backoff;
        let mut retries = 0;

        loop {
            let err = match self
                .manager
                .apply(actor, target, *operation, attributes)
                .await
            {
                Ok(state) => return Ok(state),
                Err(err) => err,
            };

            if !err.is_transient() || retries >= self.config.max_retries {
                warn!(%actor, %target, %operation, kind = %err.kind(), %err, "operation failed");
                return Err(err);
            }

            retries += 1;
            warn!(
                %actor,
                %target,
                %operation,
                %err,
                retries,
                backoff_ms = backoff.as_millis() as u64,
                "transient failure, retrying"
            );
            sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use crate::config::{DispatchConfig, ManagerConfig};
    use crate::identity::ActorId;
    use crate::operation::Operation;
    use crate::state::ConnectionState;
    use crate::test_utils::{FaultyStore, TestNetwork, setup_logging};

    use super::{DispatchError, Dispatcher, Method, Outcome, Request};

    fn fast_retries(max_retries: usize) -> DispatchConfig {
        DispatchConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn parse_virtual_paths() {
        let panda = ActorId::new("panda").unwrap();
        let post = |path: &str| Request::from_path(Some(panda.clone()), Method::Post, path);

        let request = post("/penguin.invite.json");
        assert_eq!(request.target, "penguin");
        assert_eq!(request.operation(), Operation::Invite);

        let request = post("penguin");
        assert_eq!(request.selector, None);
        assert_eq!(request.operation(), Operation::Noop);

        let request = post("penguin.befriend.html");
        assert_eq!(request.operation(), Operation::Noop);

        let request = post(".remove");
        assert_eq!(request.target, "");
        assert_eq!(request.operation(), Operation::Remove);

        // Selectors of reading requests are ignored.
        let request = Request::from_path(Some(panda.clone()), Method::Get, "penguin.invite.json");
        assert_eq!(request.selector.as_deref(), Some("invite"));
        assert_eq!(request.operation(), Operation::Noop);
    }

    #[test]
    fn parameters_become_attributes() {
        let request = Request::from_path(None, Method::Post, "penguin.invite")
            .with_parameter("types", "colleague")
            .with_parameter("types", " friend ")
            .with_parameter("types", "")
            .with_parameter("to_relationships", "supervisor")
            .with_parameter("from_relationships", "supervisee")
            .with_parameter("note", "met at the zoo")
            .with_parameter("note", "ignored");

        let attributes = request.attributes();
        assert_eq!(
            attributes.types.iter().collect::<Vec<_>>(),
            vec!["colleague", "friend"]
        );
        assert!(attributes.to_relationships.contains("supervisor"));
        assert!(attributes.from_relationships.contains("supervisee"));
        assert_eq!(attributes.properties["note"], "met at the zoo");
        assert_eq!(attributes.properties.len(), 1);
    }

    #[tokio::test]
    async fn rejects_malformed_requests() {
        setup_logging();
        let network = TestNetwork::new(&["panda", "penguin"]);
        let dispatcher = Dispatcher::new(network.manager.clone());

        let outcome = dispatcher
            .dispatch(&Request::from_path(None, Method::Post, "penguin.invite"))
            .await;
        assert_eq!(outcome, Outcome::from(&DispatchError::Unauthenticated));
        assert_eq!(outcome.status, Outcome::UNAUTHORIZED);

        let outcome = dispatcher
            .dispatch(&Request::from_path(Some(network.actor("panda")), Method::Post, ".invite"))
            .await;
        assert_eq!(outcome.status, Outcome::BAD_REQUEST);
        assert_eq!(outcome.error.unwrap().kind, "invalid_target");

        // Nothing was written.
        assert_eq!(network.manager.store().len(), 0);
    }

    #[tokio::test]
    async fn noop_passes_through() {
        let network = TestNetwork::new(&["panda", "penguin"]);
        let dispatcher = Dispatcher::new(network.manager.clone());
        let panda = network.actor("panda");

        let outcome = dispatcher
            .dispatch(&Request::from_path(Some(panda.clone()), Method::Post, "penguin.html"))
            .await;
        assert_eq!(outcome, Outcome::success(Some(ConnectionState::None)));

        // No target needed and unknown selectors are treated like noop.
        let outcome = dispatcher
            .dispatch(&Request::from_path(Some(panda.clone()), Method::Post, ".everything"))
            .await;
        assert_eq!(outcome, Outcome::success(None));

        let outcome = dispatcher
            .dispatch(&Request::from_path(Some(panda), Method::Post, "walrus.delete"))
            .await;
        assert_eq!(outcome, Outcome::success(Some(ConnectionState::None)));
        assert_eq!(network.manager.store().len(), 0);
    }

    #[tokio::test]
    async fn get_requests_never_write() {
        let network = TestNetwork::new(&["panda", "penguin"]);
        let dispatcher = Dispatcher::new(network.manager.clone());
        let panda = network.actor("panda");

        let outcome = dispatcher
            .dispatch(&Request::from_path(
                Some(panda.clone()),
                Method::Get,
                "penguin.invite.json",
            ))
            .await;
        assert_eq!(outcome, Outcome::success(Some(ConnectionState::None)));
        assert!(network.manager.store().is_empty());

        let outcome = dispatcher
            .dispatch(&Request::from_path(
                Some(panda),
                Method::Post,
                "penguin.invite.json",
            ))
            .await;
        assert_eq!(outcome, Outcome::success(Some(ConnectionState::Pending)));
    }

    #[tokio::test]
    async fn maps_errors_to_status() {
        setup_logging();
        let network = TestNetwork::new(&["panda", "penguin", "walrus"]);
        let dispatcher = Dispatcher::from_config(network.manager.clone(), fast_retries(0));
        let panda = network.actor("panda");
        let penguin = network.actor("penguin");

        let dispatch = |actor: &ActorId, path: &str| {
            let request = Request::from_path(Some(actor.clone()), Method::Post, path);
            let dispatcher = dispatcher.clone();
            async move { dispatcher.dispatch(&request).await }
        };

        assert_eq!(dispatch(&panda, "seal.invite").await.status, Outcome::NOT_FOUND);
        assert_eq!(dispatch(&panda, "panda.invite").await.status, Outcome::BAD_REQUEST);
        assert_eq!(dispatch(&panda, "penguin.accept").await.status, Outcome::BAD_REQUEST);

        let outcome = dispatch(&panda, "penguin.invite").await;
        assert_eq!(outcome, Outcome::success(Some(ConnectionState::Pending)));

        let outcome = dispatch(&penguin, "panda.block").await;
        assert_eq!(outcome, Outcome::success(Some(ConnectionState::Blocked)));

        let outcome = dispatch(&panda, "penguin.invite").await;
        assert_eq!(outcome.status, Outcome::FORBIDDEN);
        let failure = outcome.error.unwrap();
        assert_eq!(failure.kind, "forbidden");
        assert!(!failure.retryable);
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        setup_logging();
        let network = TestNetwork::new(&["panda", "penguin"]);
        let store = FaultyStore::new(network.manager.store().clone());
        let manager = network.manager_with(
            store.clone(),
            ManagerConfig {
                max_attempts: 1,
                ..ManagerConfig::default()
            },
        );
        let panda = network.actor("panda");

        // Every attempt of the manager runs into a conflict, the dispatcher retries twice.
        store.inject_conflicts(2);
        let dispatcher = Dispatcher::from_config(manager.clone(), fast_retries(2));
        let outcome = dispatcher
            .dispatch(&Request::from_path(Some(panda.clone()), Method::Post, "penguin.invite"))
            .await;
        assert_eq!(outcome, Outcome::success(Some(ConnectionState::Pending)));
        assert_eq!(store.commits(), 3);

        // Retries are exhausted, the conflict is reported as retryable.
        store.inject_conflicts(5);
        let dispatcher = Dispatcher::from_config(manager.clone(), fast_retries(1));
        let outcome = dispatcher
            .dispatch(&Request::from_path(Some(panda.clone()), Method::Post, "penguin.cancel"))
            .await;
        assert_eq!(outcome.status, Outcome::CONFLICT);
        assert_matches!(outcome.error, Some(failure) if failure.retryable);
        assert_eq!(store.commits(), 5);

        // Unavailable storage is retried as well.
        store.set_offline(true);
        let outcome = dispatcher
            .dispatch(&Request::from_path(Some(panda.clone()), Method::Post, "penguin.cancel"))
            .await;
        assert_eq!(outcome.status, Outcome::SERVICE_UNAVAILABLE);
        store.set_offline(false);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let network = TestNetwork::new(&["panda", "penguin"]);
        let store = FaultyStore::new(network.manager.store().clone());
        let manager = network.manager_with(store.clone(), ManagerConfig::default());
        let dispatcher = Dispatcher::from_config(manager, fast_retries(3));

        let outcome = dispatcher
            .dispatch(&Request::from_path(
                Some(network.actor("panda")),
                Method::Post,
                "penguin.remove",
            ))
            .await;
        assert_eq!(outcome.status, Outcome::BAD_REQUEST);
        assert_eq!(outcome.error.unwrap().kind, "invalid_transition");
        assert_eq!(store.commits(), 0);
    }
}
