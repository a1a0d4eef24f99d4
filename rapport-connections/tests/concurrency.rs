// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use assert_matches::assert_matches;
use rapport_connections::test_utils::{TestNetwork, setup_logging};
use rapport_connections::{
    ActorId, Attributes, ConnectionError, ConnectionState, Operation, is_consistent,
};
use tokio::sync::Barrier;
use tokio::task::JoinSet;

/// Runs the same operation from many tasks at once and returns all results.
async fn race(
    network: &TestNetwork,
    operations: Vec<(ActorId, ActorId, Operation)>,
) -> Vec<Result<ConnectionState, ConnectionError>> {
    let barrier = Arc::new(Barrier::new(operations.len()));
    let mut tasks = JoinSet::new();

    for (actor, target, operation) in operations {
        let manager = network.manager.clone();
        let barrier = barrier.clone();
        tasks.spawn(async move {
            barrier.wait().await;
            manager
                .apply(&actor, &target, operation, &Attributes::new())
                .await
        });
    }

    tasks.join_all().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invites_on_fresh_pair() {
    setup_logging();

    let network = TestNetwork::new(&["panda", "penguin"]);
    let panda = network.actor("panda");
    let penguin = network.actor("penguin");

    let operations = (0..100)
        .map(|_| (panda.clone(), penguin.clone(), Operation::Invite))
        .collect();
    let results = race(&network, operations).await;

    let successes = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(successes, 1);

    for result in results {
        match result {
            Ok(state) => assert_eq!(state, ConnectionState::Pending),
            Err(err) => assert_matches!(
                err,
                ConnectionError::InvalidTransition { .. } | ConnectionError::Conflict { .. }
            ),
        }
    }

    assert_eq!(
        network.manager.states(&panda, &penguin).await.unwrap(),
        (ConnectionState::Pending, ConnectionState::Invited)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn accept_races_cancel() {
    setup_logging();

    let network = TestNetwork::new(&["panda", "penguin"]);
    let panda = network.actor("panda");
    let penguin = network.actor("penguin");
    let none = Attributes::new();

    for _ in 0..20 {
        network
            .manager
            .apply(&panda, &penguin, Operation::Invite, &none)
            .await
            .unwrap();

        let results = race(
            &network,
            vec![
                (penguin.clone(), panda.clone(), Operation::Accept),
                (panda.clone(), penguin.clone(), Operation::Cancel),
            ],
        )
        .await;
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);

        // Either the invitation was accepted or withdrawn, never a mix of both.
        let states = network.manager.states(&panda, &penguin).await.unwrap();
        match states {
            (ConnectionState::Connected, ConnectionState::Connected) => {
                network
                    .manager
                    .apply(&penguin, &panda, Operation::Remove, &none)
                    .await
                    .unwrap();
            }
            (ConnectionState::None, ConnectionState::None) => (),
            states => panic!("inconsistent states {states:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remove_races_invites() {
    setup_logging();

    let network = TestNetwork::new(&["panda", "penguin"]);
    let manager = &network.manager;
    let panda = network.actor("panda");
    let penguin = network.actor("penguin");
    let none = Attributes::new();

    for _ in 0..20 {
        manager
            .apply(&panda, &penguin, Operation::Invite, &none)
            .await
            .unwrap();
        manager
            .apply(&penguin, &panda, Operation::Accept, &none)
            .await
            .unwrap();

        let results = race(
            &network,
            vec![
                (panda.clone(), penguin.clone(), Operation::Remove),
                (panda.clone(), penguin.clone(), Operation::Invite),
                (penguin.clone(), panda.clone(), Operation::Invite),
            ],
        )
        .await;
        // Results arrive in completion order, only the removal ends in `None`.
        let removed = results
            .iter()
            .filter(|result| matches!(result, Ok(ConnectionState::None)))
            .count();
        assert_eq!(removed, 1);
        assert!(results.iter().filter(|result| result.is_ok()).count() <= 2);

        // Invites only succeed on the removed connection, and only one of them.
        let (state_panda, state_penguin) = manager.states(&panda, &penguin).await.unwrap();
        assert!(
            is_consistent(state_panda, state_penguin),
            "panda is {state_panda} while penguin is {state_penguin}"
        );
        match (state_panda, state_penguin) {
            (ConnectionState::None, ConnectionState::None) => (),
            (ConnectionState::Pending, ConnectionState::Invited) => {
                manager
                    .apply(&panda, &penguin, Operation::Cancel, &none)
                    .await
                    .unwrap();
            }
            (ConnectionState::Invited, ConnectionState::Pending) => {
                manager
                    .apply(&penguin, &panda, Operation::Cancel, &none)
                    .await
                    .unwrap();
            }
            states => panic!("unexpected states {states:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_pairs_do_not_interfere() {
    let names: Vec<String> = (0..50).map(|i| format!("user-{i}")).collect();
    let mut all: Vec<&str> = names.iter().map(String::as_str).collect();
    all.push("panda");

    let network = TestNetwork::new(&all);
    let panda = network.actor("panda");

    let operations = names
        .iter()
        .map(|name| (panda.clone(), network.actor(name), Operation::Invite))
        .collect();
    let results = race(&network, operations).await;
    assert!(results.iter().all(|result| result.is_ok()));

    for name in &names {
        assert_eq!(
            network
                .manager
                .states(&panda, &network.actor(name))
                .await
                .unwrap(),
            (ConnectionState::Pending, ConnectionState::Invited)
        );
    }
}
