//! Store-level property tests against a real `PostgresStore`. These
//! require a reachable Postgres instance (`DATABASE_URL`) the way the
//! teacher crate's own `sqlx`-backed tests do, so they're gated behind
//! the `integration-tests` feature and marked `#[ignore]`. The same
//! properties run un-gated against `MemoryStore` in each module's own
//! `#[cfg(test)]` block.

#![cfg(feature = "integration-tests")]

use ipnetwork::IpNetwork;
use std::str::FromStr;
use tinfoilhat::error::StoreError;
use tinfoilhat::store::model::{NewFlag, Team};
use tinfoilhat::store::{PostgresStore, Store};

async fn open() -> PostgresStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let store = PostgresStore::open(&url, 5, 1).await.expect("connect to test database");
    store.migrate().await.expect("run migrations");
    store
}

fn team(subnet: &str) -> Team {
    Team {
        id: uuid::Uuid::new_v4(),
        name: subnet.to_string(),
        subnet: IpNetwork::from_str(subnet).unwrap(),
        vulnbox: "10.0.0.2".into(),
        netbox: None,
        use_netbox: false,
    }
}

#[tokio::test]
#[ignore]
async fn property_2_at_most_one_capture_per_flag() {
    let store = open().await;
    let defender = team("10.50.1.0/24");
    let attacker = team("10.50.2.0/24");
    store.add_team(&defender).await.unwrap();
    store.add_team(&attacker).await.unwrap();
    let round = store.new_round(120).await.unwrap();
    let flag = store
        .add_flag(NewFlag {
            token: uuid::Uuid::new_v4().to_string(),
            round,
            team_id: defender.id,
            service_id: uuid::Uuid::new_v4(),
            cred: None,
        })
        .await
        .unwrap();

    store.capture_flag(flag.id, attacker.id).await.unwrap();
    let err = store.capture_flag(flag.id, attacker.id).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyCaptured));
}

#[tokio::test]
#[ignore]
async fn property_3_self_capture_rejected() {
    let store = open().await;
    let defender = team("10.50.3.0/24");
    store.add_team(&defender).await.unwrap();
    let round = store.new_round(120).await.unwrap();
    let flag = store
        .add_flag(NewFlag {
            token: uuid::Uuid::new_v4().to_string(),
            round,
            team_id: defender.id,
            service_id: uuid::Uuid::new_v4(),
            cred: None,
        })
        .await
        .unwrap();

    let err = store.capture_flag(flag.id, defender.id).await.unwrap_err();
    assert!(matches!(err, StoreError::SelfCapture));
}

#[tokio::test]
#[ignore]
async fn status_history_preserves_insertion_order() {
    let store = open().await;
    let team = team("10.50.4.0/24");
    store.add_team(&team).await.unwrap();
    let round = store.new_round(120).await.unwrap();
    let service_id = uuid::Uuid::new_v4();

    use tinfoilhat::store::model::ServiceState::{Down, Mumble, Up};
    for state in [Up, Up, Mumble, Down] {
        store.put_status(round, team.id, service_id, state).await.unwrap();
    }

    let history = store.get_states(round, team.id, service_id).await.unwrap();
    assert_eq!(history, vec![Up, Up, Mumble, Down]);
}
