//! Membership protocol tests against a real coordination service.
//!
//! These require etcd listening on localhost:2379 and are ignored by default:
//!
//! ```text
//! cargo test -p taskfleet-common -- --ignored
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use taskfleet_common::membership::{Membership, MembershipConfig, LEASE_TTL_SECS};
use taskfleet_common::store::{CoordStore, StoreKey};
use taskfleet_common::types::{MembershipEvent, WorkerId};

const ETCD_ENDPOINT: &str = "http://localhost:2379";
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn fresh_store() -> CoordStore {
    let store = CoordStore::connect(&[ETCD_ENDPOINT.to_string()])
        .await
        .expect("failed to connect to etcd");
    store
        .delete_prefix(&StoreKey::MembersPrefix.resolve())
        .await
        .unwrap();
    store
        .delete_prefix(&StoreKey::MetricsEndpointsPrefix.resolve())
        .await
        .unwrap();
    store
}

fn membership(store: CoordStore, id: &WorkerId) -> Membership {
    Membership::new(
        store,
        MembershipConfig {
            worker_id: id.clone(),
            lease_ttl_secs: LEASE_TTL_SECS,
            metrics_endpoint: "localhost:11111".to_string(),
        },
    )
}

#[tokio::test]
#[ignore = "requires etcd on localhost:2379"]
async fn snapshot_delivers_self_as_initial_join() {
    let store = fresh_store().await;
    let id = WorkerId::generate();
    let membership = membership(store, &id);

    let registration = membership.register().await.unwrap();

    let cancel = CancellationToken::new();
    let mut events = membership.subscribe(cancel.clone()).await.unwrap();

    let first = tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("no initial event")
        .unwrap();
    assert_eq!(first, MembershipEvent::Joined(id));

    cancel.cancel();
    membership.deregister(registration.lease_id).await;
}

#[tokio::test]
#[ignore = "requires etcd on localhost:2379"]
async fn peer_join_and_leave_are_observed_in_order() {
    let store = fresh_store().await;

    let id_a = WorkerId::generate();
    let member_a = membership(store.clone(), &id_a);
    let reg_a = member_a.register().await.unwrap();

    let cancel = CancellationToken::new();
    let mut events = member_a.subscribe(cancel.clone()).await.unwrap();
    let first = tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, MembershipEvent::Joined(id_a.clone()));

    let id_b = WorkerId::generate();
    let member_b = membership(store.clone(), &id_b);
    let reg_b = member_b.register().await.unwrap();

    let second = tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, MembershipEvent::Joined(id_b.clone()));

    member_b.deregister(reg_b.lease_id).await;

    let third = tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(third, MembershipEvent::Left(id_b));

    cancel.cancel();
    member_a.deregister(reg_a.lease_id).await;
}

#[tokio::test]
#[ignore = "requires etcd on localhost:2379"]
async fn register_advertises_metrics_endpoint() {
    let store = fresh_store().await;
    let id = WorkerId::generate();
    let membership = membership(store.clone(), &id);

    let registration = membership.register().await.unwrap();

    let (kvs, _) = store
        .get_prefix(&StoreKey::MetricsEndpointsPrefix.resolve())
        .await
        .unwrap();
    let key = StoreKey::MetricsEndpoint(&id).resolve();
    assert!(
        kvs.iter()
            .any(|(k, v)| k == &key && v == "localhost:11111"),
        "metrics endpoint not advertised: {kvs:?}"
    );

    membership.deregister(registration.lease_id).await;
}

#[tokio::test]
#[ignore = "requires etcd on localhost:2379"]
async fn stale_record_is_replaced_on_reregistration() {
    let store = fresh_store().await;
    let id = WorkerId::generate();

    // First incarnation registers and dies without revoking.
    let first = membership(store.clone(), &id);
    first.register().await.unwrap();

    // Second incarnation with the same id must take over without waiting
    // out the old lease.
    let second = membership(store.clone(), &id);
    let registration = second.register().await.unwrap();

    let (kvs, _) = store
        .get_prefix(&StoreKey::MembersPrefix.resolve())
        .await
        .unwrap();
    assert_eq!(kvs.len(), 1);

    second.deregister(registration.lease_id).await;
}
