//! Traffic allocator tests

mod support;

use std::sync::Arc;

use bluegreen::deploy::registry::SlotRegistry;
use bluegreen::errors::EngineError;
use bluegreen::models::routing::ServiceRouting;
use bluegreen::models::slot::Slot;
use bluegreen::traffic::allocator::TrafficAllocator;

use support::{activate_slot, FakeRouter, SERVICES};

fn allocator(router: FakeRouter) -> (Arc<SlotRegistry>, Arc<FakeRouter>, TrafficAllocator) {
    let registry = Arc::new(SlotRegistry::new(SERVICES));
    let router = Arc::new(router);
    let traffic = TrafficAllocator::new(registry.clone(), router.clone());
    (registry, router, traffic)
}

#[tokio::test]
async fn test_unrouted_service_reads_zero() {
    let (_, _, traffic) = allocator(FakeRouter::new());

    assert_eq!(traffic.get("m1").unwrap(), ServiceRouting::default());
    assert!(matches!(traffic.get("m9"), Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_split_between_active_slots() {
    let (registry, router, traffic) = allocator(FakeRouter::new());
    activate_slot(&registry, "m1", Slot::Primary, "v1");
    activate_slot(&registry, "m1", Slot::Secondary, "v2");

    let applied = traffic.set_weights("m1", 70, 30).await.unwrap();

    assert_eq!(applied, ServiceRouting::new(70, 30));
    assert_eq!(traffic.get("m1").unwrap(), applied);
    assert_eq!(router.document().get("m1"), Some(&applied));
}

#[tokio::test]
async fn test_weights_must_add_up() {
    let (registry, router, traffic) = allocator(FakeRouter::new());
    activate_slot(&registry, "m1", Slot::Primary, "v1");
    activate_slot(&registry, "m1", Slot::Secondary, "v2");

    for (primary, secondary) in [(60, 30), (100, 1), (0, 0), (u32::MAX, 101)] {
        let result = traffic.set_weights("m1", primary, secondary).await;
        assert!(
            matches!(result, Err(EngineError::Conflict(_))),
            "{}/{} accepted",
            primary,
            secondary
        );
    }
    assert_eq!(traffic.get("m1").unwrap(), ServiceRouting::default());
    assert_eq!(router.stores(), 0);
}

#[tokio::test]
async fn test_weight_on_inactive_slot_is_conflict() {
    let (registry, _, traffic) = allocator(FakeRouter::new());
    activate_slot(&registry, "m1", Slot::Primary, "v1");

    let result = traffic.set_weights("m1", 50, 50).await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));

    // all traffic on the active slot is fine
    assert_eq!(
        traffic.set_weights("m1", 100, 0).await.unwrap(),
        ServiceRouting::new(100, 0)
    );
}

#[tokio::test]
async fn test_unknown_service_is_not_found() {
    let (_, _, traffic) = allocator(FakeRouter::new());
    let result = traffic.set_weights("m9", 100, 0).await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_busy_slot_is_conflict() {
    let (registry, _, traffic) = allocator(FakeRouter::new());
    activate_slot(&registry, "m1", Slot::Primary, "v1");

    let lease = registry.try_lease("m1", Slot::Primary).unwrap();
    let result = traffic.set_weights("m1", 100, 0).await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));

    drop(lease);
    assert!(traffic.set_weights("m1", 100, 0).await.is_ok());
}

#[tokio::test]
async fn test_router_failure_keeps_previous_weights() {
    let (registry, router, traffic) = allocator(FakeRouter::new());
    activate_slot(&registry, "m1", Slot::Primary, "v1");
    activate_slot(&registry, "m1", Slot::Secondary, "v2");
    traffic.set_weights("m1", 100, 0).await.unwrap();

    router.fail_store(true);
    let result = traffic.set_weights("m1", 0, 100).await;

    assert!(matches!(result, Err(EngineError::CollaboratorUnavailable(_))));
    assert_eq!(traffic.get("m1").unwrap(), ServiceRouting::new(100, 0));
    assert_eq!(router.document().get("m1"), Some(&ServiceRouting::new(100, 0)));

    // the next write starts from a fresh read of the router
    router.fail_store(false);
    let loads = router.loads();
    traffic.set_weights("m1", 0, 100).await.unwrap();
    assert_eq!(router.loads(), loads + 1);
    assert_eq!(traffic.get("m1").unwrap(), ServiceRouting::new(0, 100));
}

#[tokio::test]
async fn test_write_keeps_other_router_entries() {
    let router = FakeRouter::with_document(&[("dashboard", 100, 0)]);
    let (registry, router, traffic) = allocator(router);
    activate_slot(&registry, "m2", Slot::Secondary, "v1");

    traffic.set_weights("m2", 0, 100).await.unwrap();

    let document = router.document();
    assert_eq!(document.get("dashboard"), Some(&ServiceRouting::new(100, 0)));
    assert_eq!(document.get("m2"), Some(&ServiceRouting::new(0, 100)));
}

#[tokio::test]
async fn test_hydrate_adopts_consistent_entries() {
    let router = FakeRouter::with_document(&[
        ("m1", 0, 100),
        ("m2", 100, 0),
        ("m3", 40, 40),
        ("dashboard", 100, 0),
    ]);
    let (registry, _, traffic) = allocator(router);
    activate_slot(&registry, "m1", Slot::Secondary, "v3");
    activate_slot(&registry, "m3", Slot::Primary, "v1");
    activate_slot(&registry, "m3", Slot::Secondary, "v2");

    let adopted = traffic.hydrate().await.unwrap();

    assert_eq!(adopted, 1);
    assert_eq!(traffic.get("m1").unwrap(), ServiceRouting::new(0, 100));
    // m2 points at an idle slot, m3 does not add up
    assert_eq!(traffic.get("m2").unwrap(), ServiceRouting::default());
    assert_eq!(traffic.get("m3").unwrap(), ServiceRouting::default());
    assert_eq!(traffic.table().len(), 1);
}

#[tokio::test]
async fn test_hydrate_with_unreadable_router() {
    let router = FakeRouter::new();
    router.fail_load(true);
    let (_, _, traffic) = allocator(router);

    assert!(matches!(
        traffic.hydrate().await,
        Err(EngineError::CollaboratorUnavailable(_))
    ));
    assert!(traffic.table().is_empty());
}
