use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flo_water::{FloGateway, FloSession, PollCoordinator, StateCache, ValveState};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn auth_mock() -> Mock {
    Mock::given(method("POST"))
        .and(path("/api/v1/users/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok-1",
            "tokenPayload": {"user": {"user_id": "user-1"}}
        })))
}

fn user_record() -> serde_json::Value {
    json!({
        "id": "user-1",
        "locations": [{
            "id": "loc-1",
            "nickname": "Home",
            "devices": [{"id": "dev-1"}, {"id": "dev-2"}],
            "systemMode": {"target": "home", "lastKnown": "home"}
        }]
    })
}

fn device_record(id: &str, gpm: f64, valve_target: &str) -> serde_json::Value {
    json!({
        "id": id,
        "macAddress": format!("mac-{id}"),
        "location": {"id": "loc-1"},
        "telemetry": {"current": {"gpm": gpm, "psi": 60.0, "tempF": 70.0}},
        "valve": {"target": valve_target, "lastKnown": valve_target}
    })
}

async fn mount_happy_path(server: &MockServer) {
    auth_mock().mount(server).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/users/user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_record()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record("dev-1", 1.5, "open")))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/devices/dev-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record("dev-2", 0.0, "closed")))
        .mount(server)
        .await;
}

async fn connected_gateway(server: &MockServer) -> Arc<FloGateway> {
    let gateway = FloGateway::builder("user@example.com", "secret")
        .base_url(server.uri())
        .build();
    gateway.connect().await.expect("connect should succeed");
    Arc::new(gateway)
}

#[tokio::test]
async fn poll_cycle_populates_location_and_devices() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;

    let gateway = connected_gateway(&server).await;
    let cache = Arc::new(StateCache::new());
    let coordinator = PollCoordinator::new(gateway, cache.clone(), vec![]);

    let stats = coordinator.refresh().await.expect("cycle should succeed");
    assert_eq!(stats.locations, 1);
    assert_eq!(stats.devices, 2);
    assert_eq!(stats.failures, 0);

    let location = cache.get("loc-1").expect("location cached");
    assert_eq!(
        location.as_location().unwrap().device_ids,
        vec!["dev-1", "dev-2"]
    );

    // Adapter-visible values must match the gateway's last-returned payload.
    let dev1 = cache.get("dev-1").expect("dev-1 cached");
    let dev1 = dev1.as_device().unwrap();
    assert_eq!(dev1.telemetry.as_ref().unwrap().gpm, Some(1.5));
    assert_eq!(dev1.valve.resolved(), Some(ValveState::Open));

    let dev2 = cache.get("dev-2").expect("dev-2 cached");
    assert_eq!(
        dev2.as_device().unwrap().valve.resolved(),
        Some(ValveState::Closed)
    );

    assert!(coordinator.last_poll().is_some());
}

#[tokio::test]
async fn poll_cycle_is_idempotent() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;

    let gateway = connected_gateway(&server).await;
    let cache = Arc::new(StateCache::new());
    let coordinator = PollCoordinator::new(gateway, cache.clone(), vec![]);

    coordinator.refresh().await.unwrap();
    let first: Vec<_> = ["loc-1", "dev-1", "dev-2"]
        .iter()
        .map(|id| cache.get(id).unwrap())
        .collect();

    coordinator.refresh().await.unwrap();
    let second: Vec<_> = ["loc-1", "dev-1", "dev-2"]
        .iter()
        .map(|id| cache.get(id).unwrap())
        .collect();

    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(**a, **b);
    }
    assert_eq!(cache.len(), 3);
}

#[tokio::test]
async fn failed_listing_leaves_cache_untouched() {
    let server = MockServer::start().await;
    auth_mock().mount(&server).await;
    // First listing succeeds, every later one fails.
    Mock::given(method("GET"))
        .and(path("/api/v2/users/user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_record()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/users/user-1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record("dev-1", 1.5, "open")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/devices/dev-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record("dev-2", 0.0, "closed")))
        .mount(&server)
        .await;

    let gateway = connected_gateway(&server).await;
    let cache = Arc::new(StateCache::new());
    let coordinator = PollCoordinator::new(gateway, cache.clone(), vec![]);

    coordinator.refresh().await.expect("first cycle succeeds");
    let before: Vec<_> = ["loc-1", "dev-1", "dev-2"]
        .iter()
        .map(|id| cache.get(id).unwrap())
        .collect();

    coordinator
        .refresh()
        .await
        .expect_err("second cycle should fail");

    // Same Arcs: the failed cycle never wrote anything.
    for (i, id) in ["loc-1", "dev-1", "dev-2"].iter().enumerate() {
        let after = cache.get(id).unwrap();
        assert!(Arc::ptr_eq(&before[i], &after), "{id} was touched");
    }
}

#[tokio::test]
async fn per_device_failure_does_not_abort_cycle() {
    let server = MockServer::start().await;
    auth_mock().mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/users/user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_record()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record("dev-1", 1.5, "open")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/devices/dev-2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let gateway = connected_gateway(&server).await;
    let cache = Arc::new(StateCache::new());
    let coordinator = PollCoordinator::new(gateway, cache.clone(), vec![]);

    let stats = coordinator.refresh().await.expect("cycle should survive");
    assert_eq!(stats.devices, 1);
    assert_eq!(stats.failures, 1);
    assert!(cache.get("loc-1").is_some());
    assert!(cache.get("dev-1").is_some());
    assert!(cache.get("dev-2").is_none());
}

#[tokio::test]
async fn configured_location_filter_limits_scope() {
    let server = MockServer::start().await;
    auth_mock().mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/users/user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "user-1",
            "locations": [
                {"id": "loc-1", "devices": [{"id": "dev-1"}]},
                {"id": "loc-2", "devices": [{"id": "dev-3"}]}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record("dev-1", 1.5, "open")))
        .mount(&server)
        .await;
    // Out-of-scope device must never be fetched.
    Mock::given(method("GET"))
        .and(path("/api/v2/devices/dev-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record("dev-3", 0.0, "open")))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = connected_gateway(&server).await;
    let cache = Arc::new(StateCache::new());
    let coordinator = PollCoordinator::new(gateway, cache.clone(), vec!["loc-1".to_string()]);

    let stats = coordinator.refresh().await.unwrap();
    assert_eq!(stats.locations, 1);
    assert!(cache.get("loc-1").is_some());
    assert!(cache.get("loc-2").is_none());
    assert!(cache.get("dev-3").is_none());
}

#[tokio::test]
async fn session_shares_one_coordinator_and_one_listing_call() {
    let server = MockServer::start().await;
    auth_mock().mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v2/users/user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_record()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record("dev-1", 1.5, "open")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/devices/dev-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_record("dev-2", 0.0, "closed")))
        .mount(&server)
        .await;

    let session = FloSession::new(
        FloGateway::builder("user@example.com", "secret")
            .base_url(server.uri())
            .build(),
    );
    session.gateway().connect().await.unwrap();

    // Two independent entity setups each ask for "their" coordinator.
    let first = session.coordinator(vec![]);
    let second = session.coordinator(vec![]);
    assert!(Arc::ptr_eq(&first, &second));

    // One cycle, one listing call, regardless of how many askers there were.
    first.refresh().await.unwrap();
    assert_eq!(session.cache().len(), 3);
}

#[tokio::test]
async fn subscribers_notified_per_updated_entity() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;

    let gateway = connected_gateway(&server).await;
    let cache = Arc::new(StateCache::new());
    let coordinator = PollCoordinator::new(gateway, cache.clone(), vec![]);

    let dev1_hits = Arc::new(AtomicUsize::new(0));
    let unrelated_hits = Arc::new(AtomicUsize::new(0));
    let dev1_clone = dev1_hits.clone();
    let unrelated_clone = unrelated_hits.clone();
    cache.subscribe("dev-1", move |_| {
        dev1_clone.fetch_add(1, Ordering::SeqCst);
    });
    cache.subscribe("dev-99", move |_| {
        unrelated_clone.fetch_add(1, Ordering::SeqCst);
    });

    coordinator.refresh().await.unwrap();
    assert_eq!(dev1_hits.load(Ordering::SeqCst), 1);
    assert_eq!(unrelated_hits.load(Ordering::SeqCst), 0);
}
