use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use oic_core::{ConnectivityType, ModeType, OicError, PresenceStatus, QueryParams, Representation, ResourceProperty};
use oic_node::client::RequestError;
use oic_node::server::ResourceSpec;
use oic_node::{DeviceInfo, Platform, PlatformConfig, Request, Response};
use oic_transport::network::MemoryNetwork;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(2);

fn config(mode: ModeType, seed: &str) -> PlatformConfig {
    PlatformConfig {
        mode,
        tick_interval: Duration::from_millis(2),
        request_timeout: Duration::from_millis(500),
        discovery_ttl: Duration::from_millis(150),
        device_seed: Some(seed.to_string()),
        ..PlatformConfig::default()
    }
}

fn light_handler(power: Arc<AtomicI64>) -> impl FnMut(&Request) -> Option<Response> + Send + 'static {
    move |request: &Request| {
        let mut rep = Representation::new();
        rep.set_value("power", power.load(Ordering::SeqCst));
        if let Some(value) = request.query.get("k") {
            rep.set_value("k", value.clone());
        }
        Some(Response::to(request).with_representation(rep))
    }
}

async fn light_server(network: &MemoryNetwork, power: Arc<AtomicI64>) -> (Platform, oic_node::ResourceHandle) {
    let server = Platform::start(config(ModeType::Server, "server"), network.endpoint("server"))
        .expect("server should start");
    let handle = server
        .register_resource(
            ResourceSpec::new(
                "/a/light",
                "core.light",
                ResourceProperty::DISCOVERABLE | ResourceProperty::OBSERVABLE,
            ),
            light_handler(power),
        )
        .await
        .expect("registration should succeed");
    (server, handle)
}

#[tokio::test]
async fn multicast_discovery_finds_resource_once_and_not_after_unregister() {
    let network = MemoryNetwork::new();
    let (server, handle) = light_server(&network, Arc::new(AtomicI64::new(0))).await;
    let client = Platform::start(config(ModeType::Client, "client"), network.endpoint("client"))
        .expect("client should start");

    let mut found = client
        .find_resource("", "/oic/res?rt=core.light", ConnectivityType::DEFAULT)
        .expect("discovery should start");
    let resource = timeout(WAIT, found.next())
        .await
        .expect("discovery should answer in time")
        .expect("one resource should be found")
        .expect("discovery should succeed");
    assert_eq!(resource.host, "server");
    assert_eq!(resource.uri, "/a/light");
    assert!(resource.resource_types.contains(&"core.light".to_string()));
    assert!(resource.is_observable());
    assert!(timeout(WAIT, found.next())
        .await
        .expect("discovery should expire")
        .is_none());

    server
        .unregister_resource(handle)
        .await
        .expect("unregister should succeed");
    let mut found = client
        .find_resource("", "/oic/res?rt=core.light", ConnectivityType::DEFAULT)
        .expect("discovery should start");
    assert!(timeout(WAIT, found.next())
        .await
        .expect("discovery should expire")
        .is_none());
}

#[tokio::test]
async fn get_with_query_reaches_handler() {
    let network = MemoryNetwork::new();
    let (_server, _) = light_server(&network, Arc::new(AtomicI64::new(74))).await;
    let client = Platform::start(config(ModeType::Client, "client"), network.endpoint("client"))
        .expect("client should start");

    let mut found = client
        .find_resource("server", "/oic/res", ConnectivityType::DEFAULT)
        .expect("discovery should start");
    let light = timeout(WAIT, found.next())
        .await
        .expect("discovery should answer")
        .expect("light should be found")
        .expect("discovery should succeed");

    let mut query = QueryParams::new();
    query.insert("k".into(), "v".into());
    let reply = timeout(WAIT, client.get_resource(&light, query).expect("get should start"))
        .await
        .expect("get should complete")
        .expect("get should succeed");
    assert_eq!(reply.representation.get_value::<i64>("power").expect("power"), 74);
    assert_eq!(reply.representation.get_value::<String>("k").expect("k"), "v");

    let stats = client.stats().await.expect("worker should be running");
    assert!(stats.runtime.responses_matched >= 2);
    assert_eq!(stats.runtime.decode_errors, 0);
    assert!(stats.transport.outbound_send_ok >= 2);
}

#[tokio::test]
async fn unknown_resource_resolves_not_found() {
    let network = MemoryNetwork::new();
    let (_server, _) = light_server(&network, Arc::new(AtomicI64::new(0))).await;
    let client = Platform::start(config(ModeType::Client, "client"), network.endpoint("client"))
        .expect("client should start");

    let result = timeout(
        WAIT,
        client
            .request(oic_node::client::OutboundRequest::new(
                "server",
                oic_core::Method::Get,
                "/a/missing",
            ))
            .expect("request should start"),
    )
    .await
    .expect("request should complete");
    assert_eq!(result, Err(RequestError::ResourceNotFound));
}

#[tokio::test]
async fn observe_delivers_increasing_sequences_until_cancelled() {
    let network = MemoryNetwork::new();
    let power = Arc::new(AtomicI64::new(0));
    let (server, handle) = light_server(&network, power.clone()).await;
    let client = Platform::start(config(ModeType::Client, "client"), network.endpoint("client"))
        .expect("client should start");

    let mut found = client
        .find_resource("server", "/oic/res", ConnectivityType::DEFAULT)
        .expect("discovery should start");
    let light = timeout(WAIT, found.next())
        .await
        .expect("discovery should answer")
        .expect("light should be found")
        .expect("discovery should succeed");

    let mut stream = client
        .observe_resource(&light, QueryParams::new())
        .expect("observe should start");
    let first = timeout(WAIT, stream.next())
        .await
        .expect("registration should be answered")
        .expect("stream open")
        .expect("registration should succeed");
    let mut sequences = vec![first.sequence.expect("registration carries a sequence")];

    for step in 1..=3 {
        power.store(step, Ordering::SeqCst);
        assert_eq!(
            server.notify_all_observers(handle).await.expect("notify"),
            1
        );
        let notification = timeout(WAIT, stream.next())
            .await
            .expect("notification should arrive")
            .expect("stream open")
            .expect("notification should succeed");
        assert_eq!(
            notification.reply.representation.get_value::<i64>("power").expect("power"),
            step
        );
        sequences.push(notification.sequence.expect("notification carries a sequence"));
    }
    assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]), "{sequences:?}");

    stream.cancel();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        server.notify_all_observers(handle).await,
        Err(OicError::NoObservers)
    );
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn second_observe_of_same_resource_is_duplicate() {
    let network = MemoryNetwork::new();
    let (_server, _) = light_server(&network, Arc::new(AtomicI64::new(0))).await;
    let client = Platform::start(config(ModeType::Client, "client"), network.endpoint("client"))
        .expect("client should start");
    let request = || oic_node::client::OutboundRequest::new("server", oic_core::Method::Get, "/a/light");

    let mut first = client.observe(request()).expect("observe should start");
    timeout(WAIT, first.next())
        .await
        .expect("registration answered")
        .expect("stream open")
        .expect("registration should succeed");
    let mut second = client.observe(request()).expect("observe should start");
    assert_eq!(
        timeout(WAIT, second.next()).await.expect("answered"),
        Some(Err(RequestError::DuplicateRequest))
    );
    assert!(second.next().await.is_none());
}

#[tokio::test]
async fn presence_reports_ok_then_stopped() {
    let network = MemoryNetwork::new();
    let (server, _) = light_server(&network, Arc::new(AtomicI64::new(0))).await;
    let client = Platform::start(config(ModeType::Client, "client"), network.endpoint("client"))
        .expect("client should start");

    let mut presence = client
        .subscribe_presence("server", None)
        .expect("subscription should start");
    client.stats().await.expect("worker should be running");

    server.start_presence(30).await.expect("presence should start");
    let event = timeout(WAIT, presence.next())
        .await
        .expect("announcement should arrive")
        .expect("stream open");
    assert_eq!(event.status, PresenceStatus::Ok);
    assert_eq!(event.host, "server");

    server.stop_presence().await.expect("presence should stop");
    let event = timeout(WAIT, presence.next())
        .await
        .expect("stop should arrive")
        .expect("stream open");
    assert_eq!(event.status, PresenceStatus::Stopped);
}

#[tokio::test]
async fn device_info_is_served_from_well_known_uri() {
    let network = MemoryNetwork::new();
    let (server, _) = light_server(&network, Arc::new(AtomicI64::new(0))).await;
    server
        .set_device_info(DeviceInfo::new("hall light"))
        .await
        .expect("device info should be accepted");
    let client = Platform::start(config(ModeType::Client, "client"), network.endpoint("client"))
        .expect("client should start");

    let reply = timeout(WAIT, client.get_device_info("server").expect("request should start"))
        .await
        .expect("request should complete")
        .expect("device info should be served");
    assert_eq!(reply.representation.get_value::<String>("n").expect("name"), "hall light");
    assert_eq!(reply.representation.uri(), "/oic/d");
}
