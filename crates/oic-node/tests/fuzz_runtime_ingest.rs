use oic_core::{Representation, ResourceProperty};
use oic_node::config::PlatformConfig;
use oic_node::handler::{Request, Response};
use oic_node::runtime::{pump_once, tick, RuntimeStats};
use oic_node::server::{register_resource, ResourceSpec};
use oic_node::state::NodeState;
use oic_transport::adapter::InMemoryAdapter;

fn xorshift64(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut s = seed.max(1);
    let mut out = vec![0_u8; len];
    for b in &mut out {
        *b = (xorshift64(&mut s) & 0xFF) as u8;
    }
    out
}

#[test]
fn fuzz_like_runtime_ingest_does_not_panic() {
    let mut node = NodeState::new(PlatformConfig::default(), "fuzz-device");
    let mut adapter = InMemoryAdapter::new("local");
    register_resource(
        &mut node,
        &mut adapter,
        ResourceSpec::new(
            "/a/light",
            "core.light",
            ResourceProperty::DISCOVERABLE | ResourceProperty::OBSERVABLE,
        ),
        Box::new(|request: &Request| {
            let mut rep = Representation::new();
            rep.set_value("power", 1);
            Some(Response::to(request).with_representation(rep))
        }),
        0,
    )
    .expect("registration should succeed");
    let mut stats = RuntimeStats::default();

    for i in 0..1500_u64 {
        let len = ((i as usize) * 37) % 4096;
        adapter.enqueue_inbound("sender", random_bytes(0xC0DEC0DE ^ i, len));
        assert!(pump_once(&mut node, &mut adapter, i, &mut stats));
        tick(&mut node, &mut adapter, i);
        let _ = adapter.take_outbound();
        let _ = node.take_events();
    }
    assert_eq!(stats.inbound_messages, 1500);
}
