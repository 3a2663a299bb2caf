#![no_main]

use libfuzzer_sys::fuzz_target;
use oic_node::config::PlatformConfig;
use oic_node::runtime::{pump_once, tick, RuntimeStats};
use oic_node::state::NodeState;
use oic_transport::adapter::InMemoryAdapter;

fuzz_target!(|data: &[u8]| {
    let mut node = NodeState::new(PlatformConfig::default(), "fuzz-device");
    let mut adapter = InMemoryAdapter::new("local");
    adapter.enqueue_inbound("sender", data.to_vec());
    let mut stats = RuntimeStats::default();

    let _ = pump_once(&mut node, &mut adapter, 0, &mut stats);
    tick(&mut node, &mut adapter, 1);
    let _ = node.take_events();
});
