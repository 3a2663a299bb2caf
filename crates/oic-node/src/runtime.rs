use oic_codec::message::{decode_message_cbor, MessageBody};
use oic_transport::adapter::TransportAdapter;
use tracing::debug;

use crate::client::{
    acknowledge_notification, expire_requests, handle_response, retransmit_requests,
    ResponseOutcome,
};
use crate::discovery::expire_discoveries;
use crate::presence::{expire_presence, handle_presence, refresh_presence};
use crate::server::{handle_ack, handle_request, RequestOutcome};
use crate::state::NodeState;

/// Upper bound on datagrams drained by one `pump_until_idle` call.
pub const MAX_PUMP_BATCH: usize = 1_024;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Datagrams polled from the transport.
    pub inbound_messages: usize,
    /// Datagrams that failed to decode as `MessageV1`.
    pub decode_errors: usize,
    /// Requests answered or consciously left silent.
    pub requests_handled: usize,
    pub duplicate_requests: usize,
    /// Retransmitted confirmable requests answered again from cache.
    pub responses_resent: usize,
    /// Requests dropped because the server half is off.
    pub ignored_requests: usize,
    /// Responses matched to a request, observation or discovery.
    pub responses_matched: usize,
    pub stale_notifications: usize,
    pub unmatched_responses: usize,
    pub presence_messages: usize,
    /// Notification acks matched to an observer.
    pub acks_received: usize,
    /// Confirmable requests sent again by `tick`.
    pub retransmissions: usize,
}

/// Decodes one datagram from `from` and routes it to the server, client or
/// presence state machine.
pub fn process_inbound<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    from: &str,
    bytes: &[u8],
    now_ms: u64,
    stats: &mut RuntimeStats,
) {
    let message = match decode_message_cbor(bytes) {
        Ok(message) => message,
        Err(err) => {
            stats.decode_errors += 1;
            debug!(host = %from, error = %err, "dropping undecodable datagram");
            return;
        }
    };
    match message.body {
        MessageBody::Request(request) => match handle_request(node, adapter, from, request, now_ms) {
            RequestOutcome::Answered | RequestOutcome::Silent => stats.requests_handled += 1,
            RequestOutcome::Duplicate => stats.duplicate_requests += 1,
            RequestOutcome::Resent => stats.responses_resent += 1,
            RequestOutcome::Ignored => stats.ignored_requests += 1,
        },
        MessageBody::Response(response) => {
            let token = response.token;
            let ack = response.sequence.filter(|_| response.confirmable);
            match handle_response(node, from, response) {
                ResponseOutcome::Completed | ResponseOutcome::Discovery => stats.responses_matched += 1,
                ResponseOutcome::Notified => {
                    stats.responses_matched += 1;
                    if let Some(sequence) = ack {
                        acknowledge_notification(adapter, from, token, sequence);
                    }
                }
                ResponseOutcome::Stale => {
                    stats.stale_notifications += 1;
                    if let Some(sequence) = ack {
                        acknowledge_notification(adapter, from, token, sequence);
                    }
                }
                ResponseOutcome::Unmatched => stats.unmatched_responses += 1,
            }
        }
        MessageBody::Presence(presence) => {
            stats.presence_messages += 1;
            handle_presence(node, from, presence, now_ms);
        }
        MessageBody::Ack(ack) => {
            if handle_ack(node, from, ack) {
                stats.acks_received += 1;
            } else {
                stats.unmatched_responses += 1;
            }
        }
    }
}

/// Processes at most one inbound datagram. Returns `false` when the
/// transport had nothing queued.
pub fn pump_once<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    now_ms: u64,
    stats: &mut RuntimeStats,
) -> bool {
    let Some((from, bytes)) = adapter.recv() else {
        return false;
    };
    stats.inbound_messages += 1;
    process_inbound(node, adapter, &from, &bytes, now_ms, stats);
    true
}

/// Drains the transport, up to `MAX_PUMP_BATCH` datagrams.
pub fn pump_until_idle<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    now_ms: u64,
    stats: &mut RuntimeStats,
) -> usize {
    let mut processed = 0;
    while processed < MAX_PUMP_BATCH && pump_once(node, adapter, now_ms, stats) {
        processed += 1;
    }
    processed
}

/// Runs every timer: confirmable retransmission, request and discovery
/// expiry, presence timeouts and presence refresh. Returns the number of
/// requests re-sent.
pub fn tick<A: TransportAdapter>(node: &mut NodeState, adapter: &mut A, now_ms: u64) -> usize {
    expire_requests(node, now_ms);
    let resent = retransmit_requests(node, adapter, now_ms);
    expire_discoveries(node, now_ms);
    expire_presence(node, now_ms);
    refresh_presence(node, adapter, now_ms);
    node.server.answered.retain(|_, entry| entry.closes_ms > now_ms);
    resent
}

#[cfg(test)]
mod tests {
    use super::{pump_once, pump_until_idle, tick, RuntimeStats};
    use crate::client::{send_request, start_observe, OutboundRequest};
    use crate::config::PlatformConfig;
    use crate::handler::{Request, Response};
    use crate::observe::notify_all_observers;
    use crate::server::{register_resource, ResourceSpec};
    use crate::state::{NodeEvent, NodeState, ResourceHandle};
    use oic_core::{Method, QualityOfService, Representation, ResourceProperty};
    use oic_transport::adapter::{route_in_memory_outbound, InMemoryAdapter};

    fn light_server() -> (NodeState, InMemoryAdapter, ResourceHandle) {
        let mut node = NodeState::new(PlatformConfig::default(), "dev-s");
        let mut adapter = InMemoryAdapter::new("server");
        let handle = register_resource(
            &mut node,
            &mut adapter,
            ResourceSpec::new(
                "/a/light",
                "core.light",
                ResourceProperty::DISCOVERABLE | ResourceProperty::OBSERVABLE,
            ),
            Box::new(|request: &Request| {
                let mut rep = Representation::new();
                rep.set_value("power", 74);
                Some(Response::to(request).with_representation(rep))
            }),
            0,
        )
        .expect("registration should succeed");
        (node, adapter, handle)
    }

    #[test]
    fn empty_transport_pumps_nothing() {
        let mut node = NodeState::new(PlatformConfig::default(), "dev");
        let mut adapter = InMemoryAdapter::new("local");
        let mut stats = RuntimeStats::default();
        assert!(!pump_once(&mut node, &mut adapter, 0, &mut stats));
        assert_eq!(stats, RuntimeStats::default());
    }

    #[test]
    fn garbage_is_counted_and_dropped() {
        let mut node = NodeState::new(PlatformConfig::default(), "dev");
        let mut adapter = InMemoryAdapter::new("local");
        adapter.enqueue_inbound("peer", vec![0xde, 0xad, 0xbe, 0xef]);
        let mut stats = RuntimeStats::default();
        assert!(pump_once(&mut node, &mut adapter, 0, &mut stats));
        assert_eq!(stats.decode_errors, 1);
        assert!(adapter.take_outbound().is_empty());
    }

    #[test]
    fn request_round_trip_between_two_nodes() {
        let (mut server, mut server_adapter, _) = light_server();
        let mut client = NodeState::new(PlatformConfig::default(), "dev-c");
        let mut client_adapter = InMemoryAdapter::new("client");
        let mut server_stats = RuntimeStats::default();
        let mut client_stats = RuntimeStats::default();

        let token = send_request(
            &mut client,
            &mut client_adapter,
            OutboundRequest::new("server", Method::Get, "/a/light"),
            0,
        )
        .expect("request should send");
        route_in_memory_outbound(&mut client_adapter, &mut server_adapter);
        pump_until_idle(&mut server, &mut server_adapter, 1, &mut server_stats);
        route_in_memory_outbound(&mut server_adapter, &mut client_adapter);
        pump_until_idle(&mut client, &mut client_adapter, 2, &mut client_stats);

        assert_eq!(server_stats.requests_handled, 1);
        assert_eq!(client_stats.responses_matched, 1);
        match client.take_events().as_slice() {
            [NodeEvent::RequestCompleted { token: t, result: Ok(reply) }] => {
                assert_eq!(*t, token);
                assert_eq!(reply.representation.get_value::<i64>("power").expect("power"), 74);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn observe_round_trip_delivers_increasing_sequences() {
        let (mut server, mut server_adapter, handle) = light_server();
        let mut client = NodeState::new(PlatformConfig::default(), "dev-c");
        let mut client_adapter = InMemoryAdapter::new("client");
        let mut stats = RuntimeStats::default();

        start_observe(
            &mut client,
            &mut client_adapter,
            OutboundRequest::new("server", Method::Get, "/a/light"),
            0,
        )
        .expect("observe should send");
        route_in_memory_outbound(&mut client_adapter, &mut server_adapter);
        pump_until_idle(&mut server, &mut server_adapter, 0, &mut stats);
        for _ in 0..3 {
            notify_all_observers(&mut server, &mut server_adapter, handle).expect("notify");
        }
        route_in_memory_outbound(&mut server_adapter, &mut client_adapter);
        pump_until_idle(&mut client, &mut client_adapter, 0, &mut stats);

        let sequences: Vec<u32> = client
            .take_events()
            .into_iter()
            .filter_map(|event| match event {
                NodeEvent::Observe { result: Ok(n), .. } => n.sequence,
                _ => None,
            })
            .collect();
        assert_eq!(sequences, vec![2, 3, 4, 5]);
    }

    #[test]
    fn confirmable_exchange_recovers_lost_datagrams_and_acks_notifications() {
        let (mut server, mut server_adapter, handle) = light_server();
        let mut client = NodeState::new(
            PlatformConfig {
                qos: QualityOfService::High,
                request_timeout: std::time::Duration::from_secs(60),
                ..PlatformConfig::default()
            },
            "dev-c",
        );
        let mut client_adapter = InMemoryAdapter::new("client");
        let mut server_stats = RuntimeStats::default();
        let mut client_stats = RuntimeStats::default();

        let token = send_request(
            &mut client,
            &mut client_adapter,
            OutboundRequest::new("server", Method::Get, "/a/light"),
            0,
        )
        .expect("request should send");
        client_adapter.take_outbound();

        let first_retry = client.config.retransmit_backoff_ms(0);
        assert_eq!(tick(&mut client, &mut client_adapter, first_retry), 1);
        route_in_memory_outbound(&mut client_adapter, &mut server_adapter);
        pump_until_idle(&mut server, &mut server_adapter, first_retry, &mut server_stats);
        server_adapter.take_outbound();

        let second_retry = first_retry + client.config.retransmit_backoff_ms(1);
        assert_eq!(tick(&mut client, &mut client_adapter, second_retry), 1);
        route_in_memory_outbound(&mut client_adapter, &mut server_adapter);
        pump_until_idle(&mut server, &mut server_adapter, second_retry, &mut server_stats);
        assert_eq!(server_stats.requests_handled, 1);
        assert_eq!(server_stats.responses_resent, 1);
        route_in_memory_outbound(&mut server_adapter, &mut client_adapter);
        pump_until_idle(&mut client, &mut client_adapter, second_retry, &mut client_stats);
        assert!(matches!(
            client.take_events().as_slice(),
            [NodeEvent::RequestCompleted { token: t, result: Ok(_) }] if *t == token
        ));

        start_observe(
            &mut client,
            &mut client_adapter,
            OutboundRequest::new("server", Method::Get, "/a/light"),
            second_retry,
        )
        .expect("observe should send");
        route_in_memory_outbound(&mut client_adapter, &mut server_adapter);
        pump_until_idle(&mut server, &mut server_adapter, second_retry, &mut server_stats);
        notify_all_observers(&mut server, &mut server_adapter, handle).expect("notify");
        assert_eq!(server.server.resources[&handle].observers[0].unacked, 1);

        route_in_memory_outbound(&mut server_adapter, &mut client_adapter);
        pump_until_idle(&mut client, &mut client_adapter, second_retry, &mut client_stats);
        route_in_memory_outbound(&mut client_adapter, &mut server_adapter);
        pump_until_idle(&mut server, &mut server_adapter, second_retry, &mut server_stats);
        assert_eq!(server_stats.acks_received, 1);
        assert_eq!(server.server.resources[&handle].observers[0].unacked, 0);
    }

    #[test]
    fn tick_times_out_unanswered_requests() {
        let mut client = NodeState::new(PlatformConfig::default(), "dev-c");
        let mut adapter = InMemoryAdapter::new("client");
        send_request(
            &mut client,
            &mut adapter,
            OutboundRequest::new("nowhere", Method::Get, "/a/light"),
            0,
        )
        .expect("request should send");
        let timeout = client.config.request_timeout_ms();
        tick(&mut client, &mut adapter, timeout);
        assert!(matches!(
            client.take_events().as_slice(),
            [NodeEvent::RequestCompleted { result: Err(_), .. }]
        ));
    }
}
