use std::collections::HashSet;

use oic_codec::message::{MessageV1, RequestMessage, ResourceLink, ResponseMessage, ResponsePayload};
use oic_core::query::{
    is_valid_identifier, normalize_path, parse_query, split_uri_query, INTERFACE_KEY,
    RESOURCE_TYPE_KEY,
};
use oic_core::types::{DEVICE_URI, PLATFORM_URI, WELL_KNOWN_URI};
use oic_core::{
    ConnectivityType, Method, OicError, QualityOfService, QueryParams, ResourceProperty,
    ResponseCode, Token,
};
use oic_transport::adapter::TransportAdapter;
use tracing::{debug, warn};

use crate::client::{
    allocate_token, require_client, send_request, OutboundRequest, RemoteResource,
    ResponseOutcome,
};
use crate::outbound::send_message;
use crate::server::error_response;
use crate::state::{DiscoveryQuery, NodeEvent, NodeState, ResourceEntry};

fn is_listed(entry: &ResourceEntry, resource_type: Option<&String>, interface: Option<&String>) -> bool {
    let explicit = entry
        .properties
        .contains(ResourceProperty::EXPLICIT_DISCOVERABLE);
    let discoverable = entry.properties.contains(ResourceProperty::DISCOVERABLE);
    let filtered = resource_type.is_some() || interface.is_some();
    if !(discoverable && !explicit) && !(explicit && filtered) {
        return false;
    }
    let type_matches = resource_type.map_or(true, |rt| entry.resource_types.contains(rt));
    let interface_matches = interface.map_or(true, |i| entry.interfaces.contains(i));
    type_matches && interface_matches
}

/// Server-side answer to a `/oic/res` query. `None` means stay silent.
pub fn answer_discovery(node: &NodeState, request: &RequestMessage) -> Option<ResponseMessage> {
    if request.method != Method::Get {
        return (!request.multicast)
            .then(|| error_response(request.token, ResponseCode::METHOD_NOT_ALLOWED));
    }
    let resource_type = request.query.get(RESOURCE_TYPE_KEY);
    let interface = request.query.get(INTERFACE_KEY);
    let links: Vec<ResourceLink> = node
        .server
        .resources
        .values()
        .filter(|entry| is_listed(entry, resource_type, interface))
        .map(|entry| ResourceLink {
            uri: entry.uri.clone(),
            resource_types: entry.resource_types.clone(),
            interfaces: entry.interfaces.clone(),
            properties: entry.properties,
            device_id: node.server.device_id.clone(),
        })
        .collect();

    if links.is_empty() {
        debug!(token = %request.token, multicast = request.multicast, "discovery query matched nothing");
        return (!request.multicast).then(|| error_response(request.token, ResponseCode::NOT_FOUND));
    }
    Some(ResponseMessage {
        payload: ResponsePayload::Discovery(links),
        ..error_response(request.token, ResponseCode::CONTENT)
    })
}

/// Checks that `resource_uri` names `/oic/res` and returns its filters.
pub fn parse_discovery_uri(resource_uri: &str) -> Result<QueryParams, OicError> {
    let (path, raw_query) = split_uri_query(resource_uri);
    if normalize_path(path) != WELL_KNOWN_URI {
        return Err(OicError::InvalidParam("discovery uri must name /oic/res"));
    }
    let query = raw_query.map(parse_query).unwrap_or_default();
    if query.values().any(|value| !is_valid_identifier(value)) {
        return Err(OicError::InvalidParam("discovery filter"));
    }
    Ok(query)
}

/// Starts a discovery query. `host` empty means multicast; `resource_uri` is
/// `/oic/res` with optional `rt`/`if` filters. Matches arrive as
/// `ResourceFound` events until the discovery TTL lapses.
pub fn find_resource<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    host: &str,
    resource_uri: &str,
    connectivity: ConnectivityType,
    now_ms: u64,
) -> Result<Token, OicError> {
    require_client(node)?;
    connectivity.validate()?;
    let query = parse_discovery_uri(resource_uri)?;

    let token = allocate_token(node);
    let target = (!host.is_empty()).then(|| host.to_string());
    node.client.discoveries.insert(
        token,
        DiscoveryQuery {
            host: target.clone(),
            connectivity,
            deadline_ms: now_ms.saturating_add(node.config.discovery_ttl_ms()),
            seen: HashSet::new(),
        },
    );
    let message = MessageV1::request(RequestMessage {
        token,
        method: Method::Get,
        uri: WELL_KNOWN_URI.to_string(),
        query,
        header_options: Vec::new(),
        observe: None,
        qos: QualityOfService::Low,
        multicast: target.is_none(),
        payload: None,
    });
    if let Err(err) = send_message(adapter, target.as_deref(), &message) {
        warn!(token = %token, error = %err, "discovery send failed");
        node.client.discoveries.remove(&token);
        node.push_event(NodeEvent::DiscoveryExpired { token });
    }
    Ok(token)
}

/// Turns a discovery answer into one `ResourceFound` per new (host, uri).
pub fn handle_discovery_response(
    node: &mut NodeState,
    from: &str,
    response: ResponseMessage,
) -> ResponseOutcome {
    let token = response.token;
    let Some(query) = node.client.discoveries.get_mut(&token) else {
        return ResponseOutcome::Unmatched;
    };
    if query.host.as_deref().is_some_and(|host| host != from) {
        debug!(host = %from, token = %token, "discovery answer from unexpected host");
        return ResponseOutcome::Unmatched;
    }
    let ResponsePayload::Discovery(links) = response.payload else {
        debug!(host = %from, code = %response.code, "discovery answer without links");
        return ResponseOutcome::Discovery;
    };

    let connectivity = query.connectivity;
    let found: Vec<RemoteResource> = links
        .into_iter()
        .filter(|link| query.seen.insert((from.to_string(), link.uri.clone())))
        .map(|link| RemoteResource {
            host: from.to_string(),
            uri: link.uri,
            resource_types: link.resource_types,
            interfaces: link.interfaces,
            properties: link.properties,
            device_id: link.device_id,
            connectivity,
        })
        .collect();
    for resource in found {
        debug!(host = %resource.host, uri = %resource.uri, "resource found");
        node.push_event(NodeEvent::ResourceFound { token, resource });
    }
    ResponseOutcome::Discovery
}

/// Drops a discovery query; later answers are ignored.
pub fn cancel_discovery(node: &mut NodeState, token: Token) -> bool {
    node.client.discoveries.remove(&token).is_some()
}

pub fn expire_discoveries(node: &mut NodeState, now_ms: u64) -> usize {
    let expired: Vec<Token> = node
        .client
        .discoveries
        .iter()
        .filter(|(_, query)| query.deadline_ms <= now_ms)
        .map(|(token, _)| *token)
        .collect();
    for token in &expired {
        node.client.discoveries.remove(token);
        node.push_event(NodeEvent::DiscoveryExpired { token: *token });
    }
    expired.len()
}

/// GET `/oic/d` on `host` (multicast when empty).
pub fn get_device_info<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    host: &str,
    now_ms: u64,
) -> Result<Token, OicError> {
    send_request(node, adapter, OutboundRequest::new(host, Method::Get, DEVICE_URI), now_ms)
}

/// GET `/oic/p` on `host` (multicast when empty).
pub fn get_platform_info<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    host: &str,
    now_ms: u64,
) -> Result<Token, OicError> {
    send_request(node, adapter, OutboundRequest::new(host, Method::Get, PLATFORM_URI), now_ms)
}

#[cfg(test)]
mod tests {
    use super::{expire_discoveries, find_resource, handle_discovery_response};
    use crate::config::PlatformConfig;
    use crate::handler::{Request, Response};
    use crate::server::{handle_request, register_resource, ResourceSpec};
    use crate::state::{NodeEvent, NodeState};
    use oic_codec::message::{decode_message_cbor, MessageBody, ResponseMessage, ResponsePayload};
    use oic_core::{ConnectivityType, OicError, ResourceProperty, ResponseCode};
    use oic_transport::adapter::{Destination, InMemoryAdapter};

    fn server_with(resources: &[(&str, &str, ResourceProperty)]) -> (NodeState, InMemoryAdapter) {
        let mut node = NodeState::new(PlatformConfig::default(), "dev-s");
        let mut adapter = InMemoryAdapter::new("server");
        for (uri, rt, properties) in resources {
            register_resource(
                &mut node,
                &mut adapter,
                ResourceSpec::new(*uri, *rt, *properties),
                Box::new(|request: &Request| Some(Response::to(request))),
                0,
            )
            .expect("registration should succeed");
        }
        (node, adapter)
    }

    /// Runs one discovery round trip and returns the server's answer, if any.
    fn query(server: &mut NodeState, server_adapter: &mut InMemoryAdapter, uri: &str, multicast: bool) -> Option<ResponseMessage> {
        let mut client = NodeState::new(PlatformConfig::default(), "dev-c");
        let mut client_adapter = InMemoryAdapter::new("client");
        let host = if multicast { "" } else { "server" };
        find_resource(&mut client, &mut client_adapter, host, uri, ConnectivityType::DEFAULT, 0)
            .expect("query should send");
        let (_, bytes) = client_adapter.take_outbound().remove(0);
        let MessageBody::Request(request) = decode_message_cbor(&bytes).expect("decodes").body else {
            panic!("expected a request");
        };
        handle_request(server, server_adapter, "client", request, 0);
        server_adapter.take_outbound().pop().map(|(_, bytes)| {
            match decode_message_cbor(&bytes).expect("decodes").body {
                MessageBody::Response(response) => response,
                other => panic!("expected response, got {other:?}"),
            }
        })
    }

    fn uris(response: &ResponseMessage) -> Vec<String> {
        match &response.payload {
            ResponsePayload::Discovery(links) => links.iter().map(|l| l.uri.clone()).collect(),
            other => panic!("expected links, got {other:?}"),
        }
    }

    #[test]
    fn only_discoverable_resources_are_listed() {
        let (mut server, mut adapter) = server_with(&[
            ("/a/light", "core.light", ResourceProperty::DISCOVERABLE),
            ("/a/hidden", "core.light", ResourceProperty::NONE),
        ]);
        let response = query(&mut server, &mut adapter, "/oic/res", true).expect("answer expected");
        assert_eq!(uris(&response), vec!["/a/light"]);
    }

    #[test]
    fn type_filter_narrows_results_and_silences_multicast_misses() {
        let (mut server, mut adapter) = server_with(&[
            ("/a/light", "core.light", ResourceProperty::DISCOVERABLE),
            ("/a/fan", "core.fan", ResourceProperty::DISCOVERABLE),
        ]);
        let response = query(&mut server, &mut adapter, "/oic/res?rt=core.fan", true)
            .expect("answer expected");
        assert_eq!(uris(&response), vec!["/a/fan"]);

        assert!(query(&mut server, &mut adapter, "/oic/res?rt=core.door", true).is_none());
        let miss = query(&mut server, &mut adapter, "/oic/res?rt=core.door", false)
            .expect("unicast miss is answered");
        assert_eq!(miss.code, ResponseCode::NOT_FOUND);
    }

    #[test]
    fn explicit_discoverable_needs_a_filter() {
        let (mut server, mut adapter) = server_with(&[(
            "/a/secret",
            "core.secret",
            ResourceProperty::DISCOVERABLE | ResourceProperty::EXPLICIT_DISCOVERABLE,
        )]);
        assert!(query(&mut server, &mut adapter, "/oic/res", true).is_none());
        let response = query(&mut server, &mut adapter, "/oic/res?if=oic.if.baseline", true)
            .expect("filtered query should list it");
        assert_eq!(uris(&response), vec!["/a/secret"]);
    }

    #[test]
    fn find_resource_validates_arguments() {
        let mut client = NodeState::new(PlatformConfig::default(), "dev-c");
        let mut adapter = InMemoryAdapter::new("client");
        let bad_flags = ConnectivityType(1 << 30);
        assert!(find_resource(&mut client, &mut adapter, "", "/oic/res", bad_flags, 0).is_err());
        assert_eq!(
            find_resource(&mut client, &mut adapter, "", "/a/light", ConnectivityType::DEFAULT, 0),
            Err(OicError::InvalidParam("discovery uri must name /oic/res"))
        );
        assert!(find_resource(&mut client, &mut adapter, "", "/oic/res?rt=a b", ConnectivityType::DEFAULT, 0).is_err());
        assert!(adapter.take_outbound().is_empty());

        find_resource(&mut client, &mut adapter, "", "/oic/res", ConnectivityType::ADAPTER_IP, 0)
            .expect("valid query should send");
        assert_eq!(adapter.take_outbound()[0].0, Destination::Multicast);
    }

    #[test]
    fn each_resource_is_reported_once_per_host() {
        let (mut server, mut server_adapter) =
            server_with(&[("/a/light", "core.light", ResourceProperty::DISCOVERABLE)]);
        let mut client = NodeState::new(PlatformConfig::default(), "dev-c");
        let mut client_adapter = InMemoryAdapter::new("client");
        let token = find_resource(
            &mut client,
            &mut client_adapter,
            "",
            "/oic/res",
            ConnectivityType::ADAPTER_IP,
            0,
        )
        .expect("query should send");
        let (_, bytes) = client_adapter.take_outbound().remove(0);
        let MessageBody::Request(request) = decode_message_cbor(&bytes).expect("decodes").body else {
            panic!("expected a request");
        };
        handle_request(&mut server, &mut server_adapter, "client", request, 0);
        let (_, bytes) = server_adapter.take_outbound().remove(0);
        let MessageBody::Response(response) = decode_message_cbor(&bytes).expect("decodes").body else {
            panic!("expected a response");
        };

        handle_discovery_response(&mut client, "server", response.clone());
        handle_discovery_response(&mut client, "server", response.clone());
        handle_discovery_response(&mut client, "mirror", response);
        let found: Vec<(String, String)> = client
            .take_events()
            .into_iter()
            .map(|event| match event {
                NodeEvent::ResourceFound { token: t, resource } => {
                    assert_eq!(t, token);
                    assert_eq!(resource.device_id, "dev-s");
                    assert_eq!(resource.connectivity, ConnectivityType::ADAPTER_IP);
                    (resource.host, resource.uri)
                }
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(
            found,
            vec![
                ("server".to_string(), "/a/light".to_string()),
                ("mirror".to_string(), "/a/light".to_string()),
            ]
        );
    }

    #[test]
    fn discovery_expires_after_ttl() {
        let mut client = NodeState::new(PlatformConfig::default(), "dev-c");
        let mut adapter = InMemoryAdapter::new("client");
        let token = find_resource(&mut client, &mut adapter, "", "/oic/res", ConnectivityType::DEFAULT, 0)
            .expect("query should send");
        let ttl = client.config.discovery_ttl_ms();
        assert_eq!(expire_discoveries(&mut client, ttl - 1), 0);
        assert_eq!(expire_discoveries(&mut client, ttl), 1);
        assert_eq!(client.take_events(), vec![NodeEvent::DiscoveryExpired { token }]);
    }
}
