use oic_codec::message::{AckMessage, MessageV1, RequestMessage, ResponseMessage, ResponsePayload};
use oic_core::query::{is_valid_identifier, QueryParams};
use oic_core::types::{DEFAULT_INTERFACE, DEVICE_URI, PLATFORM_URI, SEQUENCE_OFFSET, WELL_KNOWN_URI};
use oic_core::{
    HandlerFlags, Method, ObservationInfo, ObserveAction, OicError, PresenceTrigger,
    Representation, ResourceProperty, ResponseCode, Token,
};
use oic_transport::adapter::TransportAdapter;
use tracing::{debug, info, warn};

use crate::discovery::answer_discovery;
use crate::handler::{EntityHandler, Request};
use crate::info::{DeviceInfo, PlatformInfo};
use crate::observe::{add_observer, remove_observer};
use crate::outbound::send_message;
use crate::presence::announce;
use crate::state::{AnsweredEntry, AnsweredRequest, NodeState, ResourceEntry, ResourceHandle};

/// Prefix reserved for the stack's own resources.
const RESERVED_PREFIX: &str = "/oic/";

/// Parameters of a resource registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub uri: String,
    pub resource_types: Vec<String>,
    /// The baseline interface is always added when missing.
    pub interfaces: Vec<String>,
    pub properties: ResourceProperty,
}

impl ResourceSpec {
    pub fn new(
        uri: impl Into<String>,
        resource_type: impl Into<String>,
        properties: ResourceProperty,
    ) -> Self {
        Self {
            uri: uri.into(),
            resource_types: vec![resource_type.into()],
            interfaces: vec![DEFAULT_INTERFACE.to_string()],
            properties,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }
}

/// What `handle_request` did with one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Answered,
    /// Multicast request with nothing to say.
    Silent,
    Duplicate,
    /// Retransmitted confirmable request answered from the cached response.
    Resent,
    /// Node does not run the server half.
    Ignored,
}

pub(crate) fn require_server(node: &NodeState) -> Result<(), OicError> {
    if node.config.mode.serves() {
        Ok(())
    } else {
        Err(OicError::InvalidMode("server operations need server or both mode"))
    }
}

pub(crate) fn error_response(token: Token, code: ResponseCode) -> ResponseMessage {
    ResponseMessage {
        token,
        code,
        sequence: None,
        header_options: Vec::new(),
        new_resource_uri: None,
        payload: ResponsePayload::Empty,
        confirmable: false,
    }
}

pub(crate) fn representation_payload(rep: Representation) -> ResponsePayload {
    if rep.is_empty_data() {
        ResponsePayload::Empty
    } else {
        ResponsePayload::Representation(rep)
    }
}

fn validate_identifiers(list: &[String], what: &'static str) -> Result<(), OicError> {
    if list.iter().all(|entry| is_valid_identifier(entry)) {
        Ok(())
    } else {
        Err(OicError::InvalidParam(what))
    }
}

fn validate_resource_uri(node: &NodeState, uri: &str) -> Result<(), OicError> {
    if !uri.starts_with('/') || uri.contains('?') || uri.chars().any(char::is_whitespace) {
        return Err(OicError::InvalidParam("resource uri must be an absolute path"));
    }
    if uri.starts_with(RESERVED_PREFIX) {
        return Err(OicError::InvalidParam("resource uri is reserved"));
    }
    if node.server.find_by_uri(uri).is_some() {
        return Err(OicError::InvalidParam("resource uri already registered"));
    }
    Ok(())
}

/// Registers a resource and fires its INIT dispatch.
pub fn register_resource<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    spec: ResourceSpec,
    handler: EntityHandler,
    now_ms: u64,
) -> Result<ResourceHandle, OicError> {
    require_server(node)?;
    validate_resource_uri(node, &spec.uri)?;
    validate_identifiers(&spec.resource_types, "resource type")?;
    validate_identifiers(&spec.interfaces, "resource interface")?;

    let mut interfaces = spec.interfaces;
    if !interfaces.iter().any(|i| i == DEFAULT_INTERFACE) {
        interfaces.insert(0, DEFAULT_INTERFACE.to_string());
    }

    let handle = ResourceHandle(node.server.next_handle);
    node.server.next_handle += 1;
    let mut entry = ResourceEntry {
        uri: spec.uri,
        resource_types: spec.resource_types,
        interfaces,
        properties: spec.properties,
        observers: Vec::new(),
        sequence: SEQUENCE_OFFSET,
        handler,
    };
    let init = Request {
        flags: HandlerFlags::INIT,
        method: Method::Get,
        query: QueryParams::new(),
        header_options: Vec::new(),
        resource: handle,
        token: Token(0),
        host: String::new(),
        payload: None,
        observation: None,
    };
    let _ = (entry.handler)(&init);

    let resource_type = entry.resource_types.first().cloned();
    info!(uri = %entry.uri, handle = %handle, "resource registered");
    node.server.resources.insert(handle, entry);
    announce(node, adapter, now_ms, PresenceTrigger::Create, resource_type);
    Ok(handle)
}

/// Removes a resource. Current observers get a final 4.04.
pub fn unregister_resource<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    handle: ResourceHandle,
    now_ms: u64,
) -> Result<(), OicError> {
    require_server(node)?;
    let entry = node
        .server
        .resources
        .remove(&handle)
        .ok_or(OicError::NoResource)?;
    for observer in &entry.observers {
        let message = MessageV1::response(error_response(observer.token, ResponseCode::NOT_FOUND));
        if let Err(err) = send_message(adapter, Some(&observer.host), &message) {
            warn!(host = %observer.host, error = %err, "failed to notify observer of removal");
        }
    }
    info!(uri = %entry.uri, handle = %handle, "resource unregistered");
    announce(
        node,
        adapter,
        now_ms,
        PresenceTrigger::Delete,
        entry.resource_types.first().cloned(),
    );
    Ok(())
}

pub fn bind_type_to_resource<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    handle: ResourceHandle,
    resource_type: &str,
    now_ms: u64,
) -> Result<(), OicError> {
    require_server(node)?;
    if !is_valid_identifier(resource_type) {
        return Err(OicError::InvalidParam("resource type"));
    }
    let entry = node
        .server
        .resources
        .get_mut(&handle)
        .ok_or(OicError::NoResource)?;
    if entry.resource_types.iter().any(|t| t == resource_type) {
        return Ok(());
    }
    entry.resource_types.push(resource_type.to_string());
    announce(
        node,
        adapter,
        now_ms,
        PresenceTrigger::Change,
        Some(resource_type.to_string()),
    );
    Ok(())
}

pub fn bind_interface_to_resource<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    handle: ResourceHandle,
    interface: &str,
    now_ms: u64,
) -> Result<(), OicError> {
    require_server(node)?;
    if !is_valid_identifier(interface) {
        return Err(OicError::InvalidParam("resource interface"));
    }
    let entry = node
        .server
        .resources
        .get_mut(&handle)
        .ok_or(OicError::NoResource)?;
    if entry.interfaces.iter().any(|i| i == interface) {
        return Ok(());
    }
    entry.interfaces.push(interface.to_string());
    let resource_type = entry.resource_types.first().cloned();
    announce(node, adapter, now_ms, PresenceTrigger::Change, resource_type);
    Ok(())
}

pub fn set_device_info(node: &mut NodeState, info: &DeviceInfo) -> Result<(), OicError> {
    require_server(node)?;
    info.validate()?;
    node.server.device_info = Some(info.to_representation(&node.server.device_id));
    Ok(())
}

pub fn set_platform_info(node: &mut NodeState, info: &PlatformInfo) -> Result<(), OicError> {
    require_server(node)?;
    info.validate()?;
    node.server.platform_info = Some(info.to_representation());
    Ok(())
}

/// Answers one inbound request from `from`.
pub fn handle_request<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    from: &str,
    request: RequestMessage,
    now_ms: u64,
) -> RequestOutcome {
    if !node.config.mode.serves() {
        debug!(host = %from, uri = %request.uri, "request ignored in client mode");
        return RequestOutcome::Ignored;
    }

    node.server.answered.retain(|_, entry| entry.closes_ms > now_ms);
    let key = AnsweredRequest {
        host: from.to_string(),
        token: request.token,
        observe: request.observe,
    };
    if let Some(entry) = node.server.answered.get(&key) {
        let Some(cached) = entry.response.clone() else {
            debug!(host = %from, token = %request.token, "duplicate request dropped");
            return RequestOutcome::Duplicate;
        };
        debug!(host = %from, token = %request.token, "retransmitted request, answering again");
        if let Err(err) = send_message(adapter, Some(from), &MessageV1::response(cached)) {
            warn!(host = %from, error = %err, "failed to resend response");
        }
        return RequestOutcome::Resent;
    }
    let confirmable = request.qos.is_confirmable();
    node.server.answered.insert(
        key.clone(),
        AnsweredEntry {
            closes_ms: now_ms.saturating_add(node.config.duplicate_window_ms()),
            response: None,
        },
    );

    let response = match request.uri.as_str() {
        WELL_KNOWN_URI => answer_discovery(node, &request),
        DEVICE_URI => answer_info(node.server.device_info.as_ref(), &request),
        PLATFORM_URI => answer_info(node.server.platform_info.as_ref(), &request),
        uri => match node.server.find_by_uri(uri) {
            Some(handle) => dispatch_request(node, from, handle, &request),
            None if request.multicast => None,
            None => {
                debug!(host = %from, uri = %uri, "request for unknown resource");
                Some(error_response(request.token, ResponseCode::NOT_FOUND))
            }
        },
    };

    let Some(response) = response else {
        return RequestOutcome::Silent;
    };
    if confirmable {
        if let Some(entry) = node.server.answered.get_mut(&key) {
            entry.response = Some(response.clone());
        }
    }
    if let Err(err) = send_message(adapter, Some(from), &MessageV1::response(response)) {
        warn!(host = %from, error = %err, "failed to send response");
    }
    RequestOutcome::Answered
}

/// Clears the unacked count of the observer the ack names. Returns `false`
/// when no observer matches.
pub fn handle_ack(node: &mut NodeState, from: &str, ack: AckMessage) -> bool {
    let observer = node
        .server
        .resources
        .values_mut()
        .flat_map(|entry| entry.observers.iter_mut())
        .find(|o| o.host == from && o.token == ack.token);
    match observer {
        Some(observer) => {
            observer.unacked = 0;
            true
        }
        None => {
            debug!(host = %from, token = %ack.token, sequence = ack.sequence, "ack for unknown observer");
            false
        }
    }
}

fn answer_info(info: Option<&Representation>, request: &RequestMessage) -> Option<ResponseMessage> {
    let code = match info {
        _ if request.method != Method::Get => ResponseCode::METHOD_NOT_ALLOWED,
        Some(rep) => {
            return Some(ResponseMessage {
                payload: ResponsePayload::Representation(rep.clone()),
                ..error_response(request.token, ResponseCode::CONTENT)
            })
        }
        None => ResponseCode::NOT_FOUND,
    };
    if request.multicast {
        None
    } else {
        Some(error_response(request.token, code))
    }
}

fn dispatch_request(
    node: &mut NodeState,
    from: &str,
    handle: ResourceHandle,
    request: &RequestMessage,
) -> Option<ResponseMessage> {
    let max_observers = node.config.max_observers;
    let entry = node.server.resources.get_mut(&handle)?;

    let observation = match request.observe {
        Some(ObserveAction::Register) if entry.properties.contains(ResourceProperty::OBSERVABLE) => {
            add_observer(entry, from, request.token, request.qos, max_observers).map(|observer_id| {
                ObservationInfo {
                    action: ObserveAction::Register,
                    observer_id,
                }
            })
        }
        Some(ObserveAction::Register) => {
            debug!(uri = %entry.uri, "observe on a resource that is not observable");
            None
        }
        Some(ObserveAction::Deregister) => {
            remove_observer(entry, from, request.token).map(|observer_id| ObservationInfo {
                action: ObserveAction::Deregister,
                observer_id,
            })
        }
        None => None,
    };
    let registered = observation.is_some_and(|info| info.action == ObserveAction::Register);

    let mut flags = HandlerFlags::REQUEST;
    if observation.is_some() {
        flags = flags | HandlerFlags::OBSERVER;
    }
    let dispatch = Request {
        flags,
        method: request.method,
        query: request.query.clone(),
        header_options: request.header_options.clone(),
        resource: handle,
        token: request.token,
        host: from.to_string(),
        payload: request.payload.clone(),
        observation,
    };

    let Some(reply) = (entry.handler)(&dispatch) else {
        warn!(uri = %entry.uri, token = %request.token, "entity handler returned no response");
        if registered {
            remove_observer(entry, from, request.token);
        }
        return Some(error_response(request.token, ResponseCode::INTERNAL_SERVER_ERROR));
    };

    let code = reply.response_code(request.method);
    let sequence = match registered {
        true if code.is_success() => Some(entry.sequence),
        true => {
            remove_observer(entry, from, request.token);
            None
        }
        false => None,
    };
    Some(ResponseMessage {
        token: request.token,
        code,
        sequence,
        header_options: reply.header_options,
        new_resource_uri: reply.new_resource_uri,
        payload: representation_payload(reply.representation),
        confirmable: false,
    })
}
