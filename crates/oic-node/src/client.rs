use oic_codec::message::{
    AckMessage, MessageBody, MessageV1, RequestMessage, ResponseMessage, ResponsePayload,
};
use oic_core::header::validate_header_options;
use oic_core::types::sequence_is_newer;
use oic_core::{
    ConnectivityType, HeaderOption, Method, ObserveAction, OicError, QualityOfService,
    QueryParams, Representation, ResourceProperty, ResponseCode, StackResult, Token,
};
use oic_transport::adapter::TransportAdapter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PlatformConfig;
use crate::discovery::handle_discovery_response;
use crate::outbound::send_message;
use crate::state::{NodeEvent, NodeState, Observation, PendingRequest, Retransmit};

/// Failure delivered through a request completion or observe stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("resource not found")]
    ResourceNotFound,
    #[error("request forbidden")]
    Forbidden,
    #[error("bad request")]
    BadRequest,
    #[error("resource error ({0})")]
    ResourceError(ResponseCode),
    #[error("duplicate request")]
    DuplicateRequest,
    #[error("request timed out")]
    Timeout,
    #[error("communication error: {0}")]
    Communication(String),
    #[error("request cancelled")]
    Cancelled,
    /// Refused locally before anything was sent.
    #[error("request rejected: {0}")]
    Rejected(OicError),
}

impl From<OicError> for RequestError {
    fn from(err: OicError) -> Self {
        match err {
            OicError::InvalidParam(_) => RequestError::BadRequest,
            OicError::NoResource => RequestError::ResourceNotFound,
            other => RequestError::Rejected(other),
        }
    }
}

impl RequestError {
    /// Error for a non-success response code, `None` for 2.xx.
    pub fn from_code(code: ResponseCode) -> Option<Self> {
        if code.is_success() {
            return None;
        }
        Some(match code {
            ResponseCode::NOT_FOUND => RequestError::ResourceNotFound,
            ResponseCode::UNAUTHORIZED | ResponseCode::FORBIDDEN => RequestError::Forbidden,
            ResponseCode::BAD_REQUEST | ResponseCode::BAD_OPTION | ResponseCode::METHOD_NOT_ALLOWED => {
                RequestError::BadRequest
            }
            ResponseCode::GATEWAY_TIMEOUT => RequestError::Timeout,
            other => RequestError::ResourceError(other),
        })
    }

    pub fn stack_result(&self) -> StackResult {
        match self {
            RequestError::ResourceNotFound => StackResult::NoResource,
            RequestError::Forbidden => StackResult::UnauthorizedReq,
            RequestError::BadRequest => StackResult::InvalidQuery,
            RequestError::ResourceError(_) => StackResult::ResourceError,
            RequestError::DuplicateRequest => StackResult::DuplicateRequest,
            RequestError::Timeout => StackResult::Timeout,
            RequestError::Communication(_) => StackResult::CommError,
            RequestError::Cancelled => StackResult::Error,
            RequestError::Rejected(OicError::InvalidParam(_)) => StackResult::InvalidParam,
            RequestError::Rejected(_) => StackResult::Error,
        }
    }
}

/// Successful answer to a client request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub code: ResponseCode,
    pub header_options: Vec<HeaderOption>,
    pub representation: Representation,
    pub new_resource_uri: Option<String>,
}

impl Reply {
    fn from_response(response: ResponseMessage) -> Self {
        let representation = match response.payload {
            ResponsePayload::Representation(rep) => rep,
            ResponsePayload::Empty | ResponsePayload::Discovery(_) => Representation::new(),
        };
        Self {
            code: response.code,
            header_options: response.header_options,
            representation,
            new_resource_uri: response.new_resource_uri,
        }
    }
}

/// One observe delivery. `sequence` is `None` only when the server answered
/// the registration without accepting the observer.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserveNotification {
    pub sequence: Option<u32>,
    pub reply: Reply,
}

/// Resource reported by discovery, addressable for further requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResource {
    pub host: String,
    pub uri: String,
    pub resource_types: Vec<String>,
    pub interfaces: Vec<String>,
    pub properties: ResourceProperty,
    /// Id of the device hosting the resource.
    pub device_id: String,
    pub connectivity: ConnectivityType,
}

impl RemoteResource {
    pub fn is_observable(&self) -> bool {
        self.properties.contains(ResourceProperty::OBSERVABLE)
    }

    /// `host` + `uri`, unique per resource across servers.
    pub fn unique_id(&self) -> String {
        format!("{}{}", self.host, self.uri)
    }

    pub fn request(&self, method: Method) -> OutboundRequest {
        OutboundRequest::new(self.host.clone(), method, self.uri.clone())
    }
}

/// Client request before it is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    /// Target host; empty sends to the multicast group.
    pub host: String,
    pub method: Method,
    pub uri: String,
    pub query: QueryParams,
    pub header_options: Vec<HeaderOption>,
    pub payload: Option<Representation>,
    /// Falls back to the platform QoS when unset.
    pub qos: Option<QualityOfService>,
}

impl OutboundRequest {
    pub fn new(host: impl Into<String>, method: Method, uri: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            method,
            uri: uri.into(),
            query: QueryParams::new(),
            header_options: Vec::new(),
            payload: None,
            qos: None,
        }
    }

    pub fn with_query(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    pub fn with_header_options(mut self, header_options: Vec<HeaderOption>) -> Self {
        self.header_options = header_options;
        self
    }

    pub fn with_payload(mut self, payload: Representation) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_qos(mut self, qos: QualityOfService) -> Self {
        self.qos = Some(qos);
        self
    }

    /// Checks everything that can be rejected before any I/O.
    pub fn validate(&self) -> Result<(), OicError> {
        if !self.uri.starts_with('/') || self.uri.contains('?') {
            return Err(OicError::InvalidParam("request uri must be an absolute path"));
        }
        validate_header_options(&self.header_options)?;
        match (self.method, &self.payload) {
            (Method::Put | Method::Post, None) => {
                Err(OicError::InvalidParam("put/post need a representation"))
            }
            (Method::Get | Method::Delete, Some(_)) => {
                Err(OicError::InvalidParam("payload only allowed on put/post"))
            }
            _ => Ok(()),
        }
    }

    fn into_message(self, token: Token, observe: Option<ObserveAction>, qos: QualityOfService) -> RequestMessage {
        RequestMessage {
            token,
            multicast: self.host.is_empty(),
            method: self.method,
            uri: self.uri,
            query: self.query,
            header_options: self.header_options,
            observe,
            qos: self.qos.unwrap_or(qos),
            payload: self.payload,
        }
    }
}

/// What `handle_response` did with one inbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Completed,
    Notified,
    /// Notification older than the last one delivered.
    Stale,
    Discovery,
    Unmatched,
}

pub(crate) fn require_client(node: &NodeState) -> Result<(), OicError> {
    if node.config.mode.queries() {
        Ok(())
    } else {
        Err(OicError::InvalidMode("client operations need client or both mode"))
    }
}

pub(crate) fn allocate_token(node: &mut NodeState) -> Token {
    let token = Token(node.client.next_token);
    node.client.next_token = node.client.next_token.wrapping_add(1).max(1);
    token
}

/// Sends a GET/PUT/POST/DELETE. The reply, timeout or send failure arrives
/// later as a `RequestCompleted` event for the returned token.
pub fn send_request<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    request: OutboundRequest,
    now_ms: u64,
) -> Result<Token, OicError> {
    require_client(node)?;
    request.validate()?;
    let token = allocate_token(node);
    let host = (!request.host.is_empty()).then(|| request.host.clone());
    let uri = request.uri.clone();
    let message = MessageV1::request(request.into_message(token, None, node.config.qos));
    // Multicast is never confirmable.
    let retransmit = host
        .as_ref()
        .and_then(|_| retransmit_for(&node.config, &message, now_ms));
    node.client.pending.insert(
        token,
        PendingRequest {
            host: host.clone(),
            uri,
            deadline_ms: now_ms.saturating_add(node.config.request_timeout_ms()),
            retransmit,
        },
    );
    if let Err(err) = send_message(adapter, host.as_deref(), &message) {
        warn!(token = %token, error = %err, "request send failed");
        node.client.pending.remove(&token);
        node.push_event(NodeEvent::RequestCompleted {
            token,
            result: Err(RequestError::Communication(err.to_string())),
        });
    }
    Ok(token)
}

/// Observations target one host with a GET.
pub fn validate_observe_request(request: &OutboundRequest) -> Result<(), OicError> {
    if request.host.is_empty() {
        return Err(OicError::InvalidParam("observe needs a host"));
    }
    if request.method != Method::Get {
        return Err(OicError::InvalidParam("observe requires get"));
    }
    request.validate()
}

/// Registers an observation. Notifications arrive as `Observe` events.
pub fn start_observe<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    request: OutboundRequest,
    now_ms: u64,
) -> Result<Token, OicError> {
    require_client(node)?;
    validate_observe_request(&request)?;

    let token = allocate_token(node);
    let already_observed = node
        .client
        .observations
        .values()
        .any(|o| o.host == request.host && o.uri == request.uri);
    if already_observed {
        debug!(host = %request.host, uri = %request.uri, "resource already observed");
        node.push_event(NodeEvent::Observe {
            token,
            result: Err(RequestError::DuplicateRequest),
            terminal: true,
        });
        return Ok(token);
    }

    let host = request.host.clone();
    let uri = request.uri.clone();
    let message = MessageV1::request(request.into_message(
        token,
        Some(ObserveAction::Register),
        node.config.qos,
    ));
    node.client.observations.insert(
        token,
        Observation {
            host: host.clone(),
            uri,
            last_sequence: None,
            register_deadline_ms: Some(now_ms.saturating_add(node.config.request_timeout_ms())),
            retransmit: retransmit_for(&node.config, &message, now_ms),
        },
    );
    if let Err(err) = send_message(adapter, Some(&host), &message) {
        warn!(token = %token, error = %err, "observe send failed");
        node.client.observations.remove(&token);
        node.push_event(NodeEvent::Observe {
            token,
            result: Err(RequestError::Communication(err.to_string())),
            terminal: true,
        });
    }
    Ok(token)
}

fn retransmit_for(config: &PlatformConfig, message: &MessageV1, now_ms: u64) -> Option<Retransmit> {
    let MessageBody::Request(request) = &message.body else {
        return None;
    };
    request.qos.is_confirmable().then(|| Retransmit {
        message: message.clone(),
        attempts: 0,
        next_ms: now_ms.saturating_add(config.retransmit_backoff_ms(0)),
    })
}

/// Re-sends confirmable requests and observe registrations still waiting
/// for a reply, doubling the wait each time. Returns the number re-sent.
pub fn retransmit_requests<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    now_ms: u64,
) -> usize {
    let config = &node.config;
    let pending = node.client.pending.iter_mut().filter_map(|(token, pending)| {
        Some((*token, pending.host.as_deref()?, pending.retransmit.as_mut()?))
    });
    let observations = node
        .client
        .observations
        .iter_mut()
        .filter_map(|(token, o)| Some((*token, o.host.as_str(), o.retransmit.as_mut()?)));

    let mut resent = 0;
    for (token, host, retransmit) in pending.chain(observations) {
        if retransmit.next_ms > now_ms || retransmit.attempts >= config.max_retransmits {
            continue;
        }
        retransmit.attempts += 1;
        retransmit.next_ms = now_ms.saturating_add(config.retransmit_backoff_ms(retransmit.attempts));
        match send_message(adapter, Some(host), &retransmit.message) {
            Ok(()) => {
                debug!(token = %token, attempt = retransmit.attempts, "confirmable request re-sent");
                resent += 1;
            }
            Err(err) => debug!(token = %token, error = %err, "retransmission not sent"),
        }
    }
    resent
}

/// Acks a confirmable notification that matched a live observation.
pub fn acknowledge_notification<A: TransportAdapter>(
    adapter: &mut A,
    host: &str,
    token: Token,
    sequence: u32,
) {
    let ack = MessageV1::ack(AckMessage { token, sequence });
    if let Err(err) = send_message(adapter, Some(host), &ack) {
        debug!(host = %host, token = %token, error = %err, "notification ack not sent");
    }
}

/// Stops local delivery and sends a best-effort deregistration.
pub fn cancel_observe<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    token: Token,
) -> Result<(), OicError> {
    require_client(node)?;
    let Some(observation) = node.client.observations.remove(&token) else {
        return Ok(());
    };
    let message = MessageV1::request(RequestMessage {
        token,
        method: Method::Get,
        uri: observation.uri,
        query: QueryParams::new(),
        header_options: Vec::new(),
        observe: Some(ObserveAction::Deregister),
        qos: node.config.qos,
        multicast: false,
        payload: None,
    });
    if let Err(err) = send_message(adapter, Some(&observation.host), &message) {
        debug!(token = %token, error = %err, "observe deregistration not sent");
    }
    Ok(())
}

/// Correlates one inbound response with pending client state.
pub fn handle_response(node: &mut NodeState, from: &str, response: ResponseMessage) -> ResponseOutcome {
    let token = response.token;
    if let Some(pending) = node.client.pending.get(&token) {
        if pending.host.as_deref().is_some_and(|host| host != from) {
            debug!(host = %from, token = %token, "response from unexpected host");
            return ResponseOutcome::Unmatched;
        }
        node.client.pending.remove(&token);
        let result = match RequestError::from_code(response.code) {
            None => Ok(Reply::from_response(response)),
            Some(err) => Err(err),
        };
        node.push_event(NodeEvent::RequestCompleted { token, result });
        return ResponseOutcome::Completed;
    }
    if node.client.observations.contains_key(&token) {
        return handle_notification(node, from, response);
    }
    if node.client.discoveries.contains_key(&token) {
        return handle_discovery_response(node, from, response);
    }
    debug!(host = %from, token = %token, "unmatched response dropped");
    ResponseOutcome::Unmatched
}

fn handle_notification(node: &mut NodeState, from: &str, response: ResponseMessage) -> ResponseOutcome {
    let token = response.token;
    let Some(observation) = node.client.observations.get_mut(&token) else {
        return ResponseOutcome::Unmatched;
    };
    if observation.host != from {
        debug!(host = %from, token = %token, "notification from unexpected host");
        return ResponseOutcome::Unmatched;
    }

    let (result, terminal) = match (RequestError::from_code(response.code), response.sequence) {
        (Some(err), _) => (Err(err), true),
        (None, None) => {
            let reply = Reply::from_response(response);
            (Ok(ObserveNotification { sequence: None, reply }), true)
        }
        (None, Some(sequence)) => {
            if observation
                .last_sequence
                .is_some_and(|last| !sequence_is_newer(sequence, last))
            {
                debug!(token = %token, sequence, "stale notification dropped");
                return ResponseOutcome::Stale;
            }
            observation.last_sequence = Some(sequence);
            observation.register_deadline_ms = None;
            observation.retransmit = None;
            let reply = Reply::from_response(response);
            (
                Ok(ObserveNotification {
                    sequence: Some(sequence),
                    reply,
                }),
                false,
            )
        }
    };
    if terminal {
        node.client.observations.remove(&token);
    }
    node.push_event(NodeEvent::Observe {
        token,
        result,
        terminal,
    });
    ResponseOutcome::Notified
}

/// Times out requests and unconfirmed observations past their deadline.
pub fn expire_requests(node: &mut NodeState, now_ms: u64) -> usize {
    let expired: Vec<Token> = node
        .client
        .pending
        .iter()
        .filter(|(_, pending)| pending.deadline_ms <= now_ms)
        .map(|(token, _)| *token)
        .collect();
    for token in &expired {
        if let Some(pending) = node.client.pending.remove(token) {
            debug!(token = %token, uri = %pending.uri, "request timed out");
        }
        node.push_event(NodeEvent::RequestCompleted {
            token: *token,
            result: Err(RequestError::Timeout),
        });
    }

    let unconfirmed: Vec<Token> = node
        .client
        .observations
        .iter()
        .filter(|(_, o)| o.register_deadline_ms.is_some_and(|deadline| deadline <= now_ms))
        .map(|(token, _)| *token)
        .collect();
    for token in &unconfirmed {
        node.client.observations.remove(token);
        node.push_event(NodeEvent::Observe {
            token: *token,
            result: Err(RequestError::Timeout),
            terminal: true,
        });
    }
    expired.len() + unconfirmed.len()
}
