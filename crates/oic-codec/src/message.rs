use serde::{Deserialize, Serialize};

use oic_core::header::validate_header_options;
use oic_core::types::{MAX_PRESENCE_TTL_SECS, MAX_SEQUENCE_NUMBER};
use oic_core::{
    HeaderOption, Method, ObserveAction, PresenceTrigger, QualityOfService, QueryParams,
    Representation, ResourceProperty, ResponseCode, Token,
};

use crate::error::CodecError;

/// Message schema version for `MessageV1`.
pub const MESSAGE_V1_VERSION: u16 = 1;
/// Deepest representation nesting accepted on the wire.
pub const MAX_NESTING_DEPTH: usize = 32;

/// One datagram on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageV1 {
    /// Wire version.
    pub version: u16,
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    Request(RequestMessage),
    Response(ResponseMessage),
    Presence(PresenceMessage),
    Ack(AckMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub token: Token,
    pub method: Method,
    /// Resource path without query.
    pub uri: String,
    pub query: QueryParams,
    pub header_options: Vec<HeaderOption>,
    pub observe: Option<ObserveAction>,
    pub qos: QualityOfService,
    /// Sent to the multicast group rather than one host.
    pub multicast: bool,
    pub payload: Option<Representation>,
}

/// Discovery entry for one server-side resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLink {
    #[serde(rename = "href")]
    pub uri: String,
    #[serde(rename = "rt")]
    pub resource_types: Vec<String>,
    #[serde(rename = "if")]
    pub interfaces: Vec<String>,
    #[serde(rename = "p")]
    pub properties: ResourceProperty,
    /// Id of the device hosting the resource.
    #[serde(rename = "di")]
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    Empty,
    Representation(Representation),
    Discovery(Vec<ResourceLink>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub token: Token,
    pub code: ResponseCode,
    /// Observe sequence number; set on registration replies and notifications.
    pub sequence: Option<u32>,
    pub header_options: Vec<HeaderOption>,
    /// Uri of a resource created by the request.
    pub new_resource_uri: Option<String>,
    pub payload: ResponsePayload,
    /// Receiver must answer with an `AckMessage`.
    #[serde(default)]
    pub confirmable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMessage {
    /// Strictly increases with every change announced by a server.
    pub nonce: u32,
    /// Seconds the announcement stays valid; 0 means presence stopped.
    pub ttl_secs: u32,
    pub resource_type: Option<String>,
    pub trigger: PresenceTrigger,
}

/// Acknowledges a confirmable notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub token: Token,
    pub sequence: u32,
}

impl MessageV1 {
    pub fn request(request: RequestMessage) -> Self {
        Self {
            version: MESSAGE_V1_VERSION,
            body: MessageBody::Request(request),
        }
    }

    pub fn response(response: ResponseMessage) -> Self {
        Self {
            version: MESSAGE_V1_VERSION,
            body: MessageBody::Response(response),
        }
    }

    pub fn presence(presence: PresenceMessage) -> Self {
        Self {
            version: MESSAGE_V1_VERSION,
            body: MessageBody::Presence(presence),
        }
    }

    pub fn ack(ack: AckMessage) -> Self {
        Self {
            version: MESSAGE_V1_VERSION,
            body: MessageBody::Ack(ack),
        }
    }

    /// Validates message schema and field consistency.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.version != MESSAGE_V1_VERSION {
            return Err(CodecError::InvalidMessage("unsupported message version"));
        }
        match &self.body {
            MessageBody::Request(request) => request.validate(),
            MessageBody::Response(response) => response.validate(),
            MessageBody::Presence(presence) => presence.validate(),
            MessageBody::Ack(ack) => ack.validate(),
        }
    }
}

fn validate_options(options: &[HeaderOption]) -> Result<(), CodecError> {
    validate_header_options(options).map_err(|_| CodecError::InvalidMessage("invalid header options"))
}

fn validate_depth(rep: &Representation) -> Result<(), CodecError> {
    if rep.nesting_depth() > MAX_NESTING_DEPTH {
        return Err(CodecError::InvalidMessage("representation nested too deeply"));
    }
    Ok(())
}

impl RequestMessage {
    pub fn validate(&self) -> Result<(), CodecError> {
        if !self.uri.starts_with('/') {
            return Err(CodecError::InvalidMessage("request uri must be absolute"));
        }
        validate_options(&self.header_options)?;
        match (&self.payload, self.method) {
            (Some(rep), Method::Put | Method::Post) => validate_depth(rep)?,
            (Some(_), _) => {
                return Err(CodecError::InvalidMessage(
                    "payload only allowed on put/post",
                ))
            }
            (None, _) => {}
        }
        if self.observe.is_some() && self.method != Method::Get {
            return Err(CodecError::InvalidMessage("observe requires get"));
        }
        Ok(())
    }
}

impl ResponseMessage {
    pub fn validate(&self) -> Result<(), CodecError> {
        validate_options(&self.header_options)?;
        if self.sequence.is_some_and(|seq| seq > MAX_SEQUENCE_NUMBER) {
            return Err(CodecError::InvalidMessage("sequence exceeds 24 bits"));
        }
        if self.confirmable && self.sequence.is_none() {
            return Err(CodecError::InvalidMessage("only notifications are confirmable"));
        }
        match &self.payload {
            ResponsePayload::Representation(rep) => validate_depth(rep),
            ResponsePayload::Discovery(links) => {
                if links.iter().any(|link| !link.uri.starts_with('/')) {
                    return Err(CodecError::InvalidMessage("resource link uri must be absolute"));
                }
                Ok(())
            }
            ResponsePayload::Empty => Ok(()),
        }
    }
}

impl PresenceMessage {
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.ttl_secs > MAX_PRESENCE_TTL_SECS {
            return Err(CodecError::InvalidMessage("presence ttl exceeds maximum"));
        }
        Ok(())
    }
}

impl AckMessage {
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.sequence > MAX_SEQUENCE_NUMBER {
            return Err(CodecError::InvalidMessage("sequence exceeds 24 bits"));
        }
        Ok(())
    }
}

/// Encodes `MessageV1` as CBOR after validation.
pub fn encode_message_cbor(message: &MessageV1) -> Result<Vec<u8>, CodecError> {
    message.validate()?;
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(message, &mut bytes)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes and validates a full CBOR message.
pub fn decode_message_cbor(bytes: &[u8]) -> Result<MessageV1, CodecError> {
    let message: MessageV1 =
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    message.validate()?;
    Ok(message)
}
