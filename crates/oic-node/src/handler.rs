use oic_core::header::validate_header_options;
use oic_core::{
    EntityHandlerResult, HandlerFlags, HeaderOption, Method, ObservationInfo, OicError,
    QueryParams, Representation, ResponseCode, Token,
};

use crate::state::ResourceHandle;

/// Server-side callback bound to one resource.
///
/// Runs on the platform worker. Returning `None` for a REQUEST means the
/// handler could not produce a response; the caller then sees a resource
/// error. The return value of INIT dispatches is ignored.
pub type EntityHandler = Box<dyn FnMut(&Request) -> Option<Response> + Send>;

/// One dispatch delivered to an entity handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub flags: HandlerFlags,
    pub method: Method,
    pub query: QueryParams,
    pub header_options: Vec<HeaderOption>,
    pub resource: ResourceHandle,
    pub token: Token,
    /// Host the request came from; empty for locally generated dispatches.
    pub host: String,
    pub payload: Option<Representation>,
    /// Set only when `flags` carries OBSERVER.
    pub observation: Option<ObservationInfo>,
}

impl Request {
    pub fn is_init(&self) -> bool {
        self.flags.contains(HandlerFlags::INIT)
    }

    pub fn is_observe(&self) -> bool {
        self.flags.contains(HandlerFlags::OBSERVER)
    }

    /// Payload of a PUT/POST, or an empty representation.
    pub fn representation(&self) -> Representation {
        self.payload.clone().unwrap_or_default()
    }
}

/// Handler reply to a REQUEST dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub result: EntityHandlerResult,
    /// Overrides the code derived from `result` when set.
    pub error_code: Option<ResponseCode>,
    pub representation: Representation,
    pub header_options: Vec<HeaderOption>,
    /// Uri of the resource created by a RESOURCE_CREATED reply.
    pub new_resource_uri: Option<String>,
    pub request_token: Token,
    pub resource: ResourceHandle,
}

impl Response {
    /// Empty OK response answering `request`.
    pub fn to(request: &Request) -> Self {
        Self {
            result: EntityHandlerResult::Ok,
            error_code: None,
            representation: Representation::new(),
            header_options: Vec::new(),
            new_resource_uri: None,
            request_token: request.token,
            resource: request.resource,
        }
    }

    pub fn with_result(mut self, result: EntityHandlerResult) -> Self {
        self.result = result;
        self
    }

    pub fn with_representation(mut self, representation: Representation) -> Self {
        self.representation = representation;
        self
    }

    pub fn with_error_code(mut self, code: ResponseCode) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn set_header_options(&mut self, options: Vec<HeaderOption>) -> Result<(), OicError> {
        validate_header_options(&options)?;
        self.header_options = options;
        Ok(())
    }

    pub fn set_new_resource_uri(&mut self, uri: impl Into<String>) {
        self.new_resource_uri = Some(uri.into());
    }

    /// Wire code for this response to a `method` request.
    pub fn response_code(&self, method: Method) -> ResponseCode {
        self.error_code
            .unwrap_or_else(|| self.result.response_code(method))
    }
}
