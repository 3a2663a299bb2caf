//! Core OIC primitives shared across crates.
//!
//! Includes the typed attribute model, `Representation`, header options,
//! protocol flag sets and codes, query helpers, and the base error type.

pub mod attributes;
pub mod error;
pub mod hash;
pub mod header;
pub mod query;
pub mod representation;
pub mod types;
pub mod value;

pub use attributes::AttributeMap;
pub use error::OicError;
pub use header::HeaderOption;
pub use query::QueryParams;
pub use representation::Representation;
pub use types::{
    ConnectivityType, EntityHandlerResult, HandlerFlags, Method, ModeType, ObservationId,
    ObservationInfo, ObserveAction, PresenceStatus, PresenceTrigger, QualityOfService,
    ResourceProperty, ResponseCode, StackResult, Token,
};
pub use value::{Array, AttributeKind, AttributeType, AttributeValue};
