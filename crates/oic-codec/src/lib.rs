//! OIC wire codec primitives.
//!
//! Defines the versioned request/response/presence message schema and CBOR
//! encode/decode helpers that validate at the decode boundary.

pub mod error;
pub mod message;
