//! Transport abstractions for the OIC stack.
//!
//! The node/runtime only depends on the byte-oriented adapter trait defined
//! here; in-memory and UDP implementations are provided.

pub mod adapter;
pub mod network;
pub mod udp;
