//! Messaging facade between modules.
//!
//! Modules exchange requests and replies only through networks. Messages are
//! logical envelopes (size, kind, endpoints); no data bytes are modeled.

/// Networks, nodes, messages and the message log.
pub mod network;

pub use network::{Message, MessageId, MessageKind, MessageRecord, Network, Node};
