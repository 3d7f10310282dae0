//! Network model.
//!
//! Each network connects the modules attached to it as end nodes. A message costs:
//! 1. **Serialization:** `ceil(size / bandwidth)` cycles on the source's output link,
//!    which sends one message at a time.
//! 2. **Latency:** A fixed hop latency after the last byte leaves the source.
//! 3. **Buffer space:** `size` bytes in the destination's input buffer, reserved at
//!    send time and released when the destination calls `receive`.
//!
//! A sender that finds the destination buffer full registers with
//! `wait_for_space` and is re-run once a `receive` frees space.

use std::collections::HashMap;
use std::fmt;

use crate::common::{ModuleId, NetId, NodeId};
use crate::config::NetworkConfig;
use crate::protocol::Scheduled;
use crate::sim::EventQueue;
use crate::stats::NetworkStats;

/// What a message carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Read request (either direction).
    ReadRequest,
    /// Write request (either direction).
    WriteRequest,
    /// Eviction of a clean block.
    EvictNotice,
    /// Eviction of a dirty block, data included.
    Writeback,
    /// Reply to a request or eviction.
    Reply,
    /// Block sent directly to a peer.
    PeerData,
    /// Peer acknowledging a direct transfer.
    PeerAck,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReadRequest => "read_request",
            Self::WriteRequest => "write_request",
            Self::EvictNotice => "evict_notice",
            Self::Writeback => "writeback",
            Self::Reply => "reply",
            Self::PeerData => "peer_data",
            Self::PeerAck => "peer_ack",
        })
    }
}

/// Handle of an in-flight message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub u64);

/// An in-flight message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Handle.
    pub id: MessageId,
    /// Sending node.
    pub src: NodeId,
    /// Receiving node.
    pub dst: NodeId,
    /// Size in bytes.
    pub size: u64,
    /// Payload kind.
    pub kind: MessageKind,
    /// Cycle the message was accepted.
    pub sent: u64,
    /// Cycle the message reaches the destination.
    pub arrival: u64,
}

/// Log entry for one sent message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    /// Cycle the message was sent.
    pub cycle: u64,
    /// Sending module.
    pub src: ModuleId,
    /// Receiving module.
    pub dst: ModuleId,
    /// Size in bytes.
    pub size: u64,
    /// Payload kind.
    pub kind: MessageKind,
}

/// An end node: one module's attachment point.
#[derive(Debug)]
pub struct Node {
    /// Module name.
    pub name: String,
    /// Module attached here.
    pub module: ModuleId,
    buffered: u64,
    busy_until: u64,
    space_waiters: Vec<Scheduled>,
}

impl Node {
    /// Bytes currently reserved in the input buffer.
    #[inline]
    pub const fn buffered(&self) -> u64 {
        self.buffered
    }
}

/// One network.
#[derive(Debug)]
pub struct Network {
    /// Index in the system's network table.
    pub id: NetId,
    /// Configured name.
    pub name: String,
    latency: u64,
    bandwidth: u64,
    buffer_size: u64,
    nodes: Vec<Node>,
    in_flight: HashMap<MessageId, Message>,
    next_id: u64,
    /// Counters.
    pub stats: NetworkStats,
    log: Option<Vec<MessageRecord>>,
}

impl Network {
    /// Creates a network without nodes.
    ///
    /// # Arguments
    ///
    /// * `id` - Index in the system's network table.
    /// * `config` - Latency, bandwidth and buffer parameters.
    /// * `record` - Keep a log of every message sent.
    pub fn new(id: NetId, config: &NetworkConfig, record: bool) -> Self {
        Self {
            id,
            name: config.name.clone(),
            latency: config.latency,
            bandwidth: config.bandwidth.max(1),
            buffer_size: config.buffer_size,
            nodes: Vec::new(),
            in_flight: HashMap::new(),
            next_id: 0,
            stats: NetworkStats::default(),
            log: record.then(Vec::new),
        }
    }

    /// Attaches a module as a new end node.
    pub fn add_node(&mut self, name: &str, module: ModuleId) -> NodeId {
        self.nodes.push(Node {
            name: name.to_owned(),
            module,
            buffered: 0,
            busy_until: 0,
            space_waiters: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Returns a node.
    #[inline]
    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(node.0)
    }

    /// Returns the node a module is attached at.
    pub fn node_of(&self, module: ModuleId) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.module == module).map(NodeId)
    }

    /// All nodes in index order.
    #[inline]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Cycles from acceptance to arrival for a message of `size` bytes on an idle link.
    pub const fn transit_time(&self, size: u64) -> u64 {
        size.div_ceil(self.bandwidth) + self.latency
    }

    /// Returns true if `dst` can buffer `size` more bytes.
    pub fn can_send(&self, src: NodeId, dst: NodeId, size: u64) -> bool {
        src.0 < self.nodes.len()
            && self
                .nodes
                .get(dst.0)
                .is_some_and(|n| n.buffered + size <= self.buffer_size)
    }

    /// Accepts a message and schedules `arrive` for its arrival cycle.
    ///
    /// The caller must have checked `can_send` in the same cycle.
    ///
    /// # Returns
    ///
    /// The handle the destination passes to `receive`.
    pub fn send(
        &mut self,
        src: NodeId,
        dst: NodeId,
        size: u64,
        kind: MessageKind,
        arrive: Scheduled,
        events: &mut EventQueue<Scheduled>,
    ) -> MessageId {
        let now = events.now();
        let out = &mut self.nodes[src.0];
        let start = now.max(out.busy_until);
        out.busy_until = start + size.div_ceil(self.bandwidth);
        let arrival = out.busy_until + self.latency;
        self.nodes[dst.0].buffered += size;

        let id = MessageId(self.next_id);
        self.next_id += 1;
        self.stats.messages += 1;
        self.stats.bytes += size;
        if let Some(log) = &mut self.log {
            log.push(MessageRecord {
                cycle: now,
                src: self.nodes[src.0].module,
                dst: self.nodes[dst.0].module,
                size,
                kind,
            });
        }
        tracing::trace!(
            net = %self.name,
            src = %self.nodes[src.0].name,
            dst = %self.nodes[dst.0].name,
            size,
            %kind,
            arrival,
            "message sent"
        );
        let _ = self.in_flight.insert(
            id,
            Message {
                id,
                src,
                dst,
                size,
                kind,
                sent: now,
                arrival,
            },
        );
        events.schedule(arrive, arrival - now);
        id
    }

    /// Consumes a message at its destination, releasing its buffer space.
    ///
    /// Every sender waiting for space at `node` is re-run in the current cycle.
    ///
    /// # Returns
    ///
    /// The message, or `None` if `msg` is unknown or addressed elsewhere.
    pub fn receive(
        &mut self,
        node: NodeId,
        msg: MessageId,
        events: &mut EventQueue<Scheduled>,
    ) -> Option<Message> {
        if self.in_flight.get(&msg)?.dst != node {
            return None;
        }
        let message = self.in_flight.remove(&msg)?;
        let dst = &mut self.nodes[node.0];
        dst.buffered -= message.size;
        for waiter in dst.space_waiters.drain(..) {
            events.schedule(waiter, 0);
        }
        Some(message)
    }

    /// Registers `retry` to run once a message is received at `dst`.
    pub fn wait_for_space(&mut self, dst: NodeId, retry: Scheduled) {
        self.stats.retries += 1;
        tracing::trace!(net = %self.name, dst = %self.nodes[dst.0].name, "send deferred: buffer full");
        self.nodes[dst.0].space_waiters.push(retry);
    }

    /// Messages accepted but not yet received.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Log of sent messages, if recording is enabled.
    pub fn records(&self) -> &[MessageRecord] {
        self.log.as_deref().unwrap_or_default()
    }
}
