//! PeerTransfer state machine.
//!
//! Moves a block from the module being demoted (`target`) straight to the
//! module that asked for it (`peer`) over their shared low network, then waits
//! for the peer's acknowledgement.

use super::Event;
use crate::common::error::Result;
use crate::common::{ModuleId, NetId, NodeId};
use crate::config::CONTROL_MESSAGE_SIZE;
use crate::interconnect::MessageKind;
use crate::sim::{StackId, System};

/// PeerTransfer stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerStage {
    /// Send the block to the peer.
    Send,
    /// Peer: take the block.
    Receive,
    /// Peer: acknowledge.
    ReplyAck,
    /// Sender: take the acknowledgement.
    Finish,
}

impl PeerStage {
    /// Stage name used in traces and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Send => "peer send",
            Self::Receive => "peer receive",
            Self::ReplyAck => "peer reply ack",
            Self::Finish => "peer finish",
        }
    }
}

impl System {
    /// Sender and peer nodes on their common low network.
    fn peer_route(&self, stack: StackId, stage: &'static str) -> Result<(ModuleId, NetId, NodeId, NodeId)> {
        let f = self.frame(stack, stage)?;
        let (addr, peer) = (f.addr, f.peer);
        let src = self.target_of(stack, stage)?;
        let peer = peer.ok_or_else(|| self.violation(src, addr, stage, "peer transfer without a peer"))?;
        match (self.module_ref(src).low, self.module_ref(peer).low) {
            (Some(a), Some(b)) if a.net == b.net => Ok((src, a.net, a.node, b.node)),
            _ => Err(self.violation(src, addr, stage, "peer is not on the same network")),
        }
    }

    pub(crate) fn handle_peer(&mut self, stage: PeerStage, stack: StackId) -> Result<()> {
        let name = stage.name();
        let module = self.frame(stack, name)?.module;
        self.trace_stage(stack, module, name);
        let (src, net, src_node, peer_node) = self.peer_route(stack, name)?;

        match stage {
            PeerStage::Send => {
                let size = self.module_ref(src).block_size() + CONTROL_MESSAGE_SIZE;
                let sent = self.try_send(
                    stack,
                    net,
                    src_node,
                    peer_node,
                    size,
                    MessageKind::PeerData,
                    Event::Peer(PeerStage::Receive),
                    Event::Peer(PeerStage::Send),
                    name,
                )?;
                if sent {
                    self.module_mut(src).stats.peer_transfers += 1;
                }
            }

            PeerStage::Receive => {
                self.receive(stack, peer_node, name)?;
                self.schedule(Event::Peer(PeerStage::ReplyAck), stack, 0);
            }

            PeerStage::ReplyAck => {
                let _ = self.try_send(
                    stack,
                    net,
                    peer_node,
                    src_node,
                    CONTROL_MESSAGE_SIZE,
                    MessageKind::PeerAck,
                    Event::Peer(PeerStage::Finish),
                    Event::Peer(PeerStage::ReplyAck),
                    name,
                )?;
            }

            PeerStage::Finish => {
                self.receive(stack, src_node, name)?;
                self.stack_return(stack, name)?;
            }
        }
        Ok(())
    }
}
