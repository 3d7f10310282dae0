//! Network Tests.
//!
//! Serialization on the sender's link, fixed hop latency, destination buffer
//! reservation and release, and the optional message log.

use memsys_core::common::{ModuleId, NetId, NodeId};
use memsys_core::config::NetworkConfig;
use memsys_core::interconnect::{MessageKind, Network};
use memsys_core::protocol::{Event, PeerStage, Scheduled};
use memsys_core::sim::{Arena, EventQueue, StackId};
use pretty_assertions::assert_eq;

struct Fixture {
    net: Network,
    events: EventQueue<Scheduled>,
    stack: StackId,
    a: NodeId,
    b: NodeId,
    c: NodeId,
}

fn fixture(buffer_size: u64, record: bool) -> Fixture {
    let config = NetworkConfig {
        name: "net".to_owned(),
        latency: 2,
        bandwidth: 64,
        buffer_size,
    };
    let mut net = Network::new(NetId(0), &config, record);
    let a = net.add_node("a", ModuleId(0));
    let b = net.add_node("b", ModuleId(1));
    let c = net.add_node("c", ModuleId(2));
    let mut arena = Arena::new();
    Fixture {
        net,
        events: EventQueue::new(),
        stack: arena.create(()),
        a,
        b,
        c,
    }
}

fn arrive(stack: StackId) -> Scheduled {
    Scheduled {
        event: Event::Peer(PeerStage::Receive),
        stack,
    }
}

#[test]
fn nodes_are_indexed_in_attach_order() {
    let f = fixture(1024, false);
    assert_eq!((f.a, f.b, f.c), (NodeId(0), NodeId(1), NodeId(2)));
    assert_eq!(f.net.node_of(ModuleId(1)), Some(NodeId(1)));
    assert_eq!(f.net.node(NodeId(2)).unwrap().name, "c");
    assert_eq!(f.net.node_of(ModuleId(9)), None);
}

#[test]
fn arrival_is_serialization_plus_latency() {
    let mut f = fixture(1024, false);
    assert_eq!(f.net.transit_time(72), 4);

    let _ = f.net.send(f.a, f.b, 72, MessageKind::Writeback, arrive(f.stack), &mut f.events);
    assert_eq!(f.events.next_time(), Some(4));
    assert_eq!(f.net.stats.messages, 1);
    assert_eq!(f.net.stats.bytes, 72);
}

/// A second message from the same node waits for the link; another sender does not.
#[test]
fn sender_link_sends_one_message_at_a_time() {
    let mut f = fixture(1024, false);
    let first = f.net.send(f.a, f.c, 72, MessageKind::Writeback, arrive(f.stack), &mut f.events);
    let second = f.net.send(f.a, f.c, 8, MessageKind::Reply, arrive(f.stack), &mut f.events);
    let _ = f.net.send(f.b, f.c, 8, MessageKind::Reply, arrive(f.stack), &mut f.events);
    assert_ne!(first, second);

    let mut times = Vec::new();
    while let Some(t) = f.events.next_time() {
        f.events.advance_to(t);
        let _ = f.events.pop_due();
        times.push(t);
    }
    assert_eq!(times, vec![3, 4, 5]);
}

#[test]
fn buffer_space_is_reserved_until_receive() {
    let mut f = fixture(80, false);
    let msg = f.net.send(f.a, f.b, 72, MessageKind::PeerData, arrive(f.stack), &mut f.events);

    assert_eq!(f.net.node(f.b).unwrap().buffered(), 72);
    assert!(!f.net.can_send(f.c, f.b, 16));
    assert!(f.net.can_send(f.c, f.b, 8));
    assert!(f.net.can_send(f.c, f.a, 80), "other destinations are unaffected");

    let received = f.net.receive(f.b, msg, &mut f.events).unwrap();
    assert_eq!(received.kind, MessageKind::PeerData);
    assert_eq!((received.src, received.dst, received.size), (f.a, f.b, 72));
    assert_eq!(f.net.node(f.b).unwrap().buffered(), 0);
    assert_eq!(f.net.in_flight(), 0);
}

#[test]
fn receive_rejects_wrong_node_and_duplicates() {
    let mut f = fixture(1024, false);
    let msg = f.net.send(f.a, f.b, 8, MessageKind::ReadRequest, arrive(f.stack), &mut f.events);

    assert!(f.net.receive(f.c, msg, &mut f.events).is_none());
    assert!(f.net.receive(f.b, msg, &mut f.events).is_some());
    assert!(f.net.receive(f.b, msg, &mut f.events).is_none());
}

/// A sender parked on a full buffer is re-run in the cycle space frees up.
#[test]
fn full_buffer_parks_sender_until_receive() {
    let mut f = fixture(72, false);
    let msg = f.net.send(f.a, f.b, 72, MessageKind::Writeback, arrive(f.stack), &mut f.events);
    f.events.advance_to(4);
    let _ = f.events.pop_due();

    let retry = Scheduled {
        event: Event::Peer(PeerStage::Send),
        stack: f.stack,
    };
    assert!(!f.net.can_send(f.c, f.b, 8));
    f.net.wait_for_space(f.b, retry);
    assert_eq!(f.net.stats.retries, 1);
    assert_eq!(f.events.pop_due(), None);

    let _ = f.net.receive(f.b, msg, &mut f.events);
    assert_eq!(f.events.pop_due(), Some(retry));
    assert!(f.net.can_send(f.c, f.b, 8));
}

#[test]
fn log_records_only_when_enabled() {
    let mut quiet = fixture(1024, false);
    let _ = quiet.net.send(quiet.a, quiet.b, 8, MessageKind::EvictNotice, arrive(quiet.stack), &mut quiet.events);
    assert!(quiet.net.records().is_empty());

    let mut f = fixture(1024, true);
    f.events.advance_to(7);
    let _ = f.net.send(f.c, f.a, 8, MessageKind::PeerAck, arrive(f.stack), &mut f.events);
    let log = f.net.records();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].cycle, 7);
    assert_eq!((log[0].src, log[0].dst), (ModuleId(2), ModuleId(0)));
    assert_eq!(log[0].kind, MessageKind::PeerAck);
    assert_eq!(log[0].kind.to_string(), "peer_ack");
}
