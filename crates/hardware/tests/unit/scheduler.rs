//! Event Scheduler Tests.
//!
//! Entries fire in cycle order, ties fire in scheduling order, and the clock
//! only moves when the caller advances it.

use memsys_core::sim::EventQueue;
use pretty_assertions::assert_eq;

fn drain_due(q: &mut EventQueue<&'static str>) -> Vec<&'static str> {
    std::iter::from_fn(|| q.pop_due()).collect()
}

#[test]
fn nothing_fires_before_its_cycle() {
    let mut q = EventQueue::new();
    q.schedule("later", 3);

    assert_eq!(q.pop_due(), None);
    assert_eq!(q.next_time(), Some(3));
    q.advance_to(2);
    assert_eq!(q.pop_due(), None);
    q.advance_to(3);
    assert_eq!(q.pop_due(), Some("later"));
    assert!(q.is_empty());
}

#[test]
fn orders_by_cycle_then_insertion() {
    let mut q = EventQueue::new();
    q.schedule("c", 2);
    q.schedule("a", 1);
    q.schedule("b", 1);
    q.schedule("d", 2);

    q.advance_to(2);
    assert_eq!(drain_due(&mut q), vec!["a", "b", "c", "d"]);
}

/// Zero-delay work scheduled while a cycle drains runs in that same cycle,
/// after everything already queued for it.
#[test]
fn zero_delay_runs_later_in_same_cycle() {
    let mut q = EventQueue::new();
    q.schedule("first", 0);
    q.schedule("second", 0);

    assert_eq!(q.pop_due(), Some("first"));
    q.schedule("spawned", 0);
    assert_eq!(drain_due(&mut q), vec!["second", "spawned"]);
    assert_eq!(q.now(), 0);
}

#[test]
fn clock_never_moves_backwards() {
    let mut q: EventQueue<()> = EventQueue::new();
    q.advance_to(10);
    q.advance_to(4);
    assert_eq!(q.now(), 10);

    q.schedule((), 5);
    assert_eq!(q.next_time(), Some(15));
    assert_eq!(q.len(), 1);
}
