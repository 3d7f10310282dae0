//! Coherence Protocol Scenarios.
//!
//! Drives small hierarchies through the public `System` API and checks block
//! states, directory contents, message traffic and counters after each
//! scenario. Accesses run one at a time unless a test is about concurrency.

use memsys_core::common::{AccessKind, SimError};
use memsys_core::sim::Completion;
use memsys_core::interconnect::MessageKind;
use memsys_core::mem::BlockState;
use pretty_assertions::assert_eq;

use crate::common::harness::{TestContext, three_level, three_level_with, two_level, two_level_with};

// ══════════════════════════════════════════════════════════
// 1. Load and store basics
// ══════════════════════════════════════════════════════════

/// A cold load fetches through every level and ends Exclusive everywhere.
#[test]
fn load_miss_on_empty_hierarchy_is_exclusive() {
    let mut ctx = TestContext::new(&two_level(2));
    let done = ctx.load("l1-0", 0x48);

    assert_eq!(done.state, BlockState::Exclusive);
    assert_eq!(done.tag, 0x40);
    assert!(!done.coalesced);
    assert!(done.latency() > 0);
    assert_eq!(ctx.state("l1-0", 0x40), BlockState::Exclusive);
    assert_eq!(ctx.state("l2", 0x40), BlockState::Exclusive);
    assert_eq!(ctx.state("mem", 0x40), BlockState::Exclusive);
    assert_eq!(ctx.sharers("l2", 0x40), vec!["l1-0"]);
    assert_eq!(ctx.owner("l2", 0x40).as_deref(), Some("l1-0"));
    assert_eq!(ctx.sharers("mem", 0x40), vec!["l2"]);

    let l1 = ctx.stats("l1-0");
    assert_eq!((l1.accesses, l1.hits, l1.evictions), (1, 0, 0));
    assert_eq!(ctx.sent("net-l1-l2", "l1-0", MessageKind::ReadRequest).len(), 1);
    assert_eq!(ctx.sent("net-l2-mem", "l2", MessageKind::ReadRequest).len(), 1);
}

/// A second reader demotes the exclusive owner; both end Shared.
#[test]
fn second_reader_demotes_owner_to_shared() {
    let mut ctx = TestContext::new(&two_level(2));
    let _ = ctx.load("l1-0", 0x40);
    let done = ctx.load("l1-1", 0x40);

    assert_eq!(done.state, BlockState::Shared);
    assert_eq!(ctx.state("l1-0", 0x40), BlockState::Shared);
    assert_eq!(ctx.state("l2", 0x40), BlockState::Exclusive);
    assert_eq!(ctx.sharers("l2", 0x40), vec!["l1-0", "l1-1"]);
    assert_eq!(ctx.owner("l2", 0x40), None);
    assert_eq!(ctx.sent("net-l1-l2", "l2", MessageKind::ReadRequest).len(), 1);
}

#[test]
fn repeated_load_hits() {
    let mut ctx = TestContext::new(&two_level(1));
    let first = ctx.load("l1-0", 0x100);
    let second = ctx.load("l1-0", 0x108);

    assert_eq!(second.state, BlockState::Exclusive);
    assert!(second.latency() < first.latency());
    let l1 = ctx.stats("l1-0");
    assert_eq!((l1.accesses, l1.hits, l1.read_hits), (2, 1, 1));
}

/// A store hit on an Exclusive block upgrades silently.
#[test]
fn store_hit_on_exclusive_needs_no_request() {
    let mut ctx = TestContext::new(&two_level(1));
    let _ = ctx.load("l1-0", 0x40);
    let before = ctx.records("net-l1-l2").len();
    let done = ctx.store("l1-0", 0x40);

    assert_eq!(done.state, BlockState::Modified);
    assert_eq!(ctx.state("l1-0", 0x40), BlockState::Modified);
    assert_eq!(ctx.records("net-l1-l2").len(), before);
}

#[test]
fn cold_store_gains_ownership() {
    let mut ctx = TestContext::new(&two_level(2));
    let done = ctx.store("l1-1", 0x200);

    assert_eq!(done.state, BlockState::Modified);
    assert_eq!(ctx.state("l2", 0x200), BlockState::Exclusive);
    assert_eq!(ctx.sharers("l2", 0x200), vec!["l1-1"]);
    assert_eq!(ctx.owner("l2", 0x200).as_deref(), Some("l1-1"));
    assert_eq!(ctx.sent("net-l1-l2", "l1-1", MessageKind::WriteRequest).len(), 1);
    assert_eq!(ctx.sent("net-l2-mem", "l2", MessageKind::WriteRequest).len(), 1);
}

/// Stores from two modules hand the block over; the old writer ships its data
/// straight to the new one.
#[test]
fn store_steals_modified_block_through_peer() {
    let mut ctx = TestContext::new(&two_level(2));
    let _ = ctx.store("l1-0", 0x40);
    let done = ctx.store("l1-1", 0x40);

    assert_eq!(done.state, BlockState::Modified);
    assert_eq!(ctx.state("l1-0", 0x40), BlockState::Invalid);
    assert_eq!(ctx.sharers("l2", 0x40), vec!["l1-1"]);
    assert_eq!(ctx.owner("l2", 0x40).as_deref(), Some("l1-1"));
    assert_eq!(ctx.stats("l1-0").peer_transfers, 1);
    assert_eq!(ctx.stats("l2").invalidations, 1);

    let reply = ctx.sent("net-l1-l2", "l2", MessageKind::Reply);
    assert_eq!(reply.last().unwrap().size, 8, "data went peer to peer");
}

// ══════════════════════════════════════════════════════════
// 2. Coalescing and per-block ordering
// ══════════════════════════════════════════════════════════

/// Two same-cycle loads of one block: the second rides on the first.
#[test]
fn same_cycle_loads_coalesce() {
    let mut ctx = TestContext::new(&two_level(1));
    let a = ctx.issue("l1-0", AccessKind::Load, 0x40);
    let b = ctx.issue("l1-0", AccessKind::Load, 0x40);
    let _ = ctx.drain();

    let (a, b) = (ctx.completion(a), ctx.completion(b));
    assert!(!a.coalesced);
    assert!(b.coalesced);
    assert_eq!((a.tag, a.state), (b.tag, b.state));
    assert_eq!(a.state, BlockState::Exclusive);
    assert_eq!(a.finished, b.finished);

    let l1 = ctx.stats("l1-0");
    assert_eq!(l1.coalesced_reads, 1);
    assert_eq!(l1.accesses, 1, "only the master looked the block up");
}

#[test]
fn same_cycle_stores_coalesce() {
    let mut ctx = TestContext::new(&two_level(1));
    let a = ctx.issue("l1-0", AccessKind::Store, 0x80);
    let b = ctx.issue("l1-0", AccessKind::Store, 0x88);
    let _ = ctx.drain();

    assert!(ctx.completion(b).coalesced);
    assert_eq!(ctx.completion(a).state, BlockState::Modified);
    assert_eq!(ctx.completion(b).state, BlockState::Modified);
    assert_eq!(ctx.stats("l1-0").coalesced_writes, 1);
}

/// Loads in different cycles do not coalesce.
#[test]
fn loads_in_different_cycles_do_not_coalesce() {
    let mut ctx = TestContext::new(&two_level(1));
    let a = ctx.issue("l1-0", AccessKind::Load, 0x40);
    let b = ctx.issue_after("l1-0", AccessKind::Load, 0x40, 1);
    let _ = ctx.drain();

    assert!(!ctx.completion(b).coalesced);
    assert_eq!(ctx.completion(b).issued, 1);
    assert!(ctx.completion(a).finished <= ctx.completion(b).finished);
}

/// A load behind a store to the same block waits for it and sees its result.
#[test]
fn load_waits_for_older_store() {
    let mut ctx = TestContext::new(&two_level(1));
    let store = ctx.issue("l1-0", AccessKind::Store, 0x40);
    let load = ctx.issue("l1-0", AccessKind::Load, 0x40);
    let _ = ctx.drain();

    let (store, load) = (ctx.completion(store), ctx.completion(load));
    assert!(!load.coalesced);
    assert!(load.finished >= store.finished);
    assert_eq!(load.state, BlockState::Modified);
}

// ══════════════════════════════════════════════════════════
// 3. Invalidation and peer transfers
// ══════════════════════════════════════════════════════════

/// A store to a block Shared here and at one other module invalidates the
/// other copy before the store completes Modified.
#[test]
fn store_to_shared_block_invalidates_other_sharer() {
    let mut ctx = TestContext::new(&two_level(2));
    let _ = ctx.load("l1-0", 0x40);
    let _ = ctx.load("l1-1", 0x40);
    assert_eq!(ctx.state("l1-0", 0x40), BlockState::Shared);
    assert_eq!(ctx.state("l1-1", 0x40), BlockState::Shared);

    let done = ctx.store("l1-0", 0x40);

    assert_eq!(done.state, BlockState::Modified);
    assert_eq!(ctx.state("l1-0", 0x40), BlockState::Modified);
    assert_eq!(ctx.state("l1-1", 0x40), BlockState::Invalid);
    assert_eq!(ctx.sharers("l2", 0x40), vec!["l1-0"]);
    assert_eq!(ctx.owner("l2", 0x40).as_deref(), Some("l1-0"));
    assert_eq!(ctx.stats("l2").invalidations, 1);

    let inval = ctx.sent("net-l1-l2", "l2", MessageKind::WriteRequest);
    assert_eq!(inval.len(), 1);
    assert_eq!(inval[0].dst, ctx.id("l1-1"));
    assert!(inval[0].cycle < done.finished);
}

/// A reader of a Modified block gets the data from the writer directly; the
/// writer keeps it Owned and the reply from below carries no data.
#[test]
fn load_of_modified_block_uses_peer_transfer() {
    let mut ctx = TestContext::new(&two_level(2));
    let _ = ctx.store("l1-0", 0x40);
    let done = ctx.load("l1-1", 0x40);

    assert_eq!(done.state, BlockState::Shared);
    assert_eq!(ctx.state("l1-0", 0x40), BlockState::Owned);
    assert_eq!(ctx.state("l1-1", 0x40), BlockState::Shared);
    assert_eq!(ctx.stats("l1-0").peer_transfers, 1);

    let peer = ctx.sent("net-l1-l2", "l1-0", MessageKind::PeerData);
    assert_eq!(peer.len(), 1);
    assert_eq!((peer[0].dst, peer[0].size), (ctx.id("l1-1"), 72));
    assert_eq!(ctx.sent("net-l1-l2", "l1-1", MessageKind::PeerAck).len(), 1);

    let replies = ctx.sent("net-l1-l2", "l2", MessageKind::Reply);
    let to_reader = replies.iter().rfind(|r| r.dst == ctx.id("l1-1")).unwrap();
    assert_eq!(to_reader.size, 8);
}

/// The Owned copy loses its data to the next writer by peer transfer.
#[test]
fn store_after_peer_read_takes_block_from_owner() {
    let mut ctx = TestContext::new(&two_level(2));
    let _ = ctx.store("l1-0", 0x40);
    let _ = ctx.load("l1-1", 0x40);
    let done = ctx.store("l1-1", 0x40);

    assert_eq!(done.state, BlockState::Modified);
    assert_eq!(ctx.state("l1-0", 0x40), BlockState::Invalid);
    assert_eq!(ctx.stats("l1-0").peer_transfers, 2);
    assert_eq!(ctx.sharers("l2", 0x40), vec!["l1-1"]);
}

// ══════════════════════════════════════════════════════════
// 4. Evictions
// ══════════════════════════════════════════════════════════

#[test]
fn clean_eviction_sends_notice() {
    let mut ctx = TestContext::new(&two_level_with(1, 1, 1, 16, 4));
    let _ = ctx.load("l1-0", 0x0);
    let _ = ctx.load("l1-0", 0x40);

    assert_eq!(ctx.state("l1-0", 0x0), BlockState::Invalid);
    assert_eq!(ctx.state("l2", 0x0), BlockState::Exclusive);
    assert!(ctx.sharers("l2", 0x0).is_empty());
    assert_eq!(ctx.owner("l2", 0x0), None);

    let l1 = ctx.stats("l1-0");
    assert_eq!((l1.evictions, l1.writebacks), (1, 0));
    let notice = ctx.sent("net-l1-l2", "l1-0", MessageKind::EvictNotice);
    assert_eq!(notice.len(), 1);
    assert_eq!(notice[0].size, 8);
}

#[test]
fn dirty_eviction_writes_back() {
    let mut ctx = TestContext::new(&two_level_with(1, 1, 1, 16, 4));
    let _ = ctx.store("l1-0", 0x0);
    let _ = ctx.load("l1-0", 0x40);

    assert_eq!(ctx.state("l1-0", 0x0), BlockState::Invalid);
    assert_eq!(ctx.state("l2", 0x0), BlockState::Modified);
    assert!(ctx.sharers("l2", 0x0).is_empty());

    let l1 = ctx.stats("l1-0");
    assert_eq!((l1.evictions, l1.writebacks), (1, 1));
    let wb = ctx.sent("net-l1-l2", "l1-0", MessageKind::Writeback);
    assert_eq!(wb.len(), 1);
    assert_eq!(wb[0].size, 72);
}

/// An L2 victim still Modified in an L1 is recalled before it is written back.
#[test]
fn l2_eviction_recalls_dirty_upper_copy() {
    let mut ctx = TestContext::new(&two_level_with(1, 4, 2, 1, 1));
    let _ = ctx.store("l1-0", 0x0);
    let _ = ctx.load("l1-0", 0x40);

    assert_eq!(ctx.state("l1-0", 0x0), BlockState::Invalid);
    assert_eq!(ctx.state("l1-0", 0x40), BlockState::Exclusive);
    assert_eq!(ctx.state("l2", 0x0), BlockState::Invalid);
    assert!(ctx.sharers("mem", 0x0).is_empty());

    let l2 = ctx.stats("l2");
    assert_eq!((l2.evictions, l2.writebacks, l2.invalidations), (1, 1, 1));
    assert_eq!(ctx.sent("net-l2-mem", "l2", MessageKind::Writeback).len(), 1);
}

/// Evicting a Modified L2 block with two Shared upper copies: both sharers
/// are invalidated before the single writeback goes down, and the block's
/// directory entry ends empty.
#[test]
fn evicting_modified_block_with_two_sharers() {
    let mut ctx = TestContext::new(&two_level_with(3, 1, 1, 2, 1));

    // l1-0 dirties 0x0, then writes it back to l2 by loading 0x40.
    let _ = ctx.store("l1-0", 0x0);
    let _ = ctx.load("l1-0", 0x40);
    // Re-read 0x0 from two modules: l2 Modified, both uppers Shared.
    let _ = ctx.load("l1-0", 0x0);
    let _ = ctx.load("l1-1", 0x0);
    assert_eq!(ctx.state("l2", 0x0), BlockState::Modified);
    assert_eq!(ctx.sharers("l2", 0x0), vec!["l1-0", "l1-1"]);
    assert_eq!(ctx.owner("l2", 0x0), None);
    assert_eq!(ctx.stats("l2").evictions, 0);

    // 0x80 maps to the same l2 set.
    let done = ctx.load("l1-2", 0x80);
    assert_eq!(done.state, BlockState::Exclusive);

    let l2 = ctx.stats("l2");
    assert_eq!(l2.evictions, 1);
    assert_eq!(l2.writebacks, 1);
    assert_eq!(l2.invalidations, 2);

    let inval = ctx.sent("net-l1-l2", "l2", MessageKind::WriteRequest);
    assert_eq!(inval.len(), 2);
    let mut targets: Vec<_> = inval.iter().map(|r| r.dst).collect();
    targets.sort();
    assert_eq!(targets, vec![ctx.id("l1-0"), ctx.id("l1-1")]);

    let wb = ctx.sent("net-l2-mem", "l2", MessageKind::Writeback);
    assert_eq!(wb.len(), 1);
    assert!(inval.iter().all(|r| r.cycle < wb[0].cycle));

    for l1 in ["l1-0", "l1-1"] {
        assert_eq!(ctx.state(l1, 0x0), BlockState::Invalid);
    }
    assert_eq!(ctx.state("l2", 0x0), BlockState::Invalid);
    assert_eq!(ctx.sharers("l2", 0x80), vec!["l1-2"]);
    let entry = ctx.entry("mem", 0x0).unwrap();
    assert_eq!(entry.num_sharers(), 0);
    assert_eq!(entry.owner(), None);
}

// ══════════════════════════════════════════════════════════
// 5. Sub-blocks
// ══════════════════════════════════════════════════════════

/// L1 blocks half the size of L2 blocks are tracked per sub-block.
#[test]
fn directory_tracks_sub_blocks() {
    let mut config = two_level(2);
    for m in config.modules.iter_mut().filter(|m| m.name.starts_with("l1")) {
        m.block_size = 32;
    }
    let mut ctx = TestContext::new(&config);
    let _ = ctx.load("l1-0", 0x20);

    assert_eq!(ctx.sys.module(ctx.id("l2")).dir.subblocks(), 2);
    assert_eq!(ctx.sharers("l2", 0x20), vec!["l1-0"]);
    assert!(ctx.sharers("l2", 0x00).is_empty());
    assert_eq!(ctx.owner("l2", 0x20).as_deref(), Some("l1-0"));

    let done = ctx.load("l1-1", 0x00);
    assert_eq!(done.state, BlockState::Exclusive);
    assert_eq!(ctx.sharers("l2", 0x00), vec!["l1-1"]);
    assert_eq!(ctx.owner("l2", 0x00).as_deref(), Some("l1-1"));
    assert_eq!(ctx.owner("l2", 0x20), None, "other owners of the block are demoted");
    assert_eq!(ctx.state("l1-0", 0x20), BlockState::Shared);
}

// ══════════════════════════════════════════════════════════
// 6. Contention
// ══════════════════════════════════════════════════════════

/// Nothing touches the same block twice at once, so nothing retries.
#[test]
fn uncontended_accesses_never_retry() {
    let mut ctx = TestContext::new(&two_level(2));
    for (i, addr) in [0x000_u64, 0x040, 0x080, 0x0c0, 0x100, 0x140].into_iter().enumerate() {
        let l1 = if i % 2 == 0 { "l1-0" } else { "l1-1" };
        let _ = ctx.load(l1, addr);
        let _ = ctx.store(l1, addr + 8);
    }

    for m in ctx.sys.modules() {
        assert_eq!((m.stats.read_retries, m.stats.write_retries), (0, 0), "{}", m.name);
        assert_eq!(m.stats.lock_conflicts, 0, "{}", m.name);
    }
    assert_eq!(ctx.sys.completions().len(), 12);
}

/// Two modules missing on one block in the same cycle: the loser's
/// non-blocking lookup below fails and it retries until it gets a copy.
#[test]
fn racing_misses_retry_and_share() {
    let mut ctx = TestContext::new(&two_level(2));
    let a = ctx.issue("l1-0", AccessKind::Load, 0x40);
    let b = ctx.issue("l1-1", AccessKind::Load, 0x40);
    ctx.drain_checked();

    let _ = (ctx.completion(a), ctx.completion(b));
    let retries = ctx.stats("l1-0").read_retries + ctx.stats("l1-1").read_retries;
    assert!(retries >= 1);
    assert_eq!(ctx.state("l1-0", 0x40), BlockState::Shared);
    assert_eq!(ctx.state("l1-1", 0x40), BlockState::Shared);
    assert_eq!(ctx.sharers("l2", 0x40), vec!["l1-0", "l1-1"]);
}

/// A lookup that finds a way being filled with its block queues on the
/// way's lock instead of allocating a second copy.
#[test]
fn lookup_queues_on_block_being_filled() {
    let mut ctx = TestContext::new(&two_level(1));
    let a = ctx.issue("l1-0", AccessKind::Load, 0x40);
    let b = ctx.issue_after("l1-0", AccessKind::Load, 0x40, 1);

    ctx.sys.step().unwrap();
    assert!(ctx.sys.lock_holder(ctx.id("l1-0"), 0x40).is_some());
    let _ = ctx.drain();

    let (a, b) = (ctx.completion(a), ctx.completion(b));
    assert!(!b.coalesced);
    assert!(b.finished > a.finished);
    assert_eq!(b.state, BlockState::Exclusive);

    let l1 = ctx.stats("l1-0");
    assert_eq!(l1.lock_conflicts, 1);
    assert_eq!(l1.read_retries, 0);
    assert_eq!(l1.evictions, 0);
    assert_eq!(ctx.sys.lock_holder(ctx.id("l1-0"), 0x40), None);
}

/// With one port, same-cycle lookups are served one latency apart.
#[test]
fn single_port_serializes_lookups() {
    let mut config = two_level(1);
    config.modules[0].num_ports = 1;
    let mut ctx = TestContext::new(&config);
    let ids: Vec<_> = [0x000, 0x040, 0x080]
        .into_iter()
        .map(|addr| ctx.issue("l1-0", AccessKind::Load, addr))
        .collect();
    let _ = ctx.drain();

    let done: Vec<_> = ids.into_iter().map(|id| ctx.completion(id)).collect();
    assert!(done[0].finished < done[1].finished);
    assert!(done[1].finished < done[2].finished);
    assert_eq!(ctx.sys.module(ctx.id("l1-0")).ports_in_use(), 0);
}

// ══════════════════════════════════════════════════════════
// 7. Two L2 subtrees under a shared L3
// ══════════════════════════════════════════════════════════

/// Runs one access with invariants checked every cycle.
fn checked(ctx: &mut TestContext, name: &str, kind: AccessKind, addr: u64) -> Completion {
    let id = ctx.issue(name, kind, addr);
    ctx.drain_checked();
    ctx.completion(id)
}

/// A miss on a block another subtree holds Exclusive comes back Shared, and
/// every level's directory records both copies with no owner.
#[test]
fn read_miss_on_block_held_by_other_subtree_is_shared() {
    let mut ctx = TestContext::new(&three_level());
    let first = checked(&mut ctx, "l1-0", AccessKind::Load, 0x40);
    assert_eq!(first.state, BlockState::Exclusive);

    let done = checked(&mut ctx, "l1-2", AccessKind::Load, 0x40);

    assert_eq!(done.state, BlockState::Shared);
    assert_eq!(ctx.state("l1-2", 0x40), BlockState::Shared);
    assert_eq!(ctx.state("l2-1", 0x40), BlockState::Shared);
    assert_eq!(ctx.state("l2-0", 0x40), BlockState::Shared);
    assert_eq!(ctx.state("l1-0", 0x40), BlockState::Shared);
    assert_eq!(ctx.state("l3", 0x40), BlockState::Exclusive);

    assert_eq!(ctx.sharers("l3", 0x40), vec!["l2-0", "l2-1"]);
    assert_eq!(ctx.owner("l3", 0x40), None);
    assert_eq!(ctx.sharers("l2-1", 0x40), vec!["l1-2"]);
    assert_eq!(ctx.owner("l2-1", 0x40), None);
    assert_eq!(ctx.sharers("l2-0", 0x40), vec!["l1-0"]);
    assert_eq!(ctx.owner("l2-0", 0x40), None);
}

/// An L2 that pulls dirty data up from its L1 while evicting keeps an Owned
/// block Owned: the other subtree still shares it. The writeback below then
/// recalls the remaining copies before the L3 goes Modified.
#[test]
fn owned_block_stays_owned_when_upper_copy_is_recalled() {
    let mut ctx = TestContext::new(&three_level_with((4, 2), (1, 1), [64, 64, 64]));
    let _ = checked(&mut ctx, "l1-2", AccessKind::Store, 0x200);
    let _ = checked(&mut ctx, "l1-0", AccessKind::Load, 0x200);
    let _ = checked(&mut ctx, "l1-1", AccessKind::Load, 0x200);

    assert_eq!(ctx.state("l1-2", 0x200), BlockState::Owned);
    assert_eq!(ctx.state("l2-1", 0x200), BlockState::Owned);
    assert_eq!(ctx.state("l2-0", 0x200), BlockState::Shared);
    assert_eq!(ctx.state("l1-0", 0x200), BlockState::Shared);
    assert_eq!(ctx.state("l1-1", 0x200), BlockState::Shared);
    assert_eq!(ctx.stats("l2-1").peer_transfers, 1);
    assert_eq!(ctx.sharers("l3", 0x200), vec!["l2-0", "l2-1"]);

    // Conflicts with 0x200 in the single-block l2-1.
    let done = checked(&mut ctx, "l1-3", AccessKind::Load, 0x240);

    assert_eq!(done.state, BlockState::Exclusive);
    assert_eq!(ctx.stats("l2-1").evictions, 1);
    assert_eq!(ctx.stats("l2-1").writebacks, 1);
    assert_eq!(ctx.stats("l3").invalidations, 1);
    for name in ["l1-0", "l1-1", "l1-2", "l2-0", "l2-1"] {
        assert_eq!(ctx.state(name, 0x200), BlockState::Invalid, "{name}");
    }
    assert_eq!(ctx.state("l3", 0x200), BlockState::Modified);
    assert!(ctx.sharers("l3", 0x200).is_empty());
    assert_eq!(ctx.owner("l3", 0x200), None);
}

/// A read that meets dirty owners of two sub-blocks of the same L3 block
/// takes a peer transfer only from the owner of the sub-block it asked for.
#[test]
fn read_across_owned_sub_blocks_takes_one_peer_transfer() {
    let mut ctx = TestContext::new(&three_level_with((4, 2), (8, 2), [32, 64, 128]));
    let _ = checked(&mut ctx, "l1-0", AccessKind::Store, 0x100);
    let _ = checked(&mut ctx, "l1-0", AccessKind::Store, 0x140);
    assert_eq!(ctx.owner("l3", 0x100).as_deref(), Some("l2-0"));
    assert_eq!(ctx.owner("l3", 0x140).as_deref(), Some("l2-0"));

    let done = checked(&mut ctx, "l1-2", AccessKind::Load, 0x140);

    assert_eq!(done.state, BlockState::Shared);
    assert_eq!(ctx.state("l2-1", 0x140), BlockState::Shared);
    assert_eq!(ctx.state("l2-0", 0x100), BlockState::Owned);
    assert_eq!(ctx.state("l2-0", 0x140), BlockState::Owned);
    assert_eq!(ctx.state("l1-0", 0x100), BlockState::Owned);
    assert_eq!(ctx.state("l1-0", 0x140), BlockState::Owned);
    assert_eq!(ctx.stats("l2-0").peer_transfers, 1);

    let peer = ctx.sent("net-l2-l3", "l2-0", MessageKind::PeerData);
    assert_eq!(peer.len(), 1);
    assert_eq!((peer[0].dst, peer[0].size), (ctx.id("l2-1"), 72));

    assert_eq!(ctx.owner("l3", 0x100), None);
    assert_eq!(ctx.owner("l3", 0x140), None);
    assert_eq!(ctx.sharers("l3", 0x100), vec!["l2-0"]);
    assert_eq!(ctx.sharers("l3", 0x140), vec!["l2-0", "l2-1"]);
}

// ══════════════════════════════════════════════════════════
// 8. Run control
// ══════════════════════════════════════════════════════════

#[test]
fn delayed_access_starts_later() {
    let mut ctx = TestContext::new(&two_level(1));
    let id = ctx.issue_after("l1-0", AccessKind::Store, 0x40, 25);
    let _ = ctx.drain();
    let done = ctx.completion(id);
    assert_eq!(done.issued, 25);
    assert_eq!(done.kind, AccessKind::Store);
}

#[test]
fn run_reports_timeout() {
    let mut ctx = TestContext::new(&two_level(1));
    let _ = ctx.issue("l1-0", AccessKind::Load, 0x40);

    let err = ctx.sys.run_until_idle(3).unwrap_err();
    assert!(matches!(err, SimError::Timeout { in_flight: 1, .. }), "{err}");
    assert_eq!(ctx.sys.in_flight(), 1);

    let _ = ctx.drain();
    assert_eq!(ctx.sys.in_flight(), 0);
    assert!(ctx.sys.is_idle());
}

#[test]
fn take_completions_drains_results() {
    let mut ctx = TestContext::new(&two_level(1));
    let _ = ctx.load("l1-0", 0x0);
    let _ = ctx.load("l1-0", 0x40);

    let taken = ctx.sys.take_completions();
    assert_eq!(taken.len(), 2);
    assert!(taken[0].access < taken[1].access);
    assert!(ctx.sys.completions().is_empty());
}
