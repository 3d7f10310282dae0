//! Simulation statistics collection and reporting.
//!
//! This module tracks the counters the memory system exposes. It provides:
//! 1. **Module counters:** Accesses, hits, reads/writes, retries, evictions and writebacks per module.
//! 2. **Network counters:** Messages, bytes and backpressure retries per network.
//! 3. **Report:** A sectioned text report (`summary`, `modules`, `network`) with derived ratios.
//!
//! Counters are plain integers incremented by the protocol engine; readers may
//! snapshot them at any time.

use std::fmt::Write as _;

/// Counters kept by every module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleStats {
    /// FindAndLock lookups.
    pub accesses: u64,
    /// Lookups that found the block.
    pub hits: u64,
    /// Read lookups.
    pub reads: u64,
    /// Write lookups.
    pub writes: u64,
    /// Read lookups that hit.
    pub read_hits: u64,
    /// Write lookups that hit.
    pub write_hits: u64,
    /// Read lookups that queue on a held lock.
    pub blocking_reads: u64,
    /// Read lookups that fail on a held lock.
    pub non_blocking_reads: u64,
    /// Write lookups that queue on a held lock.
    pub blocking_writes: u64,
    /// Write lookups that fail on a held lock.
    pub non_blocking_writes: u64,
    /// Lookups on a first attempt.
    pub no_retry_accesses: u64,
    /// First-attempt lookups that hit.
    pub no_retry_hits: u64,
    /// First-attempt reads.
    pub no_retry_reads: u64,
    /// First-attempt reads that hit.
    pub no_retry_read_hits: u64,
    /// First-attempt writes.
    pub no_retry_writes: u64,
    /// First-attempt writes that hit.
    pub no_retry_write_hits: u64,
    /// Valid victims evicted.
    pub evictions: u64,
    /// Evictions that carried dirty data down.
    pub writebacks: u64,
    /// Load retries after a lock conflict.
    pub read_retries: u64,
    /// Store retries after a lock conflict.
    pub write_retries: u64,
    /// Loads merged into an in-flight load.
    pub coalesced_reads: u64,
    /// Stores merged into an in-flight store.
    pub coalesced_writes: u64,
    /// Lock requests that had to queue.
    pub lock_conflicts: u64,
    /// Down-up write requests issued to invalidate upper copies.
    pub invalidations: u64,
    /// Blocks sent directly to a peer.
    pub peer_transfers: u64,
}

impl ModuleStats {
    /// Hit ratio over all lookups (0 when there were none).
    pub fn hit_ratio(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.accesses as f64
        }
    }
}

/// Counters kept by every network.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Messages sent.
    pub messages: u64,
    /// Bytes sent.
    pub bytes: u64,
    /// Sends deferred because the destination buffer was full.
    pub retries: u64,
}

/// Snapshot of every counter in the system.
#[derive(Clone, Debug, Default)]
pub struct SimStats {
    /// Cycles elapsed.
    pub cycles: u64,
    /// Top-level accesses completed.
    pub completed: u64,
    /// Completed loads.
    pub loads: u64,
    /// Completed stores.
    pub stores: u64,
    /// Per-module counters in configuration order.
    pub modules: Vec<(String, ModuleStats)>,
    /// Per-network counters in configuration order.
    pub networks: Vec<(String, NetworkStats)>,
}

/// Section names for selective stats output.
///
/// Valid section identifiers: `"summary"`, `"modules"`, `"network"`.
/// Pass an empty slice to `print_sections` to print all sections.
pub const STATS_SECTIONS: &[&str] = &["summary", "modules", "network"];

const RULE: &str = "==========================================================";
const THIN_RULE: &str = "----------------------------------------------------------";

impl SimStats {
    /// Returns the counters of the named module.
    pub fn module(&self, name: &str) -> Option<&ModuleStats> {
        self.modules.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Returns the counters of the named network.
    pub fn network(&self, name: &str) -> Option<&NetworkStats> {
        self.networks.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Renders the requested sections.
    ///
    /// # Arguments
    ///
    /// * `sections` - Section names to include, or empty for all.
    pub fn report(&self, sections: &[String]) -> String {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);
        let mut out = String::new();

        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "MEMORY SYSTEM SIMULATION STATISTICS");
        let _ = writeln!(out, "{RULE}");
        if want("summary") {
            let _ = writeln!(out, "sim_cycles               {}", self.cycles);
            let _ = writeln!(out, "sim_accesses             {}", self.completed);
            let _ = writeln!(out, "sim_loads                {}", self.loads);
            let _ = writeln!(out, "sim_stores               {}", self.stores);
            let _ = writeln!(out, "{THIN_RULE}");
        }
        if want("modules") {
            let _ = writeln!(out, "MODULES");
            for (name, m) in &self.modules {
                let _ = writeln!(
                    out,
                    "  {:<8} accesses: {:<8} | hits: {:<8} | hit_ratio: {:.2}%",
                    name,
                    m.accesses,
                    m.hits,
                    m.hit_ratio() * 100.0
                );
                let _ = writeln!(
                    out,
                    "  {:<8} reads: {:<8} | writes: {:<8} | evictions: {:<6} | writebacks: {}",
                    "",
                    m.reads,
                    m.writes,
                    m.evictions,
                    m.writebacks
                );
                let _ = writeln!(
                    out,
                    "  {:<8} retries: {}/{} | coalesced: {}/{} | conflicts: {} | invalidations: {} | peer: {}",
                    "",
                    m.read_retries,
                    m.write_retries,
                    m.coalesced_reads,
                    m.coalesced_writes,
                    m.lock_conflicts,
                    m.invalidations,
                    m.peer_transfers
                );
            }
            let _ = writeln!(out, "{THIN_RULE}");
        }
        if want("network") {
            let _ = writeln!(out, "NETWORK");
            for (name, n) in &self.networks {
                let _ = writeln!(
                    out,
                    "  {:<12} messages: {:<8} | bytes: {:<10} | retries: {}",
                    name, n.messages, n.bytes, n.retries
                );
            }
        }
        let _ = writeln!(out, "{RULE}");
        out
    }

    /// Prints only the requested statistics sections to stdout.
    ///
    /// Each element of `sections` should be one of `"summary"`, `"modules"` or
    /// `"network"`. Pass an empty slice to print all sections (same as `print()`).
    pub fn print_sections(&self, sections: &[String]) {
        print!("{}", self.report(sections));
    }

    /// Prints all statistics sections to stdout.
    ///
    /// Equivalent to `print_sections(&[])`.
    pub fn print(&self) {
        self.print_sections(&[]);
    }
}
