/// Ownership records behind the quota counters
///
/// Which account created which, who owns each domain, which pool counts each
/// object, and how quota flows back when any of that changes.

pub mod graph;
pub mod reclaim;

pub use graph::{Account, Domain, Grant, GraphSnapshot, OwnershipGraph, ResourceRecord};
pub use reclaim::{ReclaimReason, ReclaimSummary, Reclaimer};
