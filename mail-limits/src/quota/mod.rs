/// Quota accounting for hosted mail
///
/// This module provides:
/// - Per-kind counters (domains, domain aliases, mailboxes, mailbox aliases,
///   domain administrators) grouped in one pool per account
/// - Atomic multi-pool batches with all-or-nothing validation
/// - The manager used by account, domain and mailbox workflows

pub mod engine;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod types;

pub use engine::{AllocationEngine, Batch, BatchOp};
pub use manager::{AuditMismatch, DomainTemplate, LimitsManager, StateSnapshot, TemplateOutcome};
pub use pool::LimitPool;
pub use registry::{KindSpec, ResourceRegistry};
pub use types::{AccountId, DomainId, Limit, LimitSnapshot, ResourceId, ResourceKind, Role};
