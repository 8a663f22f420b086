//! mail-limits: Hierarchical resource quotas for mail hosting
//!
//! Tracks how many domains, domain aliases, mailboxes, mailbox aliases and
//! domain administrators each administrative account may create, and keeps the
//! counters consistent as accounts are created, deleted, re-parented or change
//! role.
//!
//! # Features
//!
//! - **Limit pools**: One counter per resource kind for every quota-holding account
//! - **Atomic batches**: Multi-pool changes validate completely before any commit
//! - **Allocation**: Resellers carve mailbox capacity into domain administrator pools
//! - **Reclamation**: Deleting or demoting an account gives its quota back up the tree
//! - **Persistence**: SQLite storage of pools and ownership records
//! - **REST API**: Evaluate, allocate and reclaim over HTTP
//!
//! # Example
//!
//! ```no_run
//! use mail_limits::quota::{LimitsManager, ResourceKind, ResourceRegistry, Role};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = LimitsManager::new(Arc::new(ResourceRegistry::uniform(2)));
//!     let root = manager.create_account(None, Role::SuperAdmin, None)?;
//!     let reseller = manager.create_account(Some(root), Role::Reseller, None)?;
//!
//!     let domain = manager.create_domain(reseller, "example.com")?;
//!     manager.create_mailbox(reseller, domain, None)?;
//!
//!     let used = manager.snapshot(reseller, ResourceKind::Mailboxes)?;
//!     println!("{}/{} mailboxes", used.current, used.maximum);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`quota`]: Limits, pools, the allocation engine and the manager facade
//! - [`ownership`]: Ownership records and reclamation cascades
//! - [`store`]: SQLite persistence
//! - [`api`]: HTTP endpoints
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling

pub mod api;
pub mod config;
pub mod error;
pub mod ownership;
pub mod quota;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{LimitsError, Result};
pub use quota::LimitsManager;
