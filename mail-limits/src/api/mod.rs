//! REST API module for mail-limits
//!
//! Exposes the quota core to account, domain and mailbox workflows over HTTP

pub mod handlers;
pub mod server;

pub use handlers::AppState;
pub use server::{router, ApiServer};
