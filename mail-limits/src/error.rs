use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::quota::types::{AccountId, DomainId, ResourceId, ResourceKind, Role};

/// Which kind of request a quota rejection answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionScope {
    /// Creation of a concrete object (mailbox, alias, domain, ...)
    Operation,
    /// Explicit transfer of capacity between a parent and a child pool
    Allocation,
}

/// The Limit invariant a rejected batch would have broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    ExceedsMaximum,
    NegativeUsage,
    NegativeMaximum,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Violation::ExceedsMaximum => "usage would exceed maximum",
            Violation::NegativeUsage => "usage would drop below zero",
            Violation::NegativeMaximum => "maximum would drop below zero",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum LimitsError {
    #[error("Not enough resources")]
    InsufficientResources {
        scope: RejectionScope,
        account: AccountId,
        kind: ResourceKind,
        violation: Violation,
    },

    #[error("Select a valid choice. {role} is not one of the available choices.")]
    RoleUnavailable { field: &'static str, role: Role },

    #[error("Account {account} has no limit for {kind}")]
    UnknownResourceKind {
        account: AccountId,
        kind: ResourceKind,
    },

    #[error("Resource kind {0} cannot be allocated to a sub-pool")]
    NotAllocatable(ResourceKind),

    #[error("Account {child} already holds capacity granted by {holder}")]
    GrantConflict { child: AccountId, holder: AccountId },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("No limit pool for account {0}")]
    PoolNotFound(AccountId),

    #[error("Domain not found: {0}")]
    DomainNotFound(DomainId),

    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LimitsError {
    /// True for the two quota rejections, as opposed to lookup or infrastructure failures
    pub fn is_quota_rejection(&self) -> bool {
        matches!(
            self,
            LimitsError::InsufficientResources { .. } | LimitsError::RoleUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LimitsError>;
