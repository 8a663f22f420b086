//! Static catalog of resource kinds and per-role default quotas

use std::collections::BTreeMap;

use super::pool::LimitPool;
use super::types::{AccountId, Limit, ResourceKind, Role};
use crate::config::LimitsConfig;

/// Metadata for one resource kind
#[derive(Debug, Clone, Copy)]
pub struct KindSpec {
    pub kind: ResourceKind,
    /// Roles whose pool counts this kind
    pub tracked_by: &'static [Role],
    /// Capacity may be carved out of a parent pool into a child pool
    pub allocatable: bool,
}

const ADMIN_ROLES: &[Role] = &[Role::SuperAdmin, Role::Reseller];
const MAIL_ROLES: &[Role] = &[Role::SuperAdmin, Role::Reseller, Role::DomainAdmin];

const KIND_TABLE: [KindSpec; 5] = [
    KindSpec {
        kind: ResourceKind::Domains,
        tracked_by: ADMIN_ROLES,
        allocatable: false,
    },
    KindSpec {
        kind: ResourceKind::DomainAliases,
        tracked_by: ADMIN_ROLES,
        allocatable: false,
    },
    KindSpec {
        kind: ResourceKind::Mailboxes,
        tracked_by: MAIL_ROLES,
        allocatable: true,
    },
    KindSpec {
        kind: ResourceKind::MailboxAliases,
        tracked_by: MAIL_ROLES,
        allocatable: true,
    },
    KindSpec {
        kind: ResourceKind::DomainAdmins,
        tracked_by: ADMIN_ROLES,
        allocatable: false,
    },
];

/// Resource catalog plus the configured Reseller defaults.
///
/// Built once at startup from [`LimitsConfig`] and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    reseller_defaults: BTreeMap<ResourceKind, u32>,
}

impl ResourceRegistry {
    pub fn new(reseller_defaults: BTreeMap<ResourceKind, u32>) -> Self {
        ResourceRegistry { reseller_defaults }
    }

    pub fn from_config(config: &LimitsConfig) -> Self {
        Self::new(config.reseller_defaults.clone())
    }

    /// Same default for every kind (handy in tests and demos)
    pub fn uniform(value: u32) -> Self {
        Self::new(ResourceKind::ALL.iter().map(|k| (*k, value)).collect())
    }

    pub fn spec(kind: ResourceKind) -> &'static KindSpec {
        // KIND_TABLE is indexed in ResourceKind::ALL order
        let idx = ResourceKind::ALL
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_default();
        &KIND_TABLE[idx]
    }

    pub fn is_allocatable(kind: ResourceKind) -> bool {
        Self::spec(kind).allocatable
    }

    /// Kinds a pool of this role tracks (empty for SimpleUser)
    pub fn kinds_for(role: Role) -> Vec<ResourceKind> {
        KIND_TABLE
            .iter()
            .filter(|spec| spec.tracked_by.contains(&role))
            .map(|spec| spec.kind)
            .collect()
    }

    pub fn tracks(role: Role, kind: ResourceKind) -> bool {
        Self::spec(kind).tracked_by.contains(&role)
    }

    pub fn holds_pool(role: Role) -> bool {
        role != Role::SimpleUser
    }

    pub fn default_maximum(&self, role: Role, kind: ResourceKind) -> u32 {
        match role {
            Role::Reseller => self.reseller_defaults.get(&kind).copied().unwrap_or(0),
            _ => 0,
        }
    }

    /// Fresh pool for an account taking `role`; `None` for roles without a pool
    pub fn default_pool(&self, owner: AccountId, role: Role) -> Option<LimitPool> {
        if !Self::holds_pool(role) {
            return None;
        }
        let limits = Self::kinds_for(role).into_iter().map(|kind| {
            if role == Role::SuperAdmin {
                Limit::unlimited(kind)
            } else {
                Limit::new(kind, self.default_maximum(role, kind))
            }
        });
        Some(LimitPool::new(owner, role, limits))
    }
}
