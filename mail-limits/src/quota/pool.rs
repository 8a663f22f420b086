//! Per-account collection of limits

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{AccountId, Limit, LimitSnapshot, ResourceKind, Role};
use crate::error::{LimitsError, RejectionScope, Result, Violation};

/// The set of limits owned by one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPool {
    owner: AccountId,
    role: Role,
    limits: BTreeMap<ResourceKind, Limit>,
}

impl LimitPool {
    pub fn new(owner: AccountId, role: Role, limits: impl IntoIterator<Item = Limit>) -> Self {
        LimitPool {
            owner,
            role,
            limits: limits.into_iter().map(|l| (l.kind, l)).collect(),
        }
    }

    pub fn owner(&self) -> AccountId {
        self.owner
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Get the limit for a kind tracked by this pool
    pub fn get_limit(&self, kind: ResourceKind) -> Result<&Limit> {
        self.limits
            .get(&kind)
            .ok_or(LimitsError::UnknownResourceKind {
                account: self.owner,
                kind,
            })
    }

    pub(crate) fn get_limit_mut(&mut self, kind: ResourceKind) -> Result<&mut Limit> {
        let owner = self.owner;
        self.limits
            .get_mut(&kind)
            .ok_or(LimitsError::UnknownResourceKind {
                account: owner,
                kind,
            })
    }

    pub fn tracks(&self, kind: ResourceKind) -> bool {
        self.limits.contains_key(&kind)
    }

    pub fn snapshot(&self, kind: ResourceKind) -> Result<LimitSnapshot> {
        self.get_limit(kind).map(Limit::snapshot)
    }

    pub fn limits(&self) -> impl Iterator<Item = &Limit> {
        self.limits.values()
    }

    /// Add `delta` to the current value if the result stays within `[0, maximum]`
    pub fn try_adjust(&mut self, kind: ResourceKind, delta: i64) -> Result<()> {
        let owner = self.owner;
        let limit = self.get_limit_mut(kind)?;
        let next = i64::from(limit.current) + delta;

        let violation = if next < 0 {
            Some(Violation::NegativeUsage)
        } else if !limit.unlimited && next > i64::from(limit.maximum) && delta > 0 {
            Some(Violation::ExceedsMaximum)
        } else {
            None
        };

        if let Some(violation) = violation {
            return Err(LimitsError::InsufficientResources {
                scope: RejectionScope::Operation,
                account: owner,
                kind,
                violation,
            });
        }

        limit.current = u32::try_from(next).unwrap_or(u32::MAX);
        Ok(())
    }

    /// Overwrite the maximum; only the allocation protocol calls this
    pub(crate) fn set_maximum(&mut self, kind: ResourceKind, new_max: u32) -> Result<()> {
        let limit = self.get_limit_mut(kind)?;
        if !limit.unlimited {
            limit.maximum = new_max;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reseller_pool() -> LimitPool {
        LimitPool::new(
            AccountId::new(),
            Role::Reseller,
            vec![
                Limit::new(ResourceKind::Mailboxes, 2),
                Limit::new(ResourceKind::Domains, 1),
            ],
        )
    }

    #[test]
    fn test_get_limit_unknown_kind() {
        let pool = reseller_pool();
        assert!(pool.get_limit(ResourceKind::Mailboxes).is_ok());
        let err = pool.get_limit(ResourceKind::DomainAdmins).unwrap_err();
        assert!(matches!(
            err,
            LimitsError::UnknownResourceKind {
                kind: ResourceKind::DomainAdmins,
                ..
            }
        ));
    }

    #[test]
    fn test_try_adjust_within_bounds() {
        let mut pool = reseller_pool();
        pool.try_adjust(ResourceKind::Mailboxes, 1).unwrap();
        pool.try_adjust(ResourceKind::Mailboxes, 1).unwrap();
        assert_eq!(pool.snapshot(ResourceKind::Mailboxes).unwrap().pair(), (2, 2));

        let err = pool.try_adjust(ResourceKind::Mailboxes, 1).unwrap_err();
        assert!(matches!(
            err,
            LimitsError::InsufficientResources {
                violation: Violation::ExceedsMaximum,
                ..
            }
        ));
        assert_eq!(pool.snapshot(ResourceKind::Mailboxes).unwrap().pair(), (2, 2));

        pool.try_adjust(ResourceKind::Mailboxes, -2).unwrap();
        let err = pool.try_adjust(ResourceKind::Mailboxes, -1).unwrap_err();
        assert!(matches!(
            err,
            LimitsError::InsufficientResources {
                violation: Violation::NegativeUsage,
                ..
            }
        ));
    }

    #[test]
    fn test_unlimited_pool_always_adjusts() {
        let mut pool = LimitPool::new(
            AccountId::new(),
            Role::SuperAdmin,
            vec![Limit::unlimited(ResourceKind::Domains)],
        );
        for _ in 0..100 {
            pool.try_adjust(ResourceKind::Domains, 1).unwrap();
        }
        assert_eq!(pool.get_limit(ResourceKind::Domains).unwrap().current, 100);

        pool.set_maximum(ResourceKind::Domains, 3).unwrap();
        assert!(pool.get_limit(ResourceKind::Domains).unwrap().unlimited);
    }

    #[test]
    fn test_set_maximum() {
        let mut pool = reseller_pool();
        pool.set_maximum(ResourceKind::Domains, 5).unwrap();
        assert_eq!(pool.snapshot(ResourceKind::Domains).unwrap().pair(), (0, 5));
    }
}
