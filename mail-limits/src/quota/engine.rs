//! All-or-nothing batch mutation of limit pools
//!
//! Every change to a [`LimitPool`] goes through a [`Batch`]. The engine locks the
//! pools a batch touches in account-id order, computes the resulting counters
//! without writing, and commits only if every `(pool, kind)` pair still satisfies
//! `0 <= current <= maximum`. A rejected batch leaves every pool untouched.

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use super::pool::LimitPool;
use super::types::{AccountId, Limit, LimitSnapshot, ResourceKind};
use crate::error::{LimitsError, RejectionScope, Result, Violation};

/// One counter change inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOp {
    pub account: AccountId,
    pub kind: ResourceKind,
    #[serde(default)]
    pub current_delta: i64,
    #[serde(default)]
    pub maximum_delta: i64,
}

/// Ordered set of counter changes applied atomically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub scope: RejectionScope,
    pub ops: Vec<BatchOp>,
}

impl Batch {
    /// Batch for creating or deleting concrete objects
    pub fn operation() -> Self {
        Batch {
            scope: RejectionScope::Operation,
            ops: Vec::new(),
        }
    }

    /// Batch for moving capacity between a parent and a child pool
    pub fn allocation() -> Self {
        Batch {
            scope: RejectionScope::Allocation,
            ops: Vec::new(),
        }
    }

    pub fn push(&mut self, op: BatchOp) {
        self.ops.push(op);
    }

    pub fn adjust(&mut self, account: AccountId, kind: ResourceKind, current_delta: i64) {
        self.push(BatchOp {
            account,
            kind,
            current_delta,
            maximum_delta: 0,
        });
    }

    /// Count `count` new objects against `account`
    pub fn consume(mut self, account: AccountId, kind: ResourceKind, count: u32) -> Self {
        self.adjust(account, kind, i64::from(count));
        self
    }

    /// Stop counting `count` objects against `account`
    pub fn release(mut self, account: AccountId, kind: ResourceKind, count: u32) -> Self {
        self.adjust(account, kind, -i64::from(count));
        self
    }

    /// Move `amount` of capacity from `parent` to `child` (negative moves it back)
    pub fn transfer(
        mut self,
        parent: AccountId,
        child: AccountId,
        kind: ResourceKind,
        amount: i64,
    ) -> Self {
        self.push(BatchOp {
            account: parent,
            kind,
            current_delta: 0,
            maximum_delta: -amount,
        });
        self.push(BatchOp {
            account: child,
            kind,
            current_delta: 0,
            maximum_delta: amount,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Accounts touched by the batch, in lock order
    pub fn accounts(&self) -> BTreeSet<AccountId> {
        self.ops.iter().map(|op| op.account).collect()
    }

    /// Net `(current, maximum)` delta per `(pool, kind)` pair
    fn net_deltas(&self) -> Result<BTreeMap<(AccountId, ResourceKind), (i64, i64)>> {
        let mut net = BTreeMap::new();
        for op in &self.ops {
            let entry = net.entry((op.account, op.kind)).or_insert((0i64, 0i64));
            let (Some(current), Some(maximum)) = (
                entry.0.checked_add(op.current_delta),
                entry.1.checked_add(op.maximum_delta),
            ) else {
                return Err(LimitsError::InvalidRequest(format!(
                    "batch deltas for {} of {} overflow",
                    op.kind, op.account
                )));
            };
            *entry = (current, maximum);
        }
        Ok(net)
    }
}

/// Resulting counters for one pair, computed before commit
struct Planned {
    account: AccountId,
    kind: ResourceKind,
    current: u32,
    maximum: u32,
}

fn project(
    limit: &Limit,
    current_delta: i64,
    maximum_delta: i64,
) -> std::result::Result<(u32, u32), Violation> {
    // u32 counters plus i64 deltas always fit in i128
    let current = i128::from(limit.current) + i128::from(current_delta);
    let maximum = if limit.unlimited {
        i128::from(limit.maximum)
    } else {
        i128::from(limit.maximum) + i128::from(maximum_delta)
    };

    if current < 0 {
        return Err(Violation::NegativeUsage);
    }
    if maximum < 0 {
        return Err(Violation::NegativeMaximum);
    }
    // A pair that only frees capacity is never refused, even if it was over before
    let grows = current_delta > 0 || maximum_delta < 0;
    if !limit.unlimited && current > maximum && grows {
        return Err(Violation::ExceedsMaximum);
    }

    let current = u32::try_from(current).map_err(|_| Violation::ExceedsMaximum)?;
    let maximum = u32::try_from(maximum).map_err(|_| Violation::ExceedsMaximum)?;
    Ok((current, maximum))
}

/// Owner of every limit pool
#[derive(Default)]
pub struct AllocationEngine {
    pools: RwLock<HashMap<AccountId, Arc<Mutex<LimitPool>>>>,
}

impl AllocationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool, replacing any previous pool of the same owner
    pub fn insert_pool(&self, pool: LimitPool) -> Option<LimitPool> {
        let owner = pool.owner();
        debug!("Registering limit pool for {} ({})", owner, pool.role());
        let previous = self
            .pools
            .write()
            .insert(owner, Arc::new(Mutex::new(pool)));
        previous.map(|p| p.lock().clone())
    }

    /// Discard a pool; its counters are returned for the caller to fold elsewhere
    pub fn remove_pool(&self, account: AccountId) -> Option<LimitPool> {
        let removed = self.pools.write().remove(&account);
        removed.map(|p| p.lock().clone())
    }

    pub fn has_pool(&self, account: AccountId) -> bool {
        self.pools.read().contains_key(&account)
    }

    pub fn pool(&self, account: AccountId) -> Option<LimitPool> {
        let handle = self.pools.read().get(&account).cloned();
        handle.map(|p| p.lock().clone())
    }

    /// Copies of every pool, ordered by owner
    pub fn pools(&self) -> Vec<LimitPool> {
        let handles: BTreeMap<AccountId, Arc<Mutex<LimitPool>>> = self
            .pools
            .read()
            .iter()
            .map(|(id, p)| (*id, Arc::clone(p)))
            .collect();
        handles.values().map(|p| p.lock().clone()).collect()
    }

    pub fn limit(&self, account: AccountId, kind: ResourceKind) -> Option<Limit> {
        let handle = self.pools.read().get(&account).cloned()?;
        let pool = handle.lock();
        pool.get_limit(kind).ok().cloned()
    }

    pub fn snapshot(&self, account: AccountId, kind: ResourceKind) -> Result<LimitSnapshot> {
        let handle = self
            .pools
            .read()
            .get(&account)
            .cloned()
            .ok_or(LimitsError::PoolNotFound(account))?;
        let pool = handle.lock();
        pool.snapshot(kind)
    }

    /// Validate a batch without committing it
    pub fn check(&self, batch: &Batch) -> Result<()> {
        let handles = self.handles(batch, true)?;
        let guards = lock_all(&handles);
        plan(batch, &guards).map(|_| ())
    }

    /// Validate every pair of the batch, then commit all of them or none
    pub fn apply(&self, batch: &Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let handles = self.handles(batch, true)?;
        let mut guards = lock_all(&handles);

        let planned = match plan(batch, &guards) {
            Ok(planned) => planned,
            Err(e) => {
                debug!("Batch of {} op(s) rejected: {}", batch.ops.len(), e);
                return Err(e);
            }
        };

        for step in planned {
            if let Some(pool) = guards.get_mut(&step.account) {
                pool.get_limit_mut(step.kind)?.current = step.current;
                pool.set_maximum(step.kind, step.maximum)?;
            }
        }

        debug!("Batch of {} op(s) committed", batch.ops.len());
        Ok(())
    }

    /// Commit a batch that can only free capacity, skipping vanished pools.
    ///
    /// Reclamation never fails: values saturate at zero and the maximum check is
    /// not applied.
    pub(crate) fn force(&self, batch: &Batch) {
        if batch.is_empty() {
            return;
        }

        let handles = match self.handles(batch, false) {
            Ok(handles) => handles,
            Err(_) => return,
        };
        let mut guards = lock_all(&handles);

        let net = match batch.net_deltas() {
            Ok(net) => net,
            Err(e) => {
                warn!("Reclaim batch skipped: {}", e);
                return;
            }
        };
        for ((account, kind), (current_delta, maximum_delta)) in net {
            let Some(pool) = guards.get_mut(&account) else {
                debug!("Skipping reclaim of {} for discarded pool {}", kind, account);
                continue;
            };
            let Ok(limit) = pool.get_limit_mut(kind) else {
                continue;
            };

            let current = i64::from(limit.current)
                .saturating_add(current_delta)
                .clamp(0, i64::from(u32::MAX));
            limit.current = current as u32;
            if !limit.unlimited {
                let maximum = i64::from(limit.maximum)
                    .saturating_add(maximum_delta)
                    .clamp(0, i64::from(u32::MAX));
                limit.maximum = maximum as u32;
                if limit.current > limit.maximum {
                    warn!(
                        "Reclaim left {} of {} over quota ({}/{})",
                        kind, account, limit.current, limit.maximum
                    );
                }
            }
        }
    }

    /// Pool handles for the batch in lock order
    fn handles(
        &self,
        batch: &Batch,
        strict: bool,
    ) -> Result<Vec<(AccountId, Arc<Mutex<LimitPool>>)>> {
        let pools = self.pools.read();
        let mut handles = Vec::new();
        for account in batch.accounts() {
            match pools.get(&account) {
                Some(handle) => handles.push((account, Arc::clone(handle))),
                None if strict => return Err(LimitsError::PoolNotFound(account)),
                None => {}
            }
        }
        Ok(handles)
    }
}

fn lock_all(
    handles: &[(AccountId, Arc<Mutex<LimitPool>>)],
) -> BTreeMap<AccountId, MutexGuard<'_, LimitPool>> {
    // handles are sorted by account id, so locks are always taken in the same order
    handles
        .iter()
        .map(|(account, handle)| (*account, handle.lock()))
        .collect()
}

fn plan(
    batch: &Batch,
    guards: &BTreeMap<AccountId, MutexGuard<'_, LimitPool>>,
) -> Result<Vec<Planned>> {
    let mut planned = Vec::new();
    for ((account, kind), (current_delta, maximum_delta)) in batch.net_deltas()? {
        let pool = guards
            .get(&account)
            .ok_or(LimitsError::PoolNotFound(account))?;
        let limit = pool.get_limit(kind)?;

        let (current, maximum) = project(limit, current_delta, maximum_delta).map_err(
            |violation| LimitsError::InsufficientResources {
                scope: batch.scope,
                account,
                kind,
                violation,
            },
        )?;

        planned.push(Planned {
            account,
            kind,
            current,
            maximum,
        });
    }
    Ok(planned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::types::Role;

    fn pool(role: Role, limits: &[(ResourceKind, u32)]) -> LimitPool {
        LimitPool::new(
            AccountId::new(),
            role,
            limits.iter().map(|(k, m)| Limit::new(*k, *m)),
        )
    }

    fn engine_with(pools: Vec<LimitPool>) -> (AllocationEngine, Vec<AccountId>) {
        let engine = AllocationEngine::new();
        let ids = pools.iter().map(|p| p.owner()).collect();
        for p in pools {
            engine.insert_pool(p);
        }
        (engine, ids)
    }

    #[test]
    fn test_consume_until_full() {
        let (engine, ids) = engine_with(vec![pool(
            Role::Reseller,
            &[(ResourceKind::Mailboxes, 2)],
        )]);
        let reseller = ids[0];

        let one = Batch::operation().consume(reseller, ResourceKind::Mailboxes, 1);
        engine.apply(&one).unwrap();
        engine.apply(&one).unwrap();
        let err = engine.apply(&one).unwrap_err();
        assert!(matches!(
            err,
            LimitsError::InsufficientResources {
                scope: RejectionScope::Operation,
                violation: Violation::ExceedsMaximum,
                ..
            }
        ));
        assert_eq!(
            engine.snapshot(reseller, ResourceKind::Mailboxes).unwrap().pair(),
            (2, 2)
        );
    }

    #[test]
    fn test_rejected_batch_leaves_other_pairs_untouched() {
        let (engine, ids) = engine_with(vec![
            pool(
                Role::Reseller,
                &[(ResourceKind::Mailboxes, 2), (ResourceKind::MailboxAliases, 2)],
            ),
            pool(
                Role::DomainAdmin,
                &[(ResourceKind::Mailboxes, 0), (ResourceKind::MailboxAliases, 0)],
            ),
        ]);
        let (parent, child) = (ids[0], ids[1]);

        let batch = Batch::allocation()
            .transfer(parent, child, ResourceKind::Mailboxes, 1)
            .transfer(parent, child, ResourceKind::MailboxAliases, 3);
        let err = engine.apply(&batch).unwrap_err();
        assert!(matches!(
            err,
            LimitsError::InsufficientResources {
                scope: RejectionScope::Allocation,
                kind: ResourceKind::MailboxAliases,
                violation: Violation::NegativeMaximum,
                ..
            }
        ));

        assert_eq!(
            engine.snapshot(parent, ResourceKind::Mailboxes).unwrap().pair(),
            (0, 2)
        );
        assert_eq!(
            engine.snapshot(child, ResourceKind::Mailboxes).unwrap().pair(),
            (0, 0)
        );
    }

    #[test]
    fn test_check_does_not_commit() {
        let (engine, ids) = engine_with(vec![pool(
            Role::Reseller,
            &[(ResourceKind::Domains, 1)],
        )]);
        let batch = Batch::operation().consume(ids[0], ResourceKind::Domains, 1);
        engine.check(&batch).unwrap();
        assert_eq!(engine.snapshot(ids[0], ResourceKind::Domains).unwrap().current, 0);
    }

    #[test]
    fn test_net_delta_within_batch() {
        let (engine, ids) = engine_with(vec![pool(
            Role::Reseller,
            &[(ResourceKind::Mailboxes, 1)],
        )]);
        // +2 then -1 nets to +1, which fits
        let mut batch = Batch::operation();
        batch.adjust(ids[0], ResourceKind::Mailboxes, 2);
        batch.adjust(ids[0], ResourceKind::Mailboxes, -1);
        engine.apply(&batch).unwrap();
        assert_eq!(
            engine.snapshot(ids[0], ResourceKind::Mailboxes).unwrap().pair(),
            (1, 1)
        );
    }

    #[test]
    fn test_overflowing_deltas_are_rejected() {
        let (engine, ids) = engine_with(vec![pool(
            Role::Reseller,
            &[(ResourceKind::Mailboxes, 2)],
        )]);
        let huge = BatchOp {
            account: ids[0],
            kind: ResourceKind::Mailboxes,
            current_delta: i64::MAX,
            maximum_delta: 0,
        };
        let batch = Batch {
            scope: RejectionScope::Operation,
            ops: vec![huge, huge],
        };
        assert!(matches!(
            engine.apply(&batch),
            Err(LimitsError::InvalidRequest(_))
        ));

        // A single huge op does not wrap around either
        let batch = Batch {
            scope: RejectionScope::Operation,
            ops: vec![huge],
        };
        assert!(matches!(
            engine.apply(&batch),
            Err(LimitsError::InsufficientResources {
                violation: Violation::ExceedsMaximum,
                ..
            })
        ));
        let mut batch = Batch::operation();
        batch.adjust(ids[0], ResourceKind::Mailboxes, i64::MIN);
        assert!(matches!(
            engine.apply(&batch),
            Err(LimitsError::InsufficientResources {
                violation: Violation::NegativeUsage,
                ..
            })
        ));

        engine.force(&Batch {
            scope: RejectionScope::Operation,
            ops: vec![huge, huge],
        });
        assert_eq!(
            engine.snapshot(ids[0], ResourceKind::Mailboxes).unwrap().pair(),
            (0, 2)
        );
    }

    #[test]
    fn test_unknown_pool_and_kind() {
        let (engine, ids) = engine_with(vec![pool(
            Role::DomainAdmin,
            &[(ResourceKind::Mailboxes, 1)],
        )]);

        let missing = AccountId::new();
        let err = engine
            .apply(&Batch::operation().consume(missing, ResourceKind::Mailboxes, 1))
            .unwrap_err();
        assert!(matches!(err, LimitsError::PoolNotFound(id) if id == missing));

        let err = engine
            .apply(&Batch::operation().consume(ids[0], ResourceKind::Domains, 1))
            .unwrap_err();
        assert!(matches!(err, LimitsError::UnknownResourceKind { .. }));
    }

    #[test]
    fn test_release_allowed_when_over_quota() {
        let (engine, ids) = engine_with(vec![pool(
            Role::Reseller,
            &[(ResourceKind::Mailboxes, 2)],
        )]);
        engine
            .apply(&Batch::operation().consume(ids[0], ResourceKind::Mailboxes, 2))
            .unwrap();
        // Reclaim shrinks the maximum underneath live objects
        engine.force(&Batch::allocation().transfer(ids[0], AccountId::new(), ResourceKind::Mailboxes, 1));
        assert_eq!(
            engine.snapshot(ids[0], ResourceKind::Mailboxes).unwrap().pair(),
            (2, 1)
        );

        engine
            .apply(&Batch::operation().release(ids[0], ResourceKind::Mailboxes, 1))
            .unwrap();
        assert!(engine
            .apply(&Batch::operation().consume(ids[0], ResourceKind::Mailboxes, 1))
            .is_err());
    }

    #[test]
    fn test_force_saturates_and_skips_missing() {
        let (engine, ids) = engine_with(vec![pool(
            Role::Reseller,
            &[(ResourceKind::Mailboxes, 2)],
        )]);
        let batch = Batch::operation()
            .release(ids[0], ResourceKind::Mailboxes, 5)
            .release(AccountId::new(), ResourceKind::Mailboxes, 1);
        engine.force(&batch);
        assert_eq!(
            engine.snapshot(ids[0], ResourceKind::Mailboxes).unwrap().pair(),
            (0, 2)
        );
    }

    #[test]
    fn test_remove_pool_returns_counters() {
        let (engine, ids) = engine_with(vec![pool(
            Role::Reseller,
            &[(ResourceKind::Domains, 3)],
        )]);
        engine
            .apply(&Batch::operation().consume(ids[0], ResourceKind::Domains, 2))
            .unwrap();
        let removed = engine.remove_pool(ids[0]).unwrap();
        assert_eq!(removed.snapshot(ResourceKind::Domains).unwrap().current, 2);
        assert!(!engine.has_pool(ids[0]));
        assert!(matches!(
            engine.snapshot(ids[0], ResourceKind::Domains),
            Err(LimitsError::PoolNotFound(_))
        ));
    }
}
