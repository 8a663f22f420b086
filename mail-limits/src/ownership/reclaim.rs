//! Reclamation and re-attribution of quota
//!
//! Cascades (a reseller leaving takes its domains and the sub-pools it granted
//! with it) run on an explicit stack. Each account's children are processed
//! completely before its own counters are folded into its parent, so the depth
//! of the ownership tree never grows the call stack.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use super::graph::OwnershipGraph;
use crate::quota::engine::{AllocationEngine, Batch, BatchOp};
use crate::quota::types::{AccountId, DomainId, ResourceKind};

/// Why quota is being handed back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReclaimReason {
    /// The account is being deleted
    Deleted,
    /// The account is leaving a quota-holding role
    RoleChanged,
    /// The account stops owning `domain`
    OwnershipRemoved { domain: DomainId },
}

/// What a reclamation did, for logs and callers that care
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimSummary {
    /// Accounts whose pool was reclaimed or lost a grant
    pub accounts: usize,
    /// Domains detached from their owner
    pub domains: usize,
    /// Objects now counted by another pool
    pub reattributed: u32,
    /// Objects deleted with their holder
    pub released: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Deleted,
    RoleChanged,
}

#[derive(Debug)]
enum Task {
    /// Schedule everything hanging off an account, then the account itself
    Expand { account: AccountId, exit: Exit },
    /// Fold the account's own counters into its parent and drop its pool
    Finish { account: AccountId, exit: Exit },
    /// The account that granted `child` its capacity is going away
    Orphan {
        child: AccountId,
        former_parent: AccountId,
    },
    /// `domain` leaves `former_owner`'s tree
    Detach {
        domain: DomainId,
        former_owner: AccountId,
    },
}

pub struct Reclaimer<'a> {
    graph: &'a mut OwnershipGraph,
    engine: &'a AllocationEngine,
    summary: ReclaimSummary,
}

impl<'a> Reclaimer<'a> {
    pub fn new(graph: &'a mut OwnershipGraph, engine: &'a AllocationEngine) -> Self {
        Reclaimer {
            graph,
            engine,
            summary: ReclaimSummary::default(),
        }
    }

    /// Reclaim everything `account` holds for `reason`. Never fails; repeating a
    /// reclamation that already happened is a no-op.
    pub fn run(mut self, account: AccountId, reason: ReclaimReason) -> ReclaimSummary {
        let mut stack = vec![match reason {
            ReclaimReason::Deleted => Task::Expand {
                account,
                exit: Exit::Deleted,
            },
            ReclaimReason::RoleChanged => Task::Expand {
                account,
                exit: Exit::RoleChanged,
            },
            ReclaimReason::OwnershipRemoved { domain } => Task::Detach {
                domain,
                former_owner: account,
            },
        }];
        let mut expanded = HashSet::new();

        while let Some(task) = stack.pop() {
            debug!("Reclaim step: {:?}", task);
            match task {
                Task::Expand { account, exit } => {
                    if self.graph.account(account).is_none() || !expanded.insert(account) {
                        continue;
                    }
                    stack.push(Task::Finish { account, exit });
                    for domain in self.graph.domains_owned_by(account) {
                        stack.push(Task::Detach {
                            domain,
                            former_owner: account,
                        });
                    }
                    for child in self.graph.grants_from(account) {
                        stack.push(Task::Orphan {
                            child,
                            former_parent: account,
                        });
                    }
                }
                Task::Finish { account, exit } => self.finish(account, exit),
                Task::Orphan {
                    child,
                    former_parent,
                } => self.orphan(child, former_parent),
                Task::Detach {
                    domain,
                    former_owner,
                } => self.detach(domain, former_owner),
            }
        }

        if self.summary != ReclaimSummary::default() {
            info!(
                "Reclaimed quota of {} ({:?}): {} account(s), {} domain(s), {} re-attributed, {} released",
                account,
                reason,
                self.summary.accounts,
                self.summary.domains,
                self.summary.reattributed,
                self.summary.released
            );
        }
        self.summary
    }

    fn finish(&mut self, account: AccountId, exit: Exit) {
        let Some(departing) = self.graph.account(account).cloned() else {
            return;
        };
        let mut batch = Batch::allocation();

        // Objects that belong to the account itself go away with it; a role
        // change only gives back the administrator seat.
        let held = match exit {
            Exit::Deleted => self.graph.resources_held_by(account),
            Exit::RoleChanged => self.graph.seat_of(account).into_iter().collect(),
        };
        for id in held {
            if let Some(record) = self.graph.remove_resource(id) {
                if let Some(counter) = record.counted_by {
                    batch.adjust(counter, record.kind, -1);
                }
                self.summary.released += 1;
            }
        }

        // Hand the granted capacity back to the pool it was carved from
        let grant = self.graph.take_grant(account);
        if let Some(grant) = &grant {
            for (kind, amount) in &grant.amounts {
                batch.push(BatchOp {
                    account: grant.from,
                    kind: *kind,
                    current_delta: 0,
                    maximum_delta: i64::from(*amount),
                });
            }
        }

        // Whatever the account still counts is now counted by its parent
        for id in self.graph.resources_counted_by(account) {
            let Some(record) = self.graph.resource(id).cloned() else {
                continue;
            };
            let target = self.reattribution_target(
                account,
                grant.as_ref().map(|g| g.from),
                record.kind,
                record.domain,
            );
            if let Some(target) = target {
                batch.adjust(target, record.kind, 1);
            }
            if let Some(record) = self.graph.resource_mut(id) {
                record.counted_by = target;
            }
            self.summary.reattributed += 1;
        }

        self.engine.force(&batch);
        if self.engine.remove_pool(account).is_some() {
            self.summary.accounts += 1;
        }

        if exit == Exit::Deleted {
            self.graph.remove_account(account);
        }
        debug!(
            "Finished reclaim of {} ({}) with {} counter change(s)",
            account,
            departing.role,
            batch.ops.len()
        );
    }

    /// Take back exactly what `former_parent` granted. Capacity the child
    /// tracks on its own (its role defaults, its domains) is left alone; objects
    /// the shrunken maximum can no longer cover are counted by the platform.
    fn orphan(&mut self, child: AccountId, former_parent: AccountId) {
        let grant = match self.graph.grant(child) {
            Some(grant) if grant.from == former_parent => grant.clone(),
            _ => return,
        };
        self.graph.take_grant(child);

        let mut batch = Batch::allocation();
        for (kind, amount) in &grant.amounts {
            let Some(limit) = self.engine.limit(child, *kind) else {
                continue;
            };
            if limit.unlimited {
                continue;
            }
            let maximum = limit.maximum.saturating_sub(*amount);
            let excess = limit.current.saturating_sub(maximum);

            let counted: Vec<_> = self
                .graph
                .resources_counted_by(child)
                .into_iter()
                .filter(|id| self.graph.resource(*id).is_some_and(|r| r.kind == *kind))
                .collect();
            let mut moved = 0u32;
            for id in counted.into_iter().rev().take(excess as usize) {
                if let Some(record) = self.graph.resource_mut(id) {
                    record.counted_by = None;
                    moved += 1;
                }
            }
            self.summary.reattributed += moved;

            batch.push(BatchOp {
                account: child,
                kind: *kind,
                current_delta: -i64::from(moved),
                maximum_delta: -i64::from(limit.maximum - maximum),
            });
        }
        self.engine.force(&batch);
        self.summary.accounts += 1;
    }

    fn detach(&mut self, domain_id: DomainId, former_owner: AccountId) {
        let Some(domain) = self.graph.domain(domain_id).cloned() else {
            return;
        };
        if domain.owner != Some(former_owner) {
            return;
        }

        // Admins still attached to another domain of the former owner stay in
        // its tree: their seat moves to that domain
        let staying: BTreeMap<AccountId, DomainId> = domain
            .admins
            .iter()
            .filter_map(|admin| {
                self.graph
                    .domains_owned_by(former_owner)
                    .into_iter()
                    .filter(|d| *d != domain_id)
                    .find(|d| {
                        self.graph
                            .domain(*d)
                            .is_some_and(|other| other.admins.contains(admin))
                    })
                    .map(|d| (*admin, d))
            })
            .collect();

        let mut released: BTreeMap<ResourceKind, u32> = BTreeMap::new();
        *released.entry(ResourceKind::Domains).or_default() += 1;

        for id in self.graph.resources_in_domain(domain_id) {
            let Some(record) = self.graph.resource_mut(id) else {
                continue;
            };
            if record.counted_by != Some(former_owner) {
                continue;
            }
            let moved_to = match record.kind {
                ResourceKind::DomainAdmins => record.holder.and_then(|h| staying.get(&h)),
                _ => None,
            };
            if let Some(other) = moved_to {
                record.domain = Some(*other);
                continue;
            }
            record.counted_by = None;
            *released.entry(record.kind).or_default() += 1;
        }

        // Sub-allocations leave with the domain; the former owner gets nothing back
        for admin in domain.admins.iter().filter(|a| !staying.contains_key(*a)) {
            let granted_here = self
                .graph
                .grant(*admin)
                .is_some_and(|g| g.from == former_owner);
            if granted_here {
                self.graph.take_grant(*admin);
            }
            if let Some(account) = self.graph.account_mut(*admin) {
                if account.parent == Some(former_owner) {
                    account.parent = None;
                }
            }
        }

        let mut batch = Batch::allocation();
        for (kind, count) in released {
            batch.adjust(former_owner, kind, -i64::from(count));
        }
        self.engine.force(&batch);

        if let Some(domain) = self.graph.domain_mut(domain_id) {
            domain.owner = None;
        }
        self.summary.domains += 1;
        info!("Domain {} detached from {}", domain.name, former_owner);
    }

    /// First pool above `departing` that tracks `kind`: the granting parent, then
    /// the domain owner, then the administrative ancestors.
    fn reattribution_target(
        &self,
        departing: AccountId,
        granted_by: Option<AccountId>,
        kind: ResourceKind,
        domain: Option<DomainId>,
    ) -> Option<AccountId> {
        let domain_owner = domain
            .and_then(|d| self.graph.domain(d))
            .and_then(|d| d.owner);

        granted_by
            .into_iter()
            .chain(domain_owner)
            .chain(self.graph.ancestors(departing))
            .filter(|candidate| *candidate != departing)
            .find(|candidate| {
                self.graph.account(*candidate).is_some()
                    && self
                        .engine
                        .pool(*candidate)
                        .is_some_and(|pool| pool.tracks(kind))
            })
    }
}
