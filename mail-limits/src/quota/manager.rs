use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::engine::{AllocationEngine, Batch};
use super::pool::LimitPool;
use super::registry::ResourceRegistry;
use super::types::{AccountId, DomainId, LimitSnapshot, ResourceId, ResourceKind, Role};
use crate::config::TemplateConfig;
use crate::error::{LimitsError, RejectionScope, Result, Violation};
use crate::ownership::graph::{
    Account, Domain, Grant, GraphSnapshot, OwnershipGraph, ResourceRecord,
};
use crate::ownership::reclaim::{ReclaimReason, ReclaimSummary, Reclaimer};

/// Compound domain creation: the domain, optionally its first administrator
/// (with a mailbox), and a set of default aliases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainTemplate {
    pub name: String,
    pub create_admin: bool,
    pub alias_count: u32,
}

impl DomainTemplate {
    pub fn new(name: impl Into<String>, config: &TemplateConfig) -> Self {
        DomainTemplate {
            name: name.into(),
            create_admin: config.create_domain_admin,
            alias_count: u32::try_from(config.default_aliases.len()).unwrap_or(u32::MAX),
        }
    }
}

/// Objects created by [`LimitsManager::create_domain_from_template`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateOutcome {
    pub domain: DomainId,
    pub admin: Option<AccountId>,
    pub admin_mailbox: Option<ResourceId>,
    pub aliases: Vec<ResourceId>,
}

/// Complete persisted state: ownership records plus pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub graph: GraphSnapshot,
    pub pools: Vec<LimitPool>,
}

/// A pool whose counter disagrees with the objects it counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditMismatch {
    pub account: AccountId,
    pub kind: ResourceKind,
    pub counter: u32,
    pub live_objects: u32,
}

/// Entry point of the quota core.
///
/// Collaborators report "create / delete / reassign" intents here and get back
/// an accept or a specific rejection. Every counter change is expressed as an
/// engine batch, so multi-resource operations are atomic.
pub struct LimitsManager {
    registry: Arc<ResourceRegistry>,
    engine: AllocationEngine,
    graph: RwLock<OwnershipGraph>,
}

impl LimitsManager {
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        LimitsManager {
            registry,
            engine: AllocationEngine::new(),
            graph: RwLock::new(OwnershipGraph::new()),
        }
    }

    /// Rebuild a manager from persisted state
    pub fn from_state(registry: Arc<ResourceRegistry>, state: StateSnapshot) -> Self {
        let engine = AllocationEngine::new();
        for pool in state.pools {
            engine.insert_pool(pool);
        }
        LimitsManager {
            registry,
            engine,
            graph: RwLock::new(OwnershipGraph::from_snapshot(state.graph)),
        }
    }

    pub fn state(&self) -> StateSnapshot {
        // Hold the graph lock so records and counters come from the same moment
        let graph = self.graph.read();
        StateSnapshot {
            graph: graph.to_snapshot(),
            pools: self.engine.pools(),
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    // -- queries -----------------------------------------------------------

    pub fn snapshot(&self, account: AccountId, kind: ResourceKind) -> Result<LimitSnapshot> {
        self.engine.snapshot(account, kind)
    }

    pub fn pool(&self, account: AccountId) -> Result<LimitPool> {
        self.engine
            .pool(account)
            .ok_or(LimitsError::PoolNotFound(account))
    }

    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.graph.read().account(id).cloned()
    }

    pub fn domain(&self, id: DomainId) -> Option<Domain> {
        self.graph.read().domain(id).cloned()
    }

    pub fn resource(&self, id: ResourceId) -> Option<ResourceRecord> {
        self.graph.read().resource(id).cloned()
    }

    pub fn grant(&self, child: AccountId) -> Option<Grant> {
        self.graph.read().grant(child).cloned()
    }

    /// Pool that would count a new object of `kind` created by `account`
    pub fn effective_pool(
        &self,
        account: AccountId,
        kind: ResourceKind,
        domain: Option<DomainId>,
    ) -> Option<AccountId> {
        let graph = self.graph.read();
        self.resolve_pool(&graph, Some(account), kind, domain)
    }

    /// Can `account` create one more object of `kind`?
    pub fn evaluate_create(&self, account: AccountId, kind: ResourceKind) -> Result<()> {
        self.evaluate_create_in(account, kind, None)
    }

    pub fn evaluate_create_in(
        &self,
        account: AccountId,
        kind: ResourceKind,
        domain: Option<DomainId>,
    ) -> Result<()> {
        let graph = self.graph.read();
        if graph.account(account).is_none() {
            return Err(LimitsError::AccountNotFound(account));
        }
        let pool = self.resolve_pool(&graph, Some(account), kind, domain);
        if self.has_room(pool, kind, 1) {
            Ok(())
        } else {
            Err(LimitsError::InsufficientResources {
                scope: RejectionScope::Operation,
                account: pool.unwrap_or(account),
                kind,
                violation: Violation::ExceedsMaximum,
            })
        }
    }

    /// Can `actor` hand out `role`? Only DomainAdmin consumes capacity (a seat).
    pub fn evaluate_role_assignment(&self, actor: AccountId, role: Role) -> Result<()> {
        let graph = self.graph.read();
        if graph.account(actor).is_none() {
            return Err(LimitsError::AccountNotFound(actor));
        }
        self.check_role(&graph, Some(actor), role)
    }

    /// Roles `actor` may offer as choices
    pub fn assignable_roles(&self, actor: AccountId) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|role| self.evaluate_role_assignment(actor, *role).is_ok())
            .collect()
    }

    /// Compare every pool counter with the objects recorded against it
    pub fn audit(&self) -> Vec<AuditMismatch> {
        let graph = self.graph.read();
        let mut mismatches = Vec::new();
        for pool in self.engine.pools() {
            for limit in pool.limits() {
                let live = graph.count_for(pool.owner(), limit.kind);
                if live != limit.current {
                    mismatches.push(AuditMismatch {
                        account: pool.owner(),
                        kind: limit.kind,
                        counter: limit.current,
                        live_objects: live,
                    });
                }
            }
        }
        mismatches
    }

    // -- raw batches -------------------------------------------------------

    /// Apply a caller-built batch atomically
    pub fn apply_batch(&self, batch: &Batch) -> Result<()> {
        let _graph = self.graph.read();
        self.engine.apply(batch)
    }

    // -- accounts ----------------------------------------------------------

    /// Create an account, optionally with its own mailbox in `mailbox_domain`.
    ///
    /// The administrator seat (for DomainAdmin) and the mailbox are taken in one
    /// batch. A missing seat is a `RoleUnavailable` on the role choice.
    pub fn create_account(
        &self,
        actor: Option<AccountId>,
        role: Role,
        mailbox_domain: Option<DomainId>,
    ) -> Result<AccountId> {
        let mut graph = self.graph.write();
        if let Some(actor) = actor {
            if graph.account(actor).is_none() {
                return Err(LimitsError::AccountNotFound(actor));
            }
        }
        if let Some(domain) = mailbox_domain {
            if graph.domain(domain).is_none() {
                return Err(LimitsError::DomainNotFound(domain));
            }
        }

        self.check_role(&graph, actor, role)?;

        let mut batch = Batch::operation();
        let seat_pool = (role == Role::DomainAdmin)
            .then(|| self.resolve_pool(&graph, actor, ResourceKind::DomainAdmins, None));
        if let Some(Some(pool)) = seat_pool {
            batch.adjust(pool, ResourceKind::DomainAdmins, 1);
        }
        let mailbox_pool =
            mailbox_domain.map(|d| self.resolve_pool(&graph, actor, ResourceKind::Mailboxes, Some(d)));
        if let Some(Some(pool)) = mailbox_pool {
            batch.adjust(pool, ResourceKind::Mailboxes, 1);
        }
        self.apply_for_role(&batch, role)?;

        let id = AccountId::new();
        graph.insert_account(Account {
            id,
            role,
            parent: actor,
        });
        if let Some(pool) = self.registry.default_pool(id, role) {
            self.engine.insert_pool(pool);
        }
        if let Some(counted_by) = seat_pool {
            graph.insert_resource(ResourceRecord {
                id: ResourceId::new(),
                kind: ResourceKind::DomainAdmins,
                domain: None,
                holder: Some(id),
                counted_by,
            });
        }
        if let (Some(domain), Some(counted_by)) = (mailbox_domain, mailbox_pool) {
            graph.insert_resource(ResourceRecord {
                id: ResourceId::new(),
                kind: ResourceKind::Mailboxes,
                domain: Some(domain),
                holder: Some(id),
                counted_by,
            });
        }

        info!("Account {} created as {}", id, role);
        Ok(id)
    }

    /// Delete an account, reclaiming everything it held. Idempotent.
    pub fn delete_account(&self, account: AccountId) -> ReclaimSummary {
        self.reclaim(account, ReclaimReason::Deleted)
    }

    /// Give quota back for `account`. Always succeeds; no capacity check is made
    /// because reclamation can only free capacity.
    ///
    /// `RoleChanged` leaves the account as a SimpleUser: a Reseller or
    /// DomainAdmin without a pool would otherwise be counted by its ancestors.
    pub fn reclaim(&self, account: AccountId, reason: ReclaimReason) -> ReclaimSummary {
        let mut graph = self.graph.write();
        let summary = Reclaimer::new(&mut graph, &self.engine).run(account, reason);

        if reason == ReclaimReason::RoleChanged {
            if let Some(entry) = graph.account_mut(account) {
                if ResourceRegistry::holds_pool(entry.role) {
                    info!(
                        "Account {} changed role {} -> {}",
                        account,
                        entry.role,
                        Role::SimpleUser
                    );
                    entry.role = Role::SimpleUser;
                }
            }
        }
        summary
    }

    /// Move `account` to `role`, releasing or creating its pool.
    ///
    /// `actor` is the account doing the change; it defaults to the account's
    /// administrative parent and decides which pool provides a DomainAdmin seat.
    pub fn change_role(
        &self,
        actor: Option<AccountId>,
        account: AccountId,
        role: Role,
    ) -> Result<()> {
        let mut graph = self.graph.write();
        let current = graph
            .account(account)
            .cloned()
            .ok_or(LimitsError::AccountNotFound(account))?;
        if current.role == role {
            return Ok(());
        }
        let actor = actor.or(current.parent);

        // Take the new seat first: if it is refused nothing else has moved
        self.check_role(&graph, actor, role)?;
        let seat_pool = (role == Role::DomainAdmin)
            .then(|| self.resolve_pool(&graph, actor, ResourceKind::DomainAdmins, None));
        if let Some(Some(pool)) = seat_pool {
            self.apply_for_role(
                &Batch::operation().consume(pool, ResourceKind::DomainAdmins, 1),
                role,
            )?;
        }

        if self.engine.has_pool(account) || graph.seat_of(account).is_some() {
            Reclaimer::new(&mut graph, &self.engine)
                .run(account, ReclaimReason::RoleChanged);
        }

        if let Some(entry) = graph.account_mut(account) {
            entry.role = role;
        }
        if let Some(pool) = self.registry.default_pool(account, role) {
            self.engine.insert_pool(pool);
        }
        if let Some(counted_by) = seat_pool {
            let domain = graph
                .domains()
                .find(|d| d.admins.contains(&account))
                .map(|d| d.id);
            graph.insert_resource(ResourceRecord {
                id: ResourceId::new(),
                kind: ResourceKind::DomainAdmins,
                domain,
                holder: Some(account),
                counted_by,
            });
        }

        info!("Account {} changed role {} -> {}", account, current.role, role);
        Ok(())
    }

    // -- allocation --------------------------------------------------------

    /// Set the capacity `child` holds out of `parent`'s pool.
    ///
    /// `limits` gives the child's new granted maximum per kind (the form's
    /// `mailboxes_limit` etc.); only the difference to the current grant moves.
    /// All kinds move together or none does.
    pub fn allocate(
        &self,
        parent: AccountId,
        child: AccountId,
        limits: &[(ResourceKind, u32)],
    ) -> Result<()> {
        let mut graph = self.graph.write();
        for id in [parent, child] {
            if graph.account(id).is_none() {
                return Err(LimitsError::AccountNotFound(id));
            }
        }
        if parent == child {
            return Err(LimitsError::InvalidRequest(
                "an account cannot allocate to itself".to_string(),
            ));
        }
        if let Some((kind, _)) = limits
            .iter()
            .find(|(kind, _)| !ResourceRegistry::is_allocatable(*kind))
        {
            return Err(LimitsError::NotAllocatable(*kind));
        }

        let mut amounts = match graph.grant(child) {
            Some(existing) if existing.from != parent => {
                return Err(LimitsError::GrantConflict {
                    child,
                    holder: existing.from,
                })
            }
            Some(existing) => existing.amounts.clone(),
            None => BTreeMap::new(),
        };

        let mut batch = Batch::allocation();
        for (kind, new_max) in limits {
            let old = amounts.get(kind).copied().unwrap_or(0);
            let delta = i64::from(*new_max) - i64::from(old);
            if delta != 0 {
                batch = batch.transfer(parent, child, *kind, delta);
            }
            amounts.insert(*kind, *new_max);
        }

        if let Err(e) = self.engine.apply(&batch) {
            info!("Allocation from {} to {} refused: {}", parent, child, e);
            return Err(e);
        }
        graph.set_grant(Grant {
            child,
            from: parent,
            amounts,
        });

        info!("Allocation from {} to {} updated", parent, child);
        Ok(())
    }

    // -- domains and objects -----------------------------------------------

    /// Create a domain counted against the first pool above `actor` tracking domains
    pub fn create_domain(&self, actor: AccountId, name: &str) -> Result<DomainId> {
        let template = DomainTemplate {
            name: name.to_string(),
            create_admin: false,
            alias_count: 0,
        };
        self.create_domain_from_template(actor, &template)
            .map(|outcome| outcome.domain)
    }

    /// Create a domain with its administrator, mailbox and aliases as one batch.
    /// If any kind lacks capacity nothing is created.
    pub fn create_domain_from_template(
        &self,
        actor: AccountId,
        template: &DomainTemplate,
    ) -> Result<TemplateOutcome> {
        let mut graph = self.graph.write();
        if graph.account(actor).is_none() {
            return Err(LimitsError::AccountNotFound(actor));
        }
        if graph.domain_by_name(&template.name).is_some() {
            return Err(LimitsError::InvalidRequest(format!(
                "domain {} already exists",
                template.name
            )));
        }

        let owner = self.resolve_from(&graph, Some(actor), ResourceKind::Domains, None);
        let resolve = |kind| self.resolve_from(&graph, Some(actor), kind, owner);

        let mut batch = Batch::operation();
        let mut pools = BTreeMap::new();
        let mut wanted = vec![(ResourceKind::Domains, 1)];
        if template.create_admin {
            wanted.push((ResourceKind::DomainAdmins, 1));
            wanted.push((ResourceKind::Mailboxes, 1));
        }
        if template.alias_count > 0 {
            wanted.push((ResourceKind::MailboxAliases, template.alias_count));
        }
        for (kind, count) in wanted {
            let pool = if kind == ResourceKind::Domains {
                owner
            } else {
                resolve(kind)
            };
            if let Some(pool) = pool {
                batch.adjust(pool, kind, i64::from(count));
            }
            pools.insert(kind, pool);
        }
        self.engine.apply(&batch)?;

        let domain_id = DomainId::new();
        let mut domain = Domain {
            id: domain_id,
            name: template.name.clone(),
            owner,
            admins: Default::default(),
        };

        let mut outcome = TemplateOutcome {
            domain: domain_id,
            admin: None,
            admin_mailbox: None,
            aliases: Vec::new(),
        };

        if template.create_admin {
            let admin = AccountId::new();
            graph.insert_account(Account {
                id: admin,
                role: Role::DomainAdmin,
                parent: Some(actor),
            });
            if let Some(pool) = self.registry.default_pool(admin, Role::DomainAdmin) {
                self.engine.insert_pool(pool);
            }
            domain.admins.insert(admin);

            let seat = self.record(
                &mut graph,
                ResourceKind::DomainAdmins,
                Some(domain_id),
                Some(admin),
                pools.get(&ResourceKind::DomainAdmins).copied().flatten(),
            );
            debug!("Template seat {} for {}", seat, admin);
            let mailbox = self.record(
                &mut graph,
                ResourceKind::Mailboxes,
                Some(domain_id),
                Some(admin),
                pools.get(&ResourceKind::Mailboxes).copied().flatten(),
            );
            outcome.admin = Some(admin);
            outcome.admin_mailbox = Some(mailbox);
        }
        for _ in 0..template.alias_count {
            let alias = self.record(
                &mut graph,
                ResourceKind::MailboxAliases,
                Some(domain_id),
                None,
                pools.get(&ResourceKind::MailboxAliases).copied().flatten(),
            );
            outcome.aliases.push(alias);
        }
        graph.insert_domain(domain);

        info!("Domain {} created by {}", template.name, actor);
        Ok(outcome)
    }

    /// Delete a domain and every object under it. Administrators survive and
    /// keep their seat.
    pub fn delete_domain(&self, domain_id: DomainId) -> Result<()> {
        let mut graph = self.graph.write();
        let domain = graph
            .remove_domain(domain_id)
            .ok_or(LimitsError::DomainNotFound(domain_id))?;

        let mut batch = Batch::operation();
        if let Some(owner) = domain.owner {
            batch.adjust(owner, ResourceKind::Domains, -1);
        }
        for id in graph.resources_in_domain(domain_id) {
            let Some(record) = graph.resource(id).cloned() else {
                continue;
            };
            if record.kind == ResourceKind::DomainAdmins {
                if let Some(seat) = graph.resource_mut(id) {
                    seat.domain = None;
                }
                continue;
            }
            graph.remove_resource(id);
            if let Some(counter) = record.counted_by {
                batch.adjust(counter, record.kind, -1);
            }
        }
        self.engine.force(&batch);

        info!("Domain {} deleted", domain.name);
        Ok(())
    }

    /// Detach `domain` from its owner (the owner stays, the domain leaves its tree)
    pub fn remove_domain_owner(&self, domain: DomainId) -> Result<ReclaimSummary> {
        let owner = self
            .domain(domain)
            .ok_or(LimitsError::DomainNotFound(domain))?
            .owner;
        Ok(match owner {
            Some(owner) => self.reclaim(owner, ReclaimReason::OwnershipRemoved { domain }),
            None => ReclaimSummary::default(),
        })
    }

    /// Attach a domain administrator to a domain; quota neutral
    pub fn add_domain_admin(&self, domain_id: DomainId, admin: AccountId) -> Result<()> {
        let mut graph = self.graph.write();
        match graph.account(admin) {
            Some(account) if account.role == Role::DomainAdmin => {}
            Some(account) => {
                return Err(LimitsError::InvalidRequest(format!(
                    "{} is a {}, not a domain administrator",
                    admin, account.role
                )))
            }
            None => return Err(LimitsError::AccountNotFound(admin)),
        }
        let domain = graph
            .domain_mut(domain_id)
            .ok_or(LimitsError::DomainNotFound(domain_id))?;
        domain.admins.insert(admin);

        if let Some(seat) = graph.seat_of(admin) {
            if let Some(record) = graph.resource_mut(seat) {
                record.domain.get_or_insert(domain_id);
            }
        }
        Ok(())
    }

    pub fn remove_domain_admin(&self, domain_id: DomainId, admin: AccountId) -> Result<()> {
        let mut graph = self.graph.write();
        let domain = graph
            .domain_mut(domain_id)
            .ok_or(LimitsError::DomainNotFound(domain_id))?;
        domain.admins.remove(&admin);

        let other = graph
            .domains()
            .find(|d| d.admins.contains(&admin))
            .map(|d| d.id);
        if let Some(seat) = graph.seat_of(admin) {
            if let Some(record) = graph.resource_mut(seat) {
                if record.domain == Some(domain_id) {
                    record.domain = other;
                }
            }
        }
        Ok(())
    }

    /// Create a mailbox in `domain`, optionally belonging to `holder`
    pub fn create_mailbox(
        &self,
        actor: AccountId,
        domain: DomainId,
        holder: Option<AccountId>,
    ) -> Result<ResourceId> {
        self.create_resource(actor, ResourceKind::Mailboxes, domain, holder)
    }

    pub fn create_mailbox_alias(&self, actor: AccountId, domain: DomainId) -> Result<ResourceId> {
        self.create_resource(actor, ResourceKind::MailboxAliases, domain, None)
    }

    pub fn create_domain_alias(&self, actor: AccountId, domain: DomainId) -> Result<ResourceId> {
        self.create_resource(actor, ResourceKind::DomainAliases, domain, None)
    }

    /// Count a new object of `kind` under `domain`, created by `actor`
    pub fn create_resource(
        &self,
        actor: AccountId,
        kind: ResourceKind,
        domain: DomainId,
        holder: Option<AccountId>,
    ) -> Result<ResourceId> {
        if matches!(kind, ResourceKind::Domains | ResourceKind::DomainAdmins) {
            return Err(LimitsError::InvalidRequest(format!(
                "{} are created with their own operation",
                kind
            )));
        }

        let mut graph = self.graph.write();
        if graph.account(actor).is_none() {
            return Err(LimitsError::AccountNotFound(actor));
        }
        if graph.domain(domain).is_none() {
            return Err(LimitsError::DomainNotFound(domain));
        }
        if let Some(holder) = holder {
            if graph.account(holder).is_none() {
                return Err(LimitsError::AccountNotFound(holder));
            }
        }

        let pool = self.resolve_pool(&graph, Some(actor), kind, Some(domain));
        if let Some(pool) = pool {
            self.engine
                .apply(&Batch::operation().consume(pool, kind, 1))?;
        }
        let id = self.record(&mut graph, kind, Some(domain), holder, pool);

        debug!("Created {} {} counted by {:?}", kind, id, pool);
        Ok(id)
    }

    /// Delete one object and stop counting it
    pub fn delete_resource(&self, id: ResourceId) -> Result<()> {
        let mut graph = self.graph.write();
        let record = graph
            .remove_resource(id)
            .ok_or(LimitsError::ResourceNotFound(id))?;
        if let Some(counter) = record.counted_by {
            self.engine
                .force(&Batch::operation().release(counter, record.kind, 1));
        }
        debug!("Deleted {} {}", record.kind, id);
        Ok(())
    }

    // -- internals ---------------------------------------------------------

    fn record(
        &self,
        graph: &mut OwnershipGraph,
        kind: ResourceKind,
        domain: Option<DomainId>,
        holder: Option<AccountId>,
        counted_by: Option<AccountId>,
    ) -> ResourceId {
        let id = ResourceId::new();
        graph.insert_resource(ResourceRecord {
            id,
            kind,
            domain,
            holder,
            counted_by,
        });
        id
    }

    /// Does `account`'s pool answer for `kind`? A domain administrator's pool
    /// only does once capacity was granted to it.
    fn serves(&self, graph: &OwnershipGraph, account: AccountId, kind: ResourceKind) -> bool {
        let Some(entry) = graph.account(account) else {
            return false;
        };
        match self.engine.limit(account, kind) {
            Some(limit) if entry.role == Role::DomainAdmin => {
                limit.unlimited || limit.maximum > 0
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Pool counting a new `kind` object: the actor's own, then the domain
    /// owner's, then the actor's ancestors. `None` means the platform.
    fn resolve_pool(
        &self,
        graph: &OwnershipGraph,
        actor: Option<AccountId>,
        kind: ResourceKind,
        domain: Option<DomainId>,
    ) -> Option<AccountId> {
        let owner = domain.and_then(|d| graph.domain(d)).and_then(|d| d.owner);
        self.resolve_from(graph, actor, kind, owner)
    }

    fn resolve_from(
        &self,
        graph: &OwnershipGraph,
        actor: Option<AccountId>,
        kind: ResourceKind,
        owner: Option<AccountId>,
    ) -> Option<AccountId> {
        let ancestors = actor.map(|a| graph.ancestors(a)).unwrap_or_default();
        actor
            .into_iter()
            .chain(owner)
            .chain(ancestors)
            .find(|candidate| self.serves(graph, *candidate, kind))
    }

    fn has_room(&self, pool: Option<AccountId>, kind: ResourceKind, count: u32) -> bool {
        match pool {
            None => true,
            Some(pool) => self
                .engine
                .limit(pool, kind)
                .is_some_and(|limit| limit.has_room(count)),
        }
    }

    fn check_role(&self, graph: &OwnershipGraph, actor: Option<AccountId>, role: Role) -> Result<()> {
        if role != Role::DomainAdmin {
            return Ok(());
        }
        let pool = self.resolve_pool(graph, actor, ResourceKind::DomainAdmins, None);
        if self.has_room(pool, ResourceKind::DomainAdmins, 1) {
            Ok(())
        } else {
            Err(LimitsError::RoleUnavailable {
                field: "role",
                role,
            })
        }
    }

    /// Apply a batch; a missing DomainAdmin seat is reported against the role
    /// choice rather than as a generic refusal
    fn apply_for_role(&self, batch: &Batch, role: Role) -> Result<()> {
        match self.engine.apply(batch) {
            Err(LimitsError::InsufficientResources {
                kind: ResourceKind::DomainAdmins,
                ..
            }) if role == Role::DomainAdmin => Err(LimitsError::RoleUnavailable {
                field: "role",
                role,
            }),
            other => other,
        }
    }
}
