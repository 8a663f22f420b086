//! Who counts what, and who sits above whom

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::quota::types::{AccountId, DomainId, ResourceId, ResourceKind, Role};

/// An account as seen by the quota core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub role: Role,
    /// Administrative parent (the account that created this one)
    pub parent: Option<AccountId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub name: String,
    /// Account whose pool counts the domain and, by default, everything under it.
    /// `None` once detached: the platform counts it.
    pub owner: Option<AccountId>,
    /// Domain administrators attached to this domain
    pub admins: BTreeSet<AccountId>,
}

/// One concrete object counted against a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub domain: Option<DomainId>,
    /// Account the object belongs to (a user's mailbox, an admin's seat)
    pub holder: Option<AccountId>,
    /// Pool currently counting the object; `None` means the platform
    pub counted_by: Option<AccountId>,
}

/// Capacity carved out of `from`'s pool into `child`'s pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub child: AccountId,
    pub from: AccountId,
    pub amounts: BTreeMap<ResourceKind, u32>,
}

/// Flat, serializable form of the graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub accounts: Vec<Account>,
    pub domains: Vec<Domain>,
    pub resources: Vec<ResourceRecord>,
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, Default)]
pub struct OwnershipGraph {
    accounts: HashMap<AccountId, Account>,
    domains: HashMap<DomainId, Domain>,
    resources: HashMap<ResourceId, ResourceRecord>,
    grants: HashMap<AccountId, Grant>,
}

impl OwnershipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -- accounts ----------------------------------------------------------

    pub fn insert_account(&mut self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn account_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.accounts.get_mut(&id)
    }

    /// Remove an account; its children move up to its parent
    pub fn remove_account(&mut self, id: AccountId) -> Option<Account> {
        let removed = self.accounts.remove(&id)?;

        for account in self.accounts.values_mut() {
            if account.parent == Some(id) {
                account.parent = removed.parent;
            }
        }
        for domain in self.domains.values_mut() {
            domain.admins.remove(&id);
        }
        self.grants.remove(&id);
        for resource in self.resources.values_mut() {
            if resource.holder == Some(id) {
                resource.holder = None;
            }
        }

        Some(removed)
    }

    pub fn children(&self, id: AccountId) -> Vec<AccountId> {
        let mut children: Vec<_> = self
            .accounts
            .values()
            .filter(|a| a.parent == Some(id))
            .map(|a| a.id)
            .collect();
        children.sort();
        children
    }

    /// Administrative ancestors, nearest first; stops on cycles
    pub fn ancestors(&self, id: AccountId) -> Vec<AccountId> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::from([id]);
        let mut cursor = self.account(id).and_then(|a| a.parent);
        while let Some(parent) = cursor {
            if !seen.insert(parent) {
                break;
            }
            chain.push(parent);
            cursor = self.account(parent).and_then(|a| a.parent);
        }
        chain
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    // -- domains -----------------------------------------------------------

    pub fn insert_domain(&mut self, domain: Domain) {
        self.domains.insert(domain.id, domain);
    }

    pub fn domain(&self, id: DomainId) -> Option<&Domain> {
        self.domains.get(&id)
    }

    pub fn domain_mut(&mut self, id: DomainId) -> Option<&mut Domain> {
        self.domains.get_mut(&id)
    }

    pub fn remove_domain(&mut self, id: DomainId) -> Option<Domain> {
        self.domains.remove(&id)
    }

    pub fn domain_by_name(&self, name: &str) -> Option<&Domain> {
        self.domains
            .values()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    pub fn domains_owned_by(&self, owner: AccountId) -> Vec<DomainId> {
        let mut owned: Vec<_> = self
            .domains
            .values()
            .filter(|d| d.owner == Some(owner))
            .map(|d| d.id)
            .collect();
        owned.sort();
        owned
    }

    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.domains.values()
    }

    // -- resources ---------------------------------------------------------

    pub fn insert_resource(&mut self, record: ResourceRecord) {
        self.resources.insert(record.id, record);
    }

    pub fn resource(&self, id: ResourceId) -> Option<&ResourceRecord> {
        self.resources.get(&id)
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> Option<&mut ResourceRecord> {
        self.resources.get_mut(&id)
    }

    pub fn remove_resource(&mut self, id: ResourceId) -> Option<ResourceRecord> {
        self.resources.remove(&id)
    }

    fn select_resources(&self, pred: impl Fn(&ResourceRecord) -> bool) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self
            .resources
            .values()
            .filter(|r| pred(r))
            .map(|r| r.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn resources_counted_by(&self, account: AccountId) -> Vec<ResourceId> {
        self.select_resources(|r| r.counted_by == Some(account))
    }

    pub fn resources_held_by(&self, account: AccountId) -> Vec<ResourceId> {
        self.select_resources(|r| r.holder == Some(account))
    }

    pub fn resources_in_domain(&self, domain: DomainId) -> Vec<ResourceId> {
        self.select_resources(|r| r.domain == Some(domain))
    }

    /// The `domain_admins` seat held by an administrator
    pub fn seat_of(&self, admin: AccountId) -> Option<ResourceId> {
        self.resources
            .values()
            .find(|r| r.kind == ResourceKind::DomainAdmins && r.holder == Some(admin))
            .map(|r| r.id)
    }

    /// Number of live objects of `kind` counted by `account`
    pub fn count_for(&self, account: AccountId, kind: ResourceKind) -> u32 {
        let objects = self
            .resources
            .values()
            .filter(|r| r.kind == kind && r.counted_by == Some(account))
            .count();
        let domains = if kind == ResourceKind::Domains {
            self.domains_owned_by(account).len()
        } else {
            0
        };
        u32::try_from(objects + domains).unwrap_or(u32::MAX)
    }

    // -- grants ------------------------------------------------------------

    pub fn grant(&self, child: AccountId) -> Option<&Grant> {
        self.grants.get(&child)
    }

    pub fn set_grant(&mut self, grant: Grant) {
        if grant.amounts.values().all(|amount| *amount == 0) {
            self.grants.remove(&grant.child);
        } else {
            self.grants.insert(grant.child, grant);
        }
    }

    pub fn take_grant(&mut self, child: AccountId) -> Option<Grant> {
        self.grants.remove(&child)
    }

    /// Children holding capacity carved out of `parent`
    pub fn grants_from(&self, parent: AccountId) -> Vec<AccountId> {
        let mut children: Vec<_> = self
            .grants
            .values()
            .filter(|g| g.from == parent)
            .map(|g| g.child)
            .collect();
        children.sort();
        children
    }

    // -- persistence -------------------------------------------------------

    pub fn to_snapshot(&self) -> GraphSnapshot {
        let mut snapshot = GraphSnapshot {
            accounts: self.accounts.values().cloned().collect(),
            domains: self.domains.values().cloned().collect(),
            resources: self.resources.values().cloned().collect(),
            grants: self.grants.values().cloned().collect(),
        };
        snapshot.accounts.sort_by_key(|a| a.id);
        snapshot.domains.sort_by_key(|d| d.id);
        snapshot.resources.sort_by_key(|r| r.id);
        snapshot.grants.sort_by_key(|g| g.child);
        snapshot
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        OwnershipGraph {
            accounts: snapshot.accounts.into_iter().map(|a| (a.id, a)).collect(),
            domains: snapshot.domains.into_iter().map(|d| (d.id, d)).collect(),
            resources: snapshot.resources.into_iter().map(|r| (r.id, r)).collect(),
            grants: snapshot.grants.into_iter().map(|g| (g.child, g)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(role: Role, parent: Option<AccountId>) -> Account {
        Account {
            id: AccountId::new(),
            role,
            parent,
        }
    }

    #[test]
    fn test_remove_account_reparents_children() {
        let mut graph = OwnershipGraph::new();
        let root = account(Role::SuperAdmin, None);
        let reseller = account(Role::Reseller, Some(root.id));
        let admin = account(Role::DomainAdmin, Some(reseller.id));
        let (root_id, reseller_id, admin_id) = (root.id, reseller.id, admin.id);
        graph.insert_account(root);
        graph.insert_account(reseller);
        graph.insert_account(admin);

        assert_eq!(graph.ancestors(admin_id), vec![reseller_id, root_id]);

        graph.remove_account(reseller_id).unwrap();
        assert_eq!(graph.account(admin_id).unwrap().parent, Some(root_id));
        assert!(graph.remove_account(reseller_id).is_none());
    }

    #[test]
    fn test_ancestors_stop_on_cycle() {
        let mut graph = OwnershipGraph::new();
        let a = AccountId::new();
        let b = AccountId::new();
        graph.insert_account(Account {
            id: a,
            role: Role::Reseller,
            parent: Some(b),
        });
        graph.insert_account(Account {
            id: b,
            role: Role::Reseller,
            parent: Some(a),
        });
        assert_eq!(graph.ancestors(a), vec![b]);
    }

    #[test]
    fn test_resource_queries() {
        let mut graph = OwnershipGraph::new();
        let owner = AccountId::new();
        let admin = AccountId::new();
        let domain = DomainId::new();
        graph.insert_domain(Domain {
            id: domain,
            name: "example.com".to_string(),
            owner: Some(owner),
            admins: BTreeSet::new(),
        });

        let seat = ResourceRecord {
            id: ResourceId::new(),
            kind: ResourceKind::DomainAdmins,
            domain: Some(domain),
            holder: Some(admin),
            counted_by: Some(owner),
        };
        let mailbox = ResourceRecord {
            id: ResourceId::new(),
            kind: ResourceKind::Mailboxes,
            domain: Some(domain),
            holder: None,
            counted_by: Some(owner),
        };
        let seat_id = seat.id;
        graph.insert_resource(seat);
        graph.insert_resource(mailbox);

        assert_eq!(graph.resources_counted_by(owner).len(), 2);
        assert_eq!(graph.resources_in_domain(domain).len(), 2);
        assert_eq!(graph.resources_held_by(admin), vec![seat_id]);
        assert_eq!(graph.seat_of(admin), Some(seat_id));
        assert_eq!(graph.count_for(owner, ResourceKind::Mailboxes), 1);
        assert_eq!(graph.count_for(owner, ResourceKind::Domains), 1);
        assert_eq!(
            graph.domain_by_name("EXAMPLE.com").map(|d| d.id),
            Some(domain)
        );
    }

    #[test]
    fn test_empty_grant_is_dropped() {
        let mut graph = OwnershipGraph::new();
        let child = AccountId::new();
        let from = AccountId::new();
        graph.set_grant(Grant {
            child,
            from,
            amounts: BTreeMap::from([(ResourceKind::Mailboxes, 1)]),
        });
        assert_eq!(graph.grants_from(from), vec![child]);

        graph.set_grant(Grant {
            child,
            from,
            amounts: BTreeMap::from([(ResourceKind::Mailboxes, 0)]),
        });
        assert!(graph.grant(child).is_none());
    }

    #[test]
    fn test_snapshot_roundtrip_through_json() {
        let mut graph = OwnershipGraph::new();
        let reseller = account(Role::Reseller, None);
        let admin = account(Role::DomainAdmin, Some(reseller.id));
        graph.set_grant(Grant {
            child: admin.id,
            from: reseller.id,
            amounts: BTreeMap::from([(ResourceKind::MailboxAliases, 2)]),
        });
        graph.insert_account(reseller);
        graph.insert_account(admin);

        let json = serde_json::to_string(&graph.to_snapshot()).unwrap();
        let restored = OwnershipGraph::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.to_snapshot(), graph.to_snapshot());
    }
}
