use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LimitsError;

/// Countable resource kinds tracked per account
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Domains,
    DomainAliases,
    Mailboxes,
    MailboxAliases,
    DomainAdmins,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Domains,
        ResourceKind::DomainAliases,
        ResourceKind::Mailboxes,
        ResourceKind::MailboxAliases,
        ResourceKind::DomainAdmins,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domains => "domains",
            Self::DomainAliases => "domain_aliases",
            Self::Mailboxes => "mailboxes",
            Self::MailboxAliases => "mailbox_aliases",
            Self::DomainAdmins => "domain_admins",
        }
    }

    /// Form field name used by the admin layer (e.g. `mailboxes_limit`)
    pub fn limit_name(&self) -> &'static str {
        match self {
            Self::Domains => "domains_limit",
            Self::DomainAliases => "domain_aliases_limit",
            Self::Mailboxes => "mailboxes_limit",
            Self::MailboxAliases => "mailbox_aliases_limit",
            Self::DomainAdmins => "domain_admins_limit",
        }
    }
}

/// Accepts a kind name with or without the `_limit` suffix
impl FromStr for ResourceKind {
    type Err = LimitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        let name = name.strip_suffix("_limit").unwrap_or(&name);
        match name {
            "domains" => Ok(Self::Domains),
            "domain_aliases" => Ok(Self::DomainAliases),
            "mailboxes" => Ok(Self::Mailboxes),
            "mailbox_aliases" => Ok(Self::MailboxAliases),
            "domain_admins" => Ok(Self::DomainAdmins),
            _ => Err(LimitsError::InvalidRequest(format!(
                "Unknown resource kind: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account roles, highest privilege first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    SuperAdmin,
    Reseller,
    DomainAdmin,
    SimpleUser,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::SuperAdmin,
        Role::Reseller,
        Role::DomainAdmin,
        Role::SimpleUser,
    ];

    /// Group name as shown in role choices
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "SuperAdmins",
            Self::Reseller => "Resellers",
            Self::DomainAdmin => "DomainAdmins",
            Self::SimpleUser => "SimpleUsers",
        }
    }
}

/// Accepts the role name or its group name (`DomainAdmins`)
impl FromStr for Role {
    type Err = LimitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "superadmin" | "superadmins" => Ok(Self::SuperAdmin),
            "reseller" | "resellers" => Ok(Self::Reseller),
            "domainadmin" | "domainadmins" => Ok(Self::DomainAdmin),
            "simpleuser" | "simpleusers" => Ok(Self::SimpleUser),
            _ => Err(LimitsError::InvalidRequest(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(s: &str) -> Option<Self> {
                Uuid::parse_str(s.trim()).ok().map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Account identifier; also the global lock order for pools
    AccountId
);
id_type!(DomainId);
id_type!(
    /// Identifier of one concrete mailbox, alias, domain alias or admin seat
    ResourceId
);

/// One counter for one resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub kind: ResourceKind,
    /// Objects currently counted against this limit
    pub current: u32,
    /// Capacity the pool may use itself (ignored when unlimited)
    pub maximum: u32,
    pub unlimited: bool,
}

impl Limit {
    pub fn new(kind: ResourceKind, maximum: u32) -> Self {
        Limit {
            kind,
            current: 0,
            maximum,
            unlimited: false,
        }
    }

    pub fn unlimited(kind: ResourceKind) -> Self {
        Limit {
            kind,
            current: 0,
            maximum: 0,
            unlimited: true,
        }
    }

    /// Free capacity, `None` when unlimited
    pub fn available(&self) -> Option<u32> {
        if self.unlimited {
            None
        } else {
            Some(self.maximum.saturating_sub(self.current))
        }
    }

    /// Check whether `count` more objects fit
    pub fn has_room(&self, count: u32) -> bool {
        match self.available() {
            None => true,
            Some(free) => free >= count,
        }
    }

    pub fn snapshot(&self) -> LimitSnapshot {
        LimitSnapshot {
            current: self.current,
            maximum: self.maximum,
            unlimited: self.unlimited,
        }
    }
}

/// Read-only view of a limit, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSnapshot {
    pub current: u32,
    pub maximum: u32,
    pub unlimited: bool,
}

impl LimitSnapshot {
    /// `(current, maximum)` pair
    pub fn pair(&self) -> (u32, u32) {
        (self.current, self.maximum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parses_limit_names() {
        assert_eq!("mailboxes".parse::<ResourceKind>().ok(), Some(ResourceKind::Mailboxes));
        assert_eq!(
            "mailbox_aliases_limit".parse::<ResourceKind>().ok(),
            Some(ResourceKind::MailboxAliases)
        );
        assert_eq!(
            "Domain_Admins".parse::<ResourceKind>().ok(),
            Some(ResourceKind::DomainAdmins)
        );
        assert!(matches!(
            "quota".parse::<ResourceKind>(),
            Err(LimitsError::InvalidRequest(msg)) if msg == "Unknown resource kind: quota"
        ));
    }

    #[test]
    fn test_kind_names_match_serde() {
        for kind in ResourceKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.limit_name(), format!("{}_limit", kind.as_str()));
        }
    }

    #[test]
    fn test_role_parses_group_names() {
        assert_eq!("DomainAdmins".parse::<Role>().ok(), Some(Role::DomainAdmin));
        assert_eq!("reseller".parse::<Role>().ok(), Some(Role::Reseller));
        assert_eq!("SimpleUsers".parse::<Role>().ok(), Some(Role::SimpleUser));
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::DomainAdmin.to_string(), "DomainAdmins");
    }

    #[test]
    fn test_limit_room() {
        let mut limit = Limit::new(ResourceKind::Mailboxes, 2);
        assert!(limit.has_room(2));
        limit.current = 2;
        assert!(!limit.has_room(1));
        assert_eq!(limit.available(), Some(0));

        let unlimited = Limit::unlimited(ResourceKind::Domains);
        assert!(unlimited.has_room(u32::MAX));
        assert_eq!(unlimited.available(), None);
    }

    #[test]
    fn test_account_id_parse() {
        let id = AccountId::new();
        assert_eq!(AccountId::parse(&id.to_string()), Some(id));
        assert_eq!(AccountId::parse("not-a-uuid"), None);
    }
}
