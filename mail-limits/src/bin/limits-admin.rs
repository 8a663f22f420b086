//! CLI tool for inspecting and adjusting stored quotas
//!
//! Works directly on the database used by the mail-limits server. Do not run
//! it against a database a live server is writing to.
//!
//! # Usage
//!
//! ```bash
//! # Create the platform administrator
//! limits-admin create-account super-admin
//!
//! # Create a reseller under it
//! limits-admin create-account reseller --actor <ROOT_ID>
//!
//! # Give a domain administrator 5 mailboxes out of its reseller's pool
//! limits-admin allocate <RESELLER_ID> <ADMIN_ID> mailboxes_limit=5
//!
//! # Show an account's counters
//! limits-admin show <ACCOUNT_ID>
//! ```

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use mail_limits::config::Config;
use mail_limits::ownership::ReclaimReason;
use mail_limits::quota::{
    AccountId, DomainId, DomainTemplate, LimitsManager, ResourceKind, ResourceRegistry, Role,
};
use mail_limits::store::LimitStore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "limits-admin")]
#[command(about = "Manage mail hosting quotas", long_about = None)]
struct Cli {
    /// Configuration file (reseller defaults, database URL)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL, overrides the configuration (e.g., sqlite://mail-limits.db)
    #[arg(short, long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    CreateAccount {
        /// super-admin, reseller, domain-admin or simple-user
        role: String,
        /// Account performing the creation
        #[arg(long)]
        actor: Option<String>,
        /// Also create the account's mailbox in this domain
        #[arg(long)]
        mailbox_domain: Option<String>,
    },
    /// Delete an account and reclaim its quota
    DeleteAccount { id: String },
    /// Change an account's role
    SetRole {
        id: String,
        role: String,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Create a domain
    CreateDomain {
        actor: String,
        name: String,
        /// Also create the configured administrator and aliases
        #[arg(long)]
        template: bool,
    },
    /// Set the limits a child holds out of its parent's pool
    Allocate {
        parent: String,
        child: String,
        /// kind=value pairs, e.g. mailboxes_limit=5
        limits: Vec<String>,
    },
    /// Give quota back without deleting the account
    Reclaim {
        id: String,
        /// role-changed, or ownership-removed together with --domain
        reason: String,
        #[arg(long)]
        domain: Option<String>,
    },
    /// Show an account's counters
    Show { id: String },
    /// List counters that disagree with the recorded objects
    Audit,
}

fn account_id(s: &str) -> anyhow::Result<AccountId> {
    AccountId::parse(s).ok_or_else(|| anyhow!("invalid account id: {}", s))
}

fn domain_id(s: &str) -> anyhow::Result<DomainId> {
    DomainId::parse(s).ok_or_else(|| anyhow!("invalid domain id: {}", s))
}

fn role(s: &str) -> anyhow::Result<Role> {
    s.replace('-', "")
        .parse()
        .map_err(|_| anyhow!("unknown role: {}", s))
}

fn limit_pair(s: &str) -> anyhow::Result<(ResourceKind, u32)> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected kind=value, got {}", s))?;
    let kind: ResourceKind = name
        .parse()
        .map_err(|_| anyhow!("unknown kind: {}", name))?;
    let value = value
        .parse()
        .with_context(|| format!("invalid value for {}", name))?;
    Ok((kind, value))
}

fn print_pool(manager: &LimitsManager, id: AccountId) -> anyhow::Result<()> {
    let pool = manager.pool(id)?;
    println!("{} ({})", id, pool.role());
    for limit in pool.limits() {
        if limit.unlimited {
            println!("  {:<16} {} / unlimited", limit.kind.as_str(), limit.current);
        } else {
            println!(
                "  {:<16} {} / {}",
                limit.kind.as_str(),
                limit.current,
                limit.maximum
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let db = cli.db.unwrap_or(config.storage.database_url.clone());

    let store = LimitStore::connect(&db).await?;
    store.init_db().await?;

    let registry = Arc::new(ResourceRegistry::from_config(&config.limits));
    let manager = match store.load().await? {
        Some(state) => LimitsManager::from_state(registry, state),
        None => LimitsManager::new(registry),
    };

    match cli.command {
        Commands::CreateAccount {
            role: role_name,
            actor,
            mailbox_domain,
        } => {
            let actor = actor.as_deref().map(account_id).transpose()?;
            let domain = mailbox_domain.as_deref().map(domain_id).transpose()?;
            let id = manager.create_account(actor, role(&role_name)?, domain)?;
            println!("✓ Account {} created", id);
        }
        Commands::DeleteAccount { id } => {
            let summary = manager.delete_account(account_id(&id)?);
            println!(
                "✓ Account {} deleted ({} object(s) re-attributed, {} released)",
                id, summary.reattributed, summary.released
            );
        }
        Commands::SetRole {
            id,
            role: role_name,
            actor,
        } => {
            let actor = actor.as_deref().map(account_id).transpose()?;
            manager.change_role(actor, account_id(&id)?, role(&role_name)?)?;
            println!("✓ Account {} is now {}", id, role_name);
        }
        Commands::CreateDomain {
            actor,
            name,
            template,
        } => {
            let template = if template {
                DomainTemplate::new(name, &config.template)
            } else {
                DomainTemplate {
                    name,
                    create_admin: false,
                    alias_count: 0,
                }
            };
            let outcome = manager.create_domain_from_template(account_id(&actor)?, &template)?;
            println!("✓ Domain {} created ({})", template.name, outcome.domain);
            if let Some(admin) = outcome.admin {
                println!("  administrator: {}", admin);
            }
        }
        Commands::Allocate {
            parent,
            child,
            limits,
        } => {
            let limits = limits
                .iter()
                .map(|s| limit_pair(s))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let child = account_id(&child)?;
            manager.allocate(account_id(&parent)?, child, &limits)?;
            println!("✓ Allocation updated");
            print_pool(&manager, child)?;
        }
        Commands::Reclaim { id, reason, domain } => {
            let reason = match (reason.as_str(), domain) {
                ("deleted", _) => ReclaimReason::Deleted,
                ("role-changed", _) => ReclaimReason::RoleChanged,
                ("ownership-removed", Some(domain)) => ReclaimReason::OwnershipRemoved {
                    domain: domain_id(&domain)?,
                },
                ("ownership-removed", None) => {
                    return Err(anyhow!("ownership-removed needs --domain"))
                }
                (other, _) => return Err(anyhow!("unknown reason: {}", other)),
            };
            let summary = manager.reclaim(account_id(&id)?, reason);
            println!(
                "✓ Reclaimed {} account(s), {} domain(s), {} object(s) re-attributed",
                summary.accounts, summary.domains, summary.reattributed
            );
        }
        Commands::Show { id } => {
            print_pool(&manager, account_id(&id)?)?;
        }
        Commands::Audit => {
            let mismatches = manager.audit();
            if mismatches.is_empty() {
                println!("✓ All counters match");
            }
            for m in mismatches {
                println!(
                    "{} {}: counter {} but {} object(s)",
                    m.account, m.kind, m.counter, m.live_objects
                );
            }
        }
    }

    store.save(&manager.state()).await?;
    Ok(())
}
