//! Integration tests for SQLite persistence of the quota state

use mail_limits::config::TemplateConfig;
use mail_limits::quota::{
    DomainTemplate, LimitsManager, ResourceKind, ResourceRegistry, Role, StateSnapshot,
};
use mail_limits::store::LimitStore;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;

/// Helper to create an in-memory store for testing
async fn setup_test_store() -> LimitStore {
    // A single connection, otherwise every connection gets its own empty database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let store = LimitStore::new(pool);
    store.init_db().await.unwrap();
    store
}

fn registry() -> Arc<ResourceRegistry> {
    Arc::new(ResourceRegistry::uniform(2))
}

#[tokio::test]
async fn test_save_and_restore() {
    let store = setup_test_store().await;

    let manager = LimitsManager::new(registry());
    let root = manager.create_account(None, Role::SuperAdmin, None).unwrap();
    let reseller = manager
        .create_account(Some(root), Role::Reseller, None)
        .unwrap();
    let config = TemplateConfig {
        create_domain_admin: true,
        default_aliases: vec!["postmaster".to_string()],
    };
    let outcome = manager
        .create_domain_from_template(reseller, &DomainTemplate::new("example.com", &config))
        .unwrap();
    let admin = outcome.admin.unwrap();
    manager
        .allocate(reseller, admin, &[(ResourceKind::MailboxAliases, 1)])
        .unwrap();

    store.save(&manager.state()).await.unwrap();

    let restored = LimitsManager::from_state(registry(), store.load().await.unwrap().unwrap());
    assert_eq!(restored.state(), manager.state());

    // The restored manager carries on where the first one stopped
    restored.delete_account(admin);
    assert_eq!(
        restored
            .snapshot(reseller, ResourceKind::MailboxAliases)
            .unwrap()
            .pair(),
        (1, 2)
    );
    assert_eq!(
        restored
            .snapshot(reseller, ResourceKind::DomainAdmins)
            .unwrap()
            .pair(),
        (0, 2)
    );
    assert!(restored.audit().is_empty());
}

#[tokio::test]
async fn test_save_replaces_previous_state() {
    let store = setup_test_store().await;

    let manager = LimitsManager::new(registry());
    let root = manager.create_account(None, Role::SuperAdmin, None).unwrap();
    let reseller = manager
        .create_account(Some(root), Role::Reseller, None)
        .unwrap();
    store.save(&manager.state()).await.unwrap();

    manager.delete_account(reseller);
    store.save(&manager.state()).await.unwrap();

    let loaded = store.load().await.unwrap().unwrap();
    assert_eq!(loaded.pools.len(), 1);
    assert_eq!(loaded.graph.accounts.len(), 1);
    assert_eq!(loaded, manager.state());
}

#[tokio::test]
async fn test_unlimited_pool_survives_storage() {
    let store = setup_test_store().await;

    let manager = LimitsManager::new(registry());
    let root = manager.create_account(None, Role::SuperAdmin, None).unwrap();
    store.save(&manager.state()).await.unwrap();

    let loaded: StateSnapshot = store.load().await.unwrap().unwrap();
    let restored = LimitsManager::from_state(registry(), loaded);
    let snapshot = restored.snapshot(root, ResourceKind::Domains).unwrap();
    assert!(snapshot.unlimited);
    assert_eq!(restored.pool(root).unwrap().role(), Role::SuperAdmin);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_keep_latest_state() {
    let store = setup_test_store().await;

    let manager = Arc::new(LimitsManager::new(Arc::new(ResourceRegistry::uniform(16))));
    let root = manager.create_account(None, Role::SuperAdmin, None).unwrap();
    let reseller = manager
        .create_account(Some(root), Role::Reseller, None)
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let store = store.clone();
            tokio::spawn(async move {
                let domain = manager
                    .create_domain(reseller, &format!("d{}.example.com", i))
                    .unwrap();
                manager.create_mailbox(reseller, domain, None).unwrap();
                store.save_latest(|| manager.state()).await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    // Every save captured its snapshot under the writer lock, so the one that
    // committed last holds all eight domains
    let loaded = store.load().await.unwrap().unwrap();
    assert_eq!(loaded, manager.state());
    assert_eq!(loaded.graph.domains.len(), 8);
}
