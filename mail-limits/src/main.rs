use mail_limits::api::{ApiServer, AppState};
use mail_limits::config::Config;
use mail_limits::quota::{LimitsManager, ResourceRegistry};
use mail_limits::store::LimitStore;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = if Path::new(&config_path).exists() {
        Config::load(Some(Path::new(&config_path)))?
    } else {
        Config::load(None)?
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting mail-limits");
    info!("  API listening on: {}", config.server.listen_addr);
    info!("  Database: {}", config.storage.database_url);

    let store = LimitStore::connect(&config.storage.database_url).await?;
    store.init_db().await?;

    let registry = Arc::new(ResourceRegistry::from_config(&config.limits));
    let manager = match store.load().await? {
        Some(state) => {
            info!("Restored {} pool(s) from storage", state.pools.len());
            LimitsManager::from_state(registry, state)
        }
        None => {
            info!("No stored state, starting empty");
            LimitsManager::new(registry)
        }
    };

    let state = AppState {
        manager: Arc::new(manager),
        store: Some(store),
        template: config.template.clone(),
    };
    ApiServer::new(state, config.server.listen_addr.clone())
        .run()
        .await?;

    Ok(())
}
