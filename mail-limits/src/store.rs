//! SQLite persistence for limit pools and ownership records

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{LimitsError, Result};
use crate::ownership::graph::GraphSnapshot;
use crate::quota::manager::StateSnapshot;
use crate::quota::pool::LimitPool;
use crate::quota::types::{AccountId, Limit, ResourceKind, Role};

/// Stores the quota state so counters survive restarts
#[derive(Clone)]
pub struct LimitStore {
    db: SqlitePool,
    /// Shared by clones: one capture-and-save at a time
    writer: Arc<Mutex<()>>,
}

impl LimitStore {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Open (creating if needed) the database at `url`
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Every connection to an in-memory database sees its own database
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let db = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(db))
    }

    /// Create tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS limit_pools (
                account_id TEXT NOT NULL,
                role TEXT NOT NULL,
                kind TEXT NOT NULL,
                current INTEGER NOT NULL,
                maximum INTEGER NOT NULL,
                unlimited BOOLEAN NOT NULL DEFAULT 0,
                PRIMARY KEY (account_id, kind)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ownership_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                graph TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Replace the stored state in one transaction
    pub async fn save(&self, state: &StateSnapshot) -> Result<()> {
        let graph_json = serde_json::to_string(&state.graph)?;
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM limit_pools")
            .execute(&mut *tx)
            .await?;

        for pool in &state.pools {
            for limit in pool.limits() {
                sqlx::query(
                    r#"
                    INSERT INTO limit_pools (account_id, role, kind, current, maximum, unlimited)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(pool.owner().to_string())
                .bind(pool.role().as_str())
                .bind(limit.kind.as_str())
                .bind(i64::from(limit.current))
                .bind(i64::from(limit.maximum))
                .bind(limit.unlimited)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO ownership_state (id, graph, updated_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET graph = excluded.graph, updated_at = excluded.updated_at
            "#,
        )
        .bind(&graph_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Saved {} pool(s)", state.pools.len());
        Ok(())
    }

    /// Take a snapshot with `capture` and save it while holding the writer lock.
    ///
    /// Concurrent callers are serialized, so the state written last is also the
    /// state captured last and an older snapshot never overwrites a newer one.
    pub async fn save_latest(&self, capture: impl FnOnce() -> StateSnapshot) -> Result<()> {
        let _writer = self.writer.lock().await;
        let state = capture();
        self.save(&state).await
    }

    /// Load the stored state, `None` if nothing was ever saved
    pub async fn load(&self) -> Result<Option<StateSnapshot>> {
        let row = sqlx::query("SELECT graph FROM ownership_state WHERE id = 1")
            .fetch_optional(&self.db)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let graph_json: String = row.try_get("graph")?;
        let graph: GraphSnapshot = serde_json::from_str(&graph_json)?;

        let rows = sqlx::query(
            r#"
            SELECT account_id, role, kind, current, maximum, unlimited
            FROM limit_pools
            ORDER BY account_id, kind
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut grouped: BTreeMap<AccountId, (Role, Vec<Limit>)> = BTreeMap::new();
        for row in rows {
            let account_id: String = row.try_get("account_id")?;
            let role: String = row.try_get("role")?;
            let kind: String = row.try_get("kind")?;

            let account = AccountId::parse(&account_id).ok_or_else(|| {
                LimitsError::InvalidRequest(format!("bad account id in store: {}", account_id))
            })?;
            let role: Role = role
                .parse()
                .map_err(|_| LimitsError::InvalidRequest(format!("bad role in store: {}", role)))?;
            let kind: ResourceKind = kind
                .parse()
                .map_err(|_| LimitsError::InvalidRequest(format!("bad kind in store: {}", kind)))?;

            let limit = Limit {
                kind,
                current: counter(row.try_get("current")?)?,
                maximum: counter(row.try_get("maximum")?)?,
                unlimited: row.try_get("unlimited")?,
            };
            grouped
                .entry(account)
                .or_insert_with(|| (role, Vec::new()))
                .1
                .push(limit);
        }

        let pools = grouped
            .into_iter()
            .map(|(owner, (role, limits))| LimitPool::new(owner, role, limits))
            .collect();

        Ok(Some(StateSnapshot { graph, pools }))
    }
}

fn counter(value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| LimitsError::InvalidRequest(format!("counter out of range in store: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_empty_store() {
        let store = LimitStore::connect("sqlite::memory:").await.unwrap();
        store.init_db().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_init_db_twice() {
        let store = LimitStore::connect("sqlite::memory:").await.unwrap();
        store.init_db().await.unwrap();
        store.init_db().await.unwrap();
    }

    #[tokio::test]
    async fn test_negative_counter_is_rejected() {
        let store = LimitStore::connect("sqlite::memory:").await.unwrap();
        store.init_db().await.unwrap();
        store.save(&StateSnapshot::default()).await.unwrap();

        sqlx::query(
            "INSERT INTO limit_pools (account_id, role, kind, current, maximum, unlimited) VALUES (?, 'Resellers', 'mailboxes', -1, 2, 0)",
        )
        .bind(AccountId::new().to_string())
        .execute(&store.db)
        .await
        .unwrap();

        assert!(matches!(
            store.load().await,
            Err(LimitsError::InvalidRequest(_))
        ));
    }
}
