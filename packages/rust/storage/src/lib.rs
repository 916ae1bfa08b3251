//! libSQL-backed cache of remote call responses.
//!
//! The [`ResponseCache`] maps `(kind, model, prompt_hash)` to the response
//! text of a successful remote call, so re-running over the same profiles
//! does not pay for the same prompts twice.

mod migrations;

use std::path::Path;

use chrono::Utc;
use leadscore_shared::{LeadScoreError, Result};
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Response cache handle wrapping a libSQL database.
///
/// The connection is shared by every scorer task; statements are serialized
/// through a mutex.
pub struct ResponseCache {
    #[allow(dead_code)]
    db: Database,
    conn: Mutex<Connection>,
}

impl ResponseCache {
    /// Open or create the cache database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| LeadScoreError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LeadScoreError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| LeadScoreError::Storage(e.to_string()))?;

        let cache = Self {
            db,
            conn: Mutex::new(conn),
        };
        cache.run_migrations().await?;
        tracing::debug!(path = %path.display(), "response cache opened");
        Ok(cache)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;
        let conn = self.conn.lock().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    LeadScoreError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn schema_version(&self) -> u32 {
        let conn = self.conn.lock().await;
        let result = conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Look up a cached response.
    pub async fn get(&self, kind: &str, model: &str, prompt_hash: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT response FROM response_cache
                 WHERE kind = ?1 AND model = ?2 AND prompt_hash = ?3",
                params![kind, model, prompt_hash],
            )
            .await
            .map_err(|e| LeadScoreError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let response: String = row
                    .get(0)
                    .map_err(|e| LeadScoreError::Storage(e.to_string()))?;
                Ok(Some(response))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(LeadScoreError::Storage(e.to_string())),
        }
    }

    /// Store a response (upserts).
    pub async fn put(&self, kind: &str, model: &str, prompt_hash: &str, response: &str) -> Result<()> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO response_cache (id, kind, model, prompt_hash, response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(kind, model, prompt_hash) DO UPDATE SET
               response = excluded.response,
               created_at = excluded.created_at",
            params![id.as_str(), kind, model, prompt_hash, response, now.as_str()],
        )
        .await
        .map_err(|e| LeadScoreError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Number of cached responses.
    pub async fn len(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM response_cache", params![])
            .await
            .map_err(|e| LeadScoreError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map(|n| n.max(0) as u64)
                .map_err(|e| LeadScoreError::Storage(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(LeadScoreError::Storage(e.to_string())),
        }
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drop every cached response of one kind, or all of them.
    pub async fn clear(&self, kind: Option<&str>) -> Result<u64> {
        let conn = self.conn.lock().await;
        let removed = match kind {
            Some(kind) => {
                conn.execute("DELETE FROM response_cache WHERE kind = ?1", params![kind])
                    .await
            }
            None => conn.execute("DELETE FROM response_cache", params![]).await,
        }
        .map_err(|e| LeadScoreError::Storage(e.to_string()))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_cache() -> ResponseCache {
        let tmp = std::env::temp_dir().join(format!("leadscore_test_{}.db", Uuid::now_v7()));
        ResponseCache::open(&tmp).await.expect("open test cache")
    }

    #[tokio::test]
    async fn open_creates_schema() {
        let cache = test_cache().await;
        assert_eq!(cache.schema_version().await, 1);
        assert!(cache.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("leadscore_test_{}.db", Uuid::now_v7()));
        let first = ResponseCache::open(&tmp).await.expect("first open");
        first.put("grade", "gpt-4o-mini", "h1", "##Score 3").await.unwrap();
        drop(first);

        let second = ResponseCache::open(&tmp).await.expect("second open");
        assert_eq!(second.schema_version().await, 1);
        assert_eq!(
            second.get("grade", "gpt-4o-mini", "h1").await.unwrap().as_deref(),
            Some("##Score 3")
        );
    }

    #[tokio::test]
    async fn get_put_roundtrip_and_upsert() {
        let cache = test_cache().await;

        assert!(cache.get("grade", "gpt-4o-mini", "abc").await.unwrap().is_none());

        cache.put("grade", "gpt-4o-mini", "abc", "first").await.unwrap();
        cache.put("grade", "gpt-4o-mini", "abc", "second").await.unwrap();
        assert_eq!(
            cache.get("grade", "gpt-4o-mini", "abc").await.unwrap().as_deref(),
            Some("second")
        );
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn key_includes_kind_and_model() {
        let cache = test_cache().await;
        cache.put("grade", "gpt-4o-mini", "abc", "graded").await.unwrap();

        assert!(cache.get("rescore", "gpt-4o-mini", "abc").await.unwrap().is_none());
        assert!(cache.get("grade", "gpt-4o", "abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_by_kind() {
        let cache = test_cache().await;
        cache.put("grade", "m", "a", "1").await.unwrap();
        cache.put("search", "m", "a", "2").await.unwrap();

        assert_eq!(cache.clear(Some("search")).await.unwrap(), 1);
        assert_eq!(cache.len().await.unwrap(), 1);
        assert_eq!(cache.clear(None).await.unwrap(), 1);
        assert!(cache.is_empty().await.unwrap());
    }
}
