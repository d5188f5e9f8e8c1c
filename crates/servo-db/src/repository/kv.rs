//! # Key-Value Repository
//!
//! Whole-value reads and writes against the `kv_store` table. Writes are
//! plain upserts: there is no version column, so the last writer wins.
//!
//! ```text
//! kv_store
//! ┌────────────────────┬──────────────────────────────┬──────────────────┐
//! │ key (PK)           │ value                        │ updated_at       │
//! ├────────────────────┼──────────────────────────────┼──────────────────┤
//! │ humanoid_presets   │ {"Greeting":{"Daumen":10}}   │ 2026-10-18T09:…  │
//! └────────────────────┴──────────────────────────────┴──────────────────┘
//! ```

use chrono::Utc;
use servo_core::{CoreResult, PresetBackend};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

#[derive(Debug, Clone)]
pub struct KvRepository {
    pool: SqlitePool,
}

impl KvRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    /// Inserts or replaces the value under `key`.
    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        let now = Utc::now().to_rfc3339();
        debug!(key, bytes = value.len(), "Writing kv record");

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl PresetBackend for KvRepository {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(KvRepository::get(self, key).await?)
    }

    async fn set(&self, key: &str, value: String) -> CoreResult<()> {
        Ok(KvRepository::set(self, key, &value).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use servo_core::{
        ActuatorSpec, ActuatorStateStore, PresetRemoval, PresetStore, PRESET_RECORD_KEY,
    };

    async fn repo() -> KvRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().kv()
    }

    #[tokio::test]
    async fn test_set_get_overwrite() {
        let kv = repo().await;

        assert_eq!(kv.get("missing").await.unwrap(), None);

        kv.set("k", "one").await.unwrap();
        kv.set("k", "two").await.unwrap();

        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("two"));

        let stamped: Option<String> =
            sqlx::query_scalar("SELECT updated_at FROM kv_store WHERE key = 'k'")
                .fetch_optional(&kv.pool)
                .await
                .unwrap();
        assert!(stamped.is_some());
    }

    #[tokio::test]
    async fn test_backs_preset_store() {
        let kv = repo().await;
        let mut store = ActuatorStateStore::new();
        store.apply_config(vec![(
            "Ellbogen".to_string(),
            ActuatorSpec::new("brick", 0, -90.0, 90.0, 42.5, true),
        )]);

        let presets = PresetStore::new(kv.clone());
        presets.save("Greeting", &store).await.unwrap();

        assert_eq!(presets.list().await.unwrap(), vec!["Greeting"]);
        let raw = KvRepository::get(&kv, PRESET_RECORD_KEY).await.unwrap().unwrap();
        assert_eq!(raw, r#"{"Greeting":{"Ellbogen":42.5}}"#);

        assert_eq!(presets.delete("Greeting").await.unwrap(), PresetRemoval::Removed);
        assert!(presets.list().await.unwrap().is_empty());
    }
}
