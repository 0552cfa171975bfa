// Database access layer (SQLite via sqlx): a key-value store of session snapshots.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// A persisted session row. `data` is the JSON-encoded session record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredSession {
    pub key: String,
    pub data: String,
    pub updated_at: String,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        // Every connection to `:memory:` opens its own empty database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                key TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Sessions ──────────────────────────────────────────────────────

    /// Load the stored JSON for `key`, if any.
    pub async fn load(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query_as::<_, StoredSession>(
            "SELECT key, data, updated_at FROM sessions WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.data))
    }

    /// Insert or replace the JSON stored under `key`.
    pub async fn save(&self, key: &str, data: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sessions (key, data, updated_at) VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_sessions(&self) -> Result<Vec<StoredSession>, sqlx::Error> {
        let rows = sqlx::query_as::<_, StoredSession>(
            "SELECT key, data, updated_at FROM sessions ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_load_missing_key() {
        let db = test_db().await;
        assert!(db.load("guild-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_overwrite() {
        let db = test_db().await;

        db.save("guild-1", r#"{"v":1}"#).await.unwrap();
        assert_eq!(db.load("guild-1").await.unwrap().as_deref(), Some(r#"{"v":1}"#));

        db.save("guild-1", r#"{"v":2}"#).await.unwrap();
        assert_eq!(db.load("guild-1").await.unwrap().as_deref(), Some(r#"{"v":2}"#));

        let sessions = db.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].key, "guild-1");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let db = test_db().await;

        db.save("a", "{}").await.unwrap();
        db.save("b", "{}").await.unwrap();
        assert!(db.delete("a").await.unwrap());
        assert!(!db.delete("a").await.unwrap());

        let keys: Vec<String> = db
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, vec!["b"]);
    }
}
