use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::{ConfigStore, Credential, CredentialStore, ROLE_MAPPINGS_KEY};
use crate::authz::RoleMappingConfig;
use crate::errors::{AppError, AppResult};

/// SQLite-backed document and credential store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_document(&self, key: &str) -> AppResult<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT value FROM documents WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("value");
                let value = serde_json::from_str(&raw)
                    .map_err(|err| AppError::internal(format!("document {key} is not valid JSON: {err}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Writes the document and returns its new version. The version is also
    /// stamped into the document's top-level `version` field in the same statement.
    pub async fn put_document(&self, key: &str, value: &serde_json::Value) -> AppResult<u32> {
        let now = Utc::now();
        let raw = serde_json::to_string(value).map_err(|err| AppError::internal(err.to_string()))?;

        let version: i64 = sqlx::query_scalar(
            "INSERT INTO documents (key, value, version, updated_at) VALUES (?, json_set(?, '$.version', 1), 1, ?) \
             ON CONFLICT(key) DO UPDATE SET \
                 value = json_set(excluded.value, '$.version', documents.version + 1), \
                 version = documents.version + 1, \
                 updated_at = excluded.updated_at \
             RETURNING version",
        )
        .bind(key)
        .bind(raw)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(version.max(0) as u32)
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn load_role_mappings(&self) -> AppResult<RoleMappingConfig> {
        let Some(value) = self.get_document(ROLE_MAPPINGS_KEY).await? else {
            return Ok(RoleMappingConfig::default());
        };

        serde_json::from_value(value)
            .map_err(|err| AppError::internal(format!("role mapping record is invalid: {err}")))
    }

    async fn save_role_mappings(&self, config: &RoleMappingConfig) -> AppResult<u32> {
        let value = serde_json::to_value(config).map_err(|err| AppError::internal(err.to_string()))?;
        self.put_document(ROLE_MAPPINGS_KEY, &value).await
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn find_credential(&self, username: &str) -> AppResult<Option<Credential>> {
        let row = sqlx::query(
            "SELECT username, password_hash, role, created_at, updated_at FROM credentials WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Credential {
            username: row.get("username"),
            password_hash: row.get("password_hash"),
            role: row.get("role"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        }))
    }

    async fn update_password_hash(&self, username: &str, password_hash: &str) -> AppResult<()> {
        let result = sqlx::query("UPDATE credentials SET password_hash = ?, updated_at = ? WHERE username = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(username)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("credential not found"));
        }
        Ok(())
    }

    async fn upsert_credential(&self, username: &str, password_hash: &str, role: &str) -> AppResult<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO credentials (username, password_hash, role, created_at, updated_at) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(username) DO UPDATE SET password_hash = excluded.password_hash, role = excluded.role, updated_at = excluded.updated_at",
        )
        .bind(username)
        .bind(password_hash)
        .bind(role)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqliteConnectOptions;

    async fn store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let opts = SqliteConnectOptions::new()
            .filename(dir.path().join("store.db"))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await.expect("pool");
        sqlx::migrate!().run(&pool).await.expect("migrations");
        (SqliteStore::new(pool), dir)
    }

    #[tokio::test]
    async fn embedded_version_matches_row_version() {
        let (store, _dir) = store().await;
        assert_eq!(store.load_role_mappings().await.expect("load"), RoleMappingConfig::default());

        let config = RoleMappingConfig { version: 41, ..Default::default() };
        assert_eq!(store.save_role_mappings(&config).await.expect("save"), 1);
        assert_eq!(store.save_role_mappings(&config).await.expect("save"), 2);

        let row_version: i64 = sqlx::query_scalar("SELECT version FROM documents WHERE key = ?")
            .bind(ROLE_MAPPINGS_KEY)
            .fetch_one(&store.pool)
            .await
            .expect("row");
        assert_eq!(row_version, 2);
        assert_eq!(store.load_role_mappings().await.expect("load").version, 2);
    }

    #[tokio::test]
    async fn concurrent_saves_get_distinct_versions() {
        let (store, _dir) = store().await;
        let config = RoleMappingConfig::default();

        let (a, b) = tokio::join!(store.save_role_mappings(&config), store.save_role_mappings(&config));
        let mut versions = vec![a.expect("save"), b.expect("save")];
        versions.sort_unstable();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(store.load_role_mappings().await.expect("load").version, 2);
    }
}
