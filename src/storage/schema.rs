use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

/// Path that selects a private in-memory store.
const MEMORY_PATH: &str = ":memory:";

/// Bumped whenever `migrate` learns a new step.
const SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const UPSERT: &str = r#"
    INSERT INTO session_state (key, value, updated_at)
    VALUES (?, ?, datetime('now'))
    ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
"#;

// ============================================================================
// Database
// ============================================================================

/// Durable key/value store backing the engine's session state.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the store at `path` and bring its schema up
    /// to date. `":memory:"` gives a throwaway store shared by the pool.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another engine instance
    /// holds the database. Returns `DatabaseError::Migration` if the schema
    /// could not be upgraded and `DatabaseError::Other` for anything else.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        if path != MEMORY_PATH {
            restrict_file_permissions(Path::new(path));
        }

        let options = connect_options(path).map_err(DatabaseError::from_sqlx)?;
        // Session writes are tiny and serialized by the engine; two connections suffice.
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if DatabaseError::is_lock_message(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Apply every schema step newer than the stored `user_version`, in one
    /// transaction. Re-running on an up-to-date store is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&mut *tx)
            .await?;
        if version >= SCHEMA_VERSION {
            return Ok(());
        }

        if version < 1 {
            // Keys use dotted convention: session.access_token, session.filters, etc.
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS session_state (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
            "#,
            )
            .execute(&mut *tx)
            .await?;
        }

        // PRAGMA takes no bind parameters
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(from = version, to = SCHEMA_VERSION, "Session store migrated");
        Ok(())
    }

    // ========================================================================
    // Key/Value Operations
    // ========================================================================

    /// Get a single value by key, or `None` if not set.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM session_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.write_values(&[(key, Some(value.to_string()))]).await
    }

    /// Get all values whose key starts with `prefix`, ordered by key.
    pub async fn get_values_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM session_state WHERE substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Upsert and delete a batch of keys in one transaction.
    ///
    /// `None` values delete the key.
    pub async fn write_values(&self, entries: &[(&str, Option<String>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            write_value(&mut tx, key, value.as_deref()).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

async fn write_value(tx: &mut Transaction<'_, Sqlite>, key: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => {
            sqlx::query(UPSERT)
                .bind(key)
                .bind(value)
                .execute(&mut **tx)
                .await?;
        }
        None => {
            sqlx::query("DELETE FROM session_state WHERE key = ?")
                .bind(key)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

fn connect_options(path: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    let options = if path == MEMORY_PATH {
        SqliteConnectOptions::from_str("sqlite::memory:")?
    } else {
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
    };
    Ok(options.busy_timeout(BUSY_TIMEOUT))
}

/// Tokens live in this file: keep it user-only. A missing file is created
/// with mode 0600 before SQLite opens it; failures are left for SQLite to report.
#[cfg(unix)]
fn restrict_file_permissions(path: &Path) {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    if path.exists() {
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to restrict session store permissions");
        }
        return;
    }

    let parent_exists = path.parent().is_some_and(Path::exists);
    if parent_exists {
        let _ = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path);
    }
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) {}
