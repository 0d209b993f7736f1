use chrono::{DateTime, Utc};
use secrecy::SecretString;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another engine instance has locked the database
    #[error("Another instance of feedwatch appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, mapping lock contention to `InstanceLocked`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if Self::is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }

    /// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) as worded by SQLite.
    pub(crate) fn is_lock_message(message: &str) -> bool {
        const LOCK_MARKERS: [&str; 5] = [
            "database is locked",
            "database table is locked",
            "sqlite_busy",
            "sqlite_locked",
            "unable to open database file",
        ];
        let message = message.to_lowercase();
        LOCK_MARKERS.iter().any(|marker| message.contains(marker))
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Tokens, identity and bookkeeping timestamps for one engine.
///
/// Tokens are wrapped in [`SecretString`] so they never show up in `Debug`
/// output or logs.
#[derive(Debug, Default)]
pub struct SessionState {
    pub access_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub user_id: Option<String>,
    /// Set while a token refresh triggered by an authorization failure is outstanding.
    pub authorization_retry_pending: bool,
    /// Newest `crawled` time already reported as new.
    pub last_feed_seen_at: Option<DateTime<Utc>>,
    /// Only unread entries newer than this are counted when counter reset is on.
    /// The Unix epoch means "no bound".
    pub last_counter_reset_at: DateTime<Utc>,
}

impl SessionState {
    pub fn has_access_token(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Category filter choice saved from a UI collaborator; overrides the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSelection {
    pub filters: Vec<String>,
    pub enabled: bool,
}
