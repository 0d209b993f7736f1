use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use super::schema::Database;
use super::types::{FilterSelection, SessionState};

const KEY_ACCESS_TOKEN: &str = "session.access_token";
const KEY_REFRESH_TOKEN: &str = "session.refresh_token";
const KEY_USER_ID: &str = "session.user_id";
const KEY_LAST_FEED_TIME: &str = "session.last_feed_time";
const KEY_LAST_COUNTER_RESET_TIME: &str = "session.last_counter_reset_time";
const KEY_AUTHORIZATION_REQUESTED: &str = "session.authorization_was_requested";
const KEY_FILTERS: &str = "session.filters";
const KEY_FILTERS_ENABLED: &str = "session.filters_enabled";

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

impl Database {
    // ========================================================================
    // Session State Operations
    // ========================================================================

    /// Load the persisted session. Missing keys fall back to `SessionState::default()`.
    ///
    /// Unparseable timestamps are treated as absent rather than failing the load.
    pub async fn load_session(&self) -> Result<SessionState> {
        let rows = self.get_values_by_prefix("session.").await?;
        let mut session = SessionState::default();

        for (key, value) in rows {
            match key.as_str() {
                KEY_ACCESS_TOKEN if !value.is_empty() => {
                    session.access_token = Some(SecretString::from(value));
                }
                KEY_REFRESH_TOKEN if !value.is_empty() => {
                    session.refresh_token = Some(SecretString::from(value));
                }
                KEY_USER_ID if !value.is_empty() => session.user_id = Some(value),
                KEY_LAST_FEED_TIME => session.last_feed_seen_at = parse_millis(&value),
                KEY_LAST_COUNTER_RESET_TIME => {
                    session.last_counter_reset_at = parse_millis(&value).unwrap_or_default();
                }
                KEY_AUTHORIZATION_REQUESTED => {
                    session.authorization_retry_pending = value == "true";
                }
                _ => {}
            }
        }

        Ok(session)
    }

    /// Write every session field in a single transaction.
    pub async fn save_session(&self, session: &SessionState) -> Result<()> {
        let entries = [
            (
                KEY_ACCESS_TOKEN,
                session
                    .access_token
                    .as_ref()
                    .map(|t| t.expose_secret().to_string()),
            ),
            (
                KEY_REFRESH_TOKEN,
                session
                    .refresh_token
                    .as_ref()
                    .map(|t| t.expose_secret().to_string()),
            ),
            (KEY_USER_ID, session.user_id.clone()),
            (
                KEY_LAST_FEED_TIME,
                session
                    .last_feed_seen_at
                    .map(|t| t.timestamp_millis().to_string()),
            ),
            (
                KEY_LAST_COUNTER_RESET_TIME,
                Some(session.last_counter_reset_at.timestamp_millis().to_string()),
            ),
            (
                KEY_AUTHORIZATION_REQUESTED,
                Some(session.authorization_retry_pending.to_string()),
            ),
        ];

        self.write_values(&entries).await
    }

    /// Persisted category filters, or `None` if the user never saved any.
    pub async fn load_filters(&self) -> Result<Option<FilterSelection>> {
        let Some(raw) = self.get_value(KEY_FILTERS).await? else {
            return Ok(None);
        };
        let filters =
            serde_json::from_str(&raw).context("Stored filters are not a JSON array")?;
        let enabled = self
            .get_value(KEY_FILTERS_ENABLED)
            .await?
            .is_some_and(|v| v == "true");

        Ok(Some(FilterSelection { filters, enabled }))
    }

    pub async fn save_filters(&self, selection: &FilterSelection) -> Result<()> {
        let raw = serde_json::to_string(&selection.filters)?;
        self.write_values(&[
            (KEY_FILTERS, Some(raw)),
            (KEY_FILTERS_ENABLED, Some(selection.enabled.to_string())),
        ])
        .await
    }
}
