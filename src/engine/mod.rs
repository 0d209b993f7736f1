//! The sync and session engine.
//!
//! One [`Engine`] owns the session, both caches and the schedule. It is shared
//! as `Arc<Engine>`; every operation is an async method on it and reports
//! back to UI collaborators through [`EngineEvent`]s on a broadcast channel.
//!
//! Operations are split by concern:
//!
//! - `gateway` - every API call, with authorization-failure recovery
//! - `token` - authorization code capture, token exchange and refresh
//! - `feeds` - unread and saved caches, mark-as-read, save toggle
//! - `counter` - unread count publication
//! - `schedule` - recurring refresh timers
//! - `commands` - collaborator-facing entry points (clicks, popup, filters)
//!
//! Engine state sits behind one async mutex that is never held across a
//! network call.

mod commands;
mod counter;
mod feeds;
mod gateway;
mod schedule;
mod token;

pub use commands::MouseButton;
pub use feeds::FeedList;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use url::Url;

use crate::api::{ApiClient, ApiError, AuthError, ClientCredentials};
use crate::config::{Config, ConfigError};
use crate::feed::FeedItem;
use crate::scheduler::Scheduler;
use crate::storage::{Database, SessionState};
use crate::util::OriginError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    #[error("Refusing to open URL: {0}")]
    InvalidUrl(#[from] OriginError),

    /// A redirect arrived without a matching `begin_authorization` call
    #[error("No authorization is in progress")]
    NoPendingAuthorization,

    /// Stream ids cannot be built before the user id is known
    #[error("Not logged in")]
    NotLoggedIn,
}

// ============================================================================
// Events
// ============================================================================

/// Popup presentation options pushed when the popup opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceConfig {
    pub ability_save_feeds: bool,
    pub popup_font_size: u32,
    pub show_categories: bool,
}

/// Everything the engine tells UI collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    FeedsUpdated {
        feeds: Vec<FeedItem>,
        is_logged_in: bool,
        is_saved_feeds: bool,
    },
    /// Already zeroed when counter display is disabled
    UnreadCountUpdated { count: i64, is_logged_in: bool },
    FeedsMarkedRead(Vec<String>),
    /// Sent before the mark-as-read request completes
    FeedsRemoved(Vec<String>),
    CountDecremented(usize),
    LoaderShown,
    InterfaceConfigPushed(InterfaceConfig),
    UpdateAnimation { running: bool },
    /// `many` is set when the batch filled the whole cache, meaning there
    /// may be more new items than reported.
    NewFeedsDetected { feeds: Vec<FeedItem>, many: bool },
    PlaySound,
    OpenUrl { url: String, in_background: bool },
    ClosePopup,
}

// ============================================================================
// Engine State
// ============================================================================

#[derive(Default)]
struct EngineState {
    session: SessionState,
    cache: Vec<FeedItem>,
    saved_cache: Vec<FeedItem>,
    is_logged_in: bool,
    /// `state` value of the authorization URL awaiting its redirect
    pending_authorization: Option<String>,
}

/// Point-in-time view of the session for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub is_logged_in: bool,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub user_id: Option<String>,
    pub authorization_retry_pending: bool,
    pub last_feed_seen_at: Option<chrono::DateTime<chrono::Utc>>,
    pub cached_feeds: usize,
    pub cached_saved_feeds: usize,
}

fn duplicate_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    config: RwLock<Arc<Config>>,
    db: Database,
    client: ApiClient,
    state: Mutex<EngineState>,
    scheduler: Mutex<Scheduler>,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    /// Build an engine from persisted state.
    ///
    /// Filters saved through [`Engine::save_filters`] take precedence over
    /// the config file.
    pub async fn new(
        mut config: Config,
        db: Database,
        client: ApiClient,
    ) -> Result<Arc<Self>, EngineError> {
        config.api_base()?;
        let session = db.load_session().await?;
        if let Some(selection) = db.load_filters().await? {
            config.filters = selection.filters;
            config.is_filters_enabled = selection.enabled;
        }

        tracing::debug!(
            has_token = session.has_access_token(),
            user_id = ?session.user_id,
            "Loaded session"
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Arc::new(Self {
            config: RwLock::new(Arc::new(config)),
            db,
            client,
            state: Mutex::new(EngineState {
                session,
                ..Default::default()
            }),
            scheduler: Mutex::new(Scheduler::new()),
            events,
        }))
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine: headless commands ignore events.
        let _ = self.events.send(event);
    }

    /// Configuration snapshot; a cycle keeps using the one it started with.
    pub async fn config(&self) -> Arc<Config> {
        Arc::clone(&*self.config.read().await)
    }

    async fn api_base(&self) -> Result<Url, ApiError> {
        self.config()
            .await
            .api_base()
            .map_err(|e| ApiError::InvalidBase(e.to_string()))
    }

    async fn access_token(&self) -> Option<SecretString> {
        self.state
            .lock()
            .await
            .session
            .access_token
            .as_ref()
            .map(duplicate_secret)
    }

    async fn user_id(&self) -> Result<String, EngineError> {
        self.state
            .lock()
            .await
            .session
            .user_id
            .clone()
            .ok_or(EngineError::NotLoggedIn)
    }

    /// Write the session through to the store. Failures are logged only.
    async fn persist(&self, session: &SessionState) {
        if let Err(e) = self.db.save_session(session).await {
            tracing::warn!(error = %e, "Failed to persist session state");
        }
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state.lock().await.is_logged_in
    }

    pub async fn session_summary(&self) -> SessionSummary {
        let state = self.state.lock().await;
        SessionSummary {
            is_logged_in: state.is_logged_in,
            has_access_token: state.session.has_access_token(),
            has_refresh_token: state.session.refresh_token.is_some(),
            user_id: state.session.user_id.clone(),
            authorization_retry_pending: state.session.authorization_retry_pending,
            last_feed_seen_at: state.session.last_feed_seen_at,
            cached_feeds: state.cache.len(),
            cached_saved_feeds: state.saved_cache.len(),
        }
    }

    /// Copy of the unread cache as it stands, without refilling it.
    pub async fn cached_feeds(&self) -> Vec<FeedItem> {
        self.state.lock().await.cache.clone()
    }

    pub async fn cached_saved_feeds(&self) -> Vec<FeedItem> {
        self.state.lock().await.saved_cache.clone()
    }
}

fn credentials(config: &Config) -> ClientCredentials<'_> {
    ClientCredentials {
        client_id: &config.client_id,
        client_secret: config.client_secret.as_deref(),
        redirect_uri: &config.redirect_uri,
    }
}
