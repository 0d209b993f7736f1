//! Configuration file parser for ~/.config/feedwatch/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
//!
//! Numeric options are stored exactly as written and clamped by accessor
//! methods, so `max_number_of_feeds = 0` in the file reads back as 1.
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
}

// ============================================================================
// Option Enums
// ============================================================================

/// What a toolbar button click does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickAction {
    ShowPopup,
    OpenSite,
    Update,
    None,
}

/// How the new-item watermark advances when sync passes overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPolicy {
    /// Compare against the watermark current at reconciliation time and never
    /// move it backwards.
    #[default]
    Monotonic,
    /// Compare against the watermark captured when the pass started and store
    /// that pass's maximum, even if a concurrent pass already went further.
    PassSnapshot,
}

// ============================================================================
// Configuration Struct
// ============================================================================

const MIN_UPDATE_INTERVAL_MINUTES: u64 = 10;
const MAX_UPDATE_INTERVAL_MINUTES: u64 = 7 * 24 * 60;
const MIN_NUMBER_OF_FEEDS: usize = 1;
const MIN_POPUP_FONT_SIZE: u32 = 70;
const MAX_POPUP_FONT_SIZE: u32 = 150;

const FEEDLY_API_HOST: &str = "cloud.feedly.com/v3";
const FEEDLY_SITE_HOST: &str = "feedly.com";

/// Engine configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
///
/// Custom Debug impl masks `client_secret`.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Polling interval in minutes (floored at 10 by [`Config::update_interval`]).
    pub update_interval_minutes: u64,

    /// Cache capacity (floored at 1 by [`Config::max_number_of_feeds`]).
    pub max_number_of_feeds: usize,

    /// Popup font size in percent, clamped to 70..=150.
    pub popup_font_size: u32,

    pub mark_read_on_click: bool,
    pub show_desktop_notifications: bool,
    pub show_full_feed_content: bool,
    pub open_site_on_icon_click: bool,
    pub show_counter: bool,
    pub play_sound: bool,
    pub oldest_feeds_first: bool,
    pub ability_save_feeds: bool,
    pub use_secure_connection: bool,
    pub reset_counter_on_click: bool,
    pub close_popup_on_news_open: bool,
    pub close_popup_when_no_feeds: bool,
    pub show_categories: bool,

    /// Restrict feeds and the unread counter to `filters`.
    pub is_filters_enabled: bool,

    /// Category stream ids used when filtering is enabled.
    pub filters: Vec<String>,

    pub left_click: ClickAction,
    pub right_click: ClickAction,
    pub middle_click: ClickAction,

    /// OAuth client credentials.
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,

    /// Overrides the Feedly API base URL (tests and self-hosted proxies).
    pub api_base_url: Option<String>,

    pub watermark_policy: WatermarkPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_interval_minutes: MIN_UPDATE_INTERVAL_MINUTES,
            max_number_of_feeds: 20,
            popup_font_size: 100,
            mark_read_on_click: true,
            show_desktop_notifications: true,
            show_full_feed_content: false,
            open_site_on_icon_click: false,
            show_counter: true,
            play_sound: false,
            oldest_feeds_first: false,
            ability_save_feeds: false,
            use_secure_connection: true,
            reset_counter_on_click: false,
            close_popup_on_news_open: false,
            close_popup_when_no_feeds: false,
            show_categories: false,
            is_filters_enabled: false,
            filters: Vec::new(),
            left_click: ClickAction::ShowPopup,
            right_click: ClickAction::OpenSite,
            middle_click: ClickAction::Update,
            client_id: String::new(),
            client_secret: None,
            redirect_uri: "http://localhost".to_string(),
            api_base_url: None,
            watermark_policy: WatermarkPolicy::Monotonic,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("update_interval_minutes", &self.update_interval_minutes)
            .field("max_number_of_feeds", &self.max_number_of_feeds)
            .field("popup_font_size", &self.popup_font_size)
            .field("mark_read_on_click", &self.mark_read_on_click)
            .field("show_desktop_notifications", &self.show_desktop_notifications)
            .field("show_full_feed_content", &self.show_full_feed_content)
            .field("open_site_on_icon_click", &self.open_site_on_icon_click)
            .field("show_counter", &self.show_counter)
            .field("play_sound", &self.play_sound)
            .field("oldest_feeds_first", &self.oldest_feeds_first)
            .field("ability_save_feeds", &self.ability_save_feeds)
            .field("use_secure_connection", &self.use_secure_connection)
            .field("reset_counter_on_click", &self.reset_counter_on_click)
            .field("close_popup_on_news_open", &self.close_popup_on_news_open)
            .field("close_popup_when_no_feeds", &self.close_popup_when_no_feeds)
            .field("show_categories", &self.show_categories)
            .field("is_filters_enabled", &self.is_filters_enabled)
            .field("filters", &self.filters)
            .field("left_click", &self.left_click)
            .field("right_click", &self.right_click)
            .field("middle_click", &self.middle_click)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("redirect_uri", &self.redirect_uri)
            .field("api_base_url", &self.api_base_url)
            .field("watermark_policy", &self.watermark_policy)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: &'static [&'static str] = &[
        "update_interval_minutes",
        "max_number_of_feeds",
        "popup_font_size",
        "mark_read_on_click",
        "show_desktop_notifications",
        "show_full_feed_content",
        "open_site_on_icon_click",
        "show_counter",
        "play_sound",
        "oldest_feeds_first",
        "ability_save_feeds",
        "use_secure_connection",
        "reset_counter_on_click",
        "close_popup_on_news_open",
        "close_popup_when_no_feeds",
        "show_categories",
        "is_filters_enabled",
        "filters",
        "left_click",
        "right_click",
        "middle_click",
        "client_id",
        "client_secret",
        "redirect_uri",
        "api_base_url",
        "watermark_policy",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.api_base()?;
        tracing::info!(
            interval = config.update_interval(),
            max_feeds = config.max_number_of_feeds(),
            filters = config.filters.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    // ========================================================================
    // Clamped Accessors
    // ========================================================================

    /// Polling interval in minutes, between 10 and one week.
    pub fn update_interval(&self) -> u64 {
        self.update_interval_minutes
            .clamp(MIN_UPDATE_INTERVAL_MINUTES, MAX_UPDATE_INTERVAL_MINUTES)
    }

    /// [`Config::update_interval`] as a timer period.
    pub fn update_period(&self) -> Duration {
        Duration::from_secs(self.update_interval() * 60)
    }

    /// Cache capacity, never below 1.
    pub fn max_number_of_feeds(&self) -> usize {
        self.max_number_of_feeds.max(MIN_NUMBER_OF_FEEDS)
    }

    pub fn popup_font_size(&self) -> u32 {
        self.popup_font_size
            .clamp(MIN_POPUP_FONT_SIZE, MAX_POPUP_FONT_SIZE)
    }

    /// True when feeds and counts should be restricted to category filters.
    pub fn filters_active(&self) -> bool {
        self.is_filters_enabled && !self.filters.is_empty()
    }

    /// True when something downstream consumes live feed data between popup opens.
    pub fn needs_live_feeds(&self) -> bool {
        self.show_desktop_notifications || self.play_sound || !self.open_site_on_icon_click
    }

    // ========================================================================
    // Endpoints
    // ========================================================================

    fn scheme(&self) -> &'static str {
        if self.use_secure_connection {
            "https"
        } else {
            "http"
        }
    }

    /// Base URL every API endpoint is resolved against.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let raw = match &self.api_base_url {
            Some(base) => base.clone(),
            None => format!("{}://{}", self.scheme(), FEEDLY_API_HOST),
        };
        Ok(Url::parse(&raw)?)
    }

    /// Public web reader URL opened by the "open site" click action.
    pub fn site_url(&self) -> String {
        format!("{}://{}", self.scheme(), FEEDLY_SITE_HOST)
    }
}

// ============================================================================
// Tests
// ============================================================================
