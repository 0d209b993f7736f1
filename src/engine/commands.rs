//! Entry points for UI collaborators: popup, toolbar clicks, filter editing.
use std::sync::Arc;

use super::{Engine, EngineError, EngineEvent, InterfaceConfig};
use crate::config::{ClickAction, Config};
use crate::storage::FilterSelection;
use crate::util::validate_url_for_open;

/// Toolbar button that was clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl Engine {
    /// Popup asks for a feed list, regular or saved.
    ///
    /// An empty regular list closes the popup instead, when configured to and
    /// the popup did not ask to stay open.
    pub async fn request_feeds(self: &Arc<Self>, saved: bool, keep_open: bool) {
        self.emit(EngineEvent::LoaderShown);

        if saved {
            let list = self.get_saved_feeds(false).await;
            self.emit(EngineEvent::FeedsUpdated {
                feeds: list.feeds,
                is_logged_in: list.is_logged_in,
                is_saved_feeds: true,
            });
            return;
        }

        let list = self.get_feeds().await;
        let config = self.config().await;
        if list.feeds.is_empty() && config.close_popup_when_no_feeds && !keep_open {
            self.emit(EngineEvent::ClosePopup);
        } else {
            self.emit(EngineEvent::FeedsUpdated {
                feeds: list.feeds,
                is_logged_in: list.is_logged_in,
                is_saved_feeds: false,
            });
        }
    }

    /// Popup became visible: loader, presentation options, then the feeds.
    pub async fn popup_shown(self: &Arc<Self>) {
        self.emit(EngineEvent::LoaderShown);

        let config = self.config().await;
        self.emit(EngineEvent::InterfaceConfigPushed(InterfaceConfig {
            ability_save_feeds: config.ability_save_feeds,
            popup_font_size: config.popup_font_size(),
            show_categories: config.show_categories,
        }));

        let list = self.get_feeds().await;
        self.emit(EngineEvent::FeedsUpdated {
            feeds: list.feeds,
            is_logged_in: list.is_logged_in,
            is_saved_feeds: false,
        });
    }

    /// Open an entry's link.
    ///
    /// An unsaved entry is marked read when `mark_read_on_click` is on. A
    /// foreground open closes the popup when `close_popup_on_news_open` is on.
    pub async fn open_feed(
        self: &Arc<Self>,
        url: &str,
        in_background: bool,
        entry_id: Option<&str>,
        is_saved: bool,
    ) -> Result<(), EngineError> {
        let url = validate_url_for_open(url).map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Refusing to open URL");
            EngineError::InvalidUrl(e)
        })?;
        let config = self.config().await;

        self.emit(EngineEvent::OpenUrl {
            url: url.to_string(),
            in_background,
        });
        if !in_background && config.close_popup_on_news_open {
            self.emit(EngineEvent::ClosePopup);
        }

        match entry_id {
            Some(id) if config.mark_read_on_click && !is_saved => {
                self.mark_as_read(vec![id.to_string()]).await
            }
            _ => Ok(()),
        }
    }

    /// Run the action configured for `button`.
    pub async fn handle_click(self: &Arc<Self>, button: MouseButton) -> Result<(), EngineError> {
        let config = self.config().await;
        let action = match button {
            MouseButton::Left => config.left_click,
            MouseButton::Right => config.right_click,
            MouseButton::Middle => config.middle_click,
        };
        tracing::debug!(button = ?button, action = ?action, "Toolbar click");
        self.run_click_action(action).await
    }

    pub async fn run_click_action(self: &Arc<Self>, action: ClickAction) -> Result<(), EngineError> {
        match action {
            ClickAction::ShowPopup => self.reset_counter().await,
            ClickAction::OpenSite => {
                self.open_site().await?;
                self.reset_counter().await;
            }
            ClickAction::Update => self.update_now().await,
            ClickAction::None => {}
        }
        Ok(())
    }

    /// The web reader when logged in, the consent page otherwise.
    async fn open_site(self: &Arc<Self>) -> Result<(), EngineError> {
        if !self.is_logged_in().await {
            self.begin_authorization().await?;
            return Ok(());
        }

        let config = self.config().await;
        self.emit(EngineEvent::OpenUrl {
            url: config.site_url(),
            in_background: false,
        });
        if config.close_popup_on_news_open {
            self.emit(EngineEvent::ClosePopup);
        }
        Ok(())
    }

    /// Manual refresh with the update animation running until the counter
    /// is back.
    pub async fn update_now(self: &Arc<Self>) {
        self.emit(EngineEvent::UpdateAnimation { running: true });

        let counter = async {
            if let Err(err) = self.update_counter().await {
                tracing::debug!(error = %err, "Manual counter update failed");
            }
            self.emit(EngineEvent::UpdateAnimation { running: false });
        };
        let (_, feeds, saved) = tokio::join!(
            counter,
            self.update_feeds(false),
            self.update_saved_feeds()
        );

        if let Err(err) = feeds {
            tracing::debug!(error = %err, "Manual feed update failed");
        }
        if let Err(err) = saved {
            tracing::debug!(error = %err, "Manual saved feeds update failed");
        }
    }

    /// Persist a filter selection, apply it and re-initialize.
    pub async fn save_filters(self: &Arc<Self>, selection: FilterSelection) -> Result<(), EngineError> {
        self.db.save_filters(&selection).await?;

        {
            let mut config = self.config.write().await;
            let mut next = Config::clone(&config);
            next.filters = selection.filters;
            next.is_filters_enabled = selection.enabled;
            *config = Arc::new(next);
        }
        tracing::info!("Filters saved");

        self.initialize().await?;
        Ok(())
    }

    /// Swap in a new configuration and re-initialize.
    ///
    /// The persisted filter selection still wins over the new file's filters.
    pub async fn apply_config(self: &Arc<Self>, mut config: Config) -> Result<(), EngineError> {
        config.api_base()?;
        if let Some(selection) = self.db.load_filters().await? {
            config.filters = selection.filters;
            config.is_filters_enabled = selection.enabled;
        }
        *self.config.write().await = Arc::new(config);

        self.initialize().await?;
        Ok(())
    }

    /// Stop timers ahead of process exit.
    pub async fn shutdown(&self) {
        self.stop_schedule().await;
        tracing::info!("Engine stopped");
    }
}
