use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;

use super::{Engine, EngineError, EngineEvent};
use crate::api::{
    global_stream, saved_stream, uncategorized_stream, ApiError, ApiRequest, Category,
    StreamContents,
};
use crate::config::WatermarkPolicy;
use crate::feed::{detect_new, normalize_stream, reconcile, FeedItem};

const UNCATEGORIZED_LABEL: &str = "Uncategorized";

/// A copy of one of the caches plus the login state it was read under.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedList {
    pub feeds: Vec<FeedItem>,
    pub is_logged_in: bool,
}

impl Engine {
    // ========================================================================
    // Unread Cache
    // ========================================================================

    /// Rebuild the unread cache from the server.
    ///
    /// The cache is emptied up front. One stream is fetched per active filter
    /// (or the global stream without filters); if any of them fails the pass
    /// is abandoned and the cache stays empty until the next one. New-item
    /// detection runs only with desktop notifications enabled, and a `silent`
    /// pass advances the watermark without announcing anything.
    pub async fn update_feeds(self: &Arc<Self>, silent: bool) -> Result<(), EngineError> {
        let config = self.config().await;
        let (user_id, watermark_at_start) = {
            let mut state = self.state.lock().await;
            state.cache.clear();
            (state.session.user_id.clone(), state.session.last_feed_seen_at)
        };

        let streams = if config.filters_active() {
            config.filters.clone()
        } else {
            vec![global_stream(&user_id.ok_or(EngineError::NotLoggedIn)?)]
        };
        let max_items = config.max_number_of_feeds();
        let ranked = if config.oldest_feeds_first {
            "oldest"
        } else {
            "newest"
        };

        let mut pending: FuturesUnordered<_> = streams
            .iter()
            .enumerate()
            .map(|(index, stream)| {
                let request = ApiRequest::get(&["streams", stream.as_str(), "contents"])
                    .query("unreadOnly", true)
                    .query("ranked", ranked)
                    .query("count", max_items);
                async move { (index, self.execute_json::<StreamContents>(&request).await) }
            })
            .collect();

        let mut pages: Vec<Option<StreamContents>> = vec![None; streams.len()];
        while let Some((index, result)) = pending.next().await {
            match result {
                Ok(contents) => pages[index] = Some(contents),
                Err(err) => {
                    tracing::debug!(stream = %streams[index], error = %err, "Feed pass abandoned");
                    return Err(err.into());
                }
            }
        }

        let merged = pages
            .into_iter()
            .flatten()
            .flat_map(|page| normalize_stream(page, config.show_full_feed_content))
            .collect();
        let cache = reconcile(merged, max_items, config.oldest_feeds_first);

        let fresh = {
            let mut state = self.state.lock().await;
            let fresh = if config.show_desktop_notifications {
                let baseline = match config.watermark_policy {
                    WatermarkPolicy::Monotonic => state.session.last_feed_seen_at,
                    WatermarkPolicy::PassSnapshot => watermark_at_start,
                };
                let (fresh, watermark) = detect_new(&cache, baseline);
                state.session.last_feed_seen_at = watermark;
                self.persist(&state.session).await;
                fresh
            } else {
                Vec::new()
            };
            state.cache = cache;
            fresh
        };

        tracing::debug!(streams = streams.len(), new = fresh.len(), "Feeds updated");

        if fresh.is_empty() {
            return Ok(());
        }
        if !silent {
            self.emit(EngineEvent::NewFeedsDetected {
                many: fresh.len() == max_items,
                feeds: fresh,
            });
        }
        if config.play_sound {
            self.emit(EngineEvent::PlaySound);
        }
        Ok(())
    }

    /// Copy of the unread cache, refilled first when empty.
    ///
    /// A refill is silent and runs together with a counter refresh. Refill
    /// failures are logged and yield whatever the cache holds afterwards.
    pub async fn get_feeds(self: &Arc<Self>) -> FeedList {
        let empty = self.state.lock().await.cache.is_empty();
        if empty {
            let (feeds, counter) = tokio::join!(self.update_feeds(true), self.update_counter());
            if let Err(err) = feeds {
                tracing::debug!(error = %err, "Silent feed refill failed");
            }
            if let Err(err) = counter {
                tracing::debug!(error = %err, "Counter refresh failed");
            }
        }

        let state = self.state.lock().await;
        FeedList {
            feeds: state.cache.clone(),
            is_logged_in: state.is_logged_in,
        }
    }

    /// Mark entries read on the server.
    ///
    /// [`EngineEvent::FeedsRemoved`] goes out immediately. Only once the
    /// server accepts the marker are the entries dropped from the cache and
    /// [`EngineEvent::FeedsMarkedRead`] and [`EngineEvent::CountDecremented`]
    /// sent.
    pub async fn mark_as_read(self: &Arc<Self>, entry_ids: Vec<String>) -> Result<(), EngineError> {
        self.emit(EngineEvent::FeedsRemoved(entry_ids.clone()));

        let request = ApiRequest::post(&["markers"]).json(json!({
            "action": "markAsRead",
            "type": "entries",
            "entryIds": entry_ids,
        }));
        self.execute(&request).await?;

        self.state
            .lock()
            .await
            .cache
            .retain(|item| !entry_ids.contains(&item.id));

        let count = entry_ids.len();
        self.emit(EngineEvent::FeedsMarkedRead(entry_ids));
        self.emit(EngineEvent::CountDecremented(count));
        Ok(())
    }

    // ========================================================================
    // Saved Cache
    // ========================================================================

    /// Replace the saved cache with the server's saved stream, in server order.
    pub async fn update_saved_feeds(self: &Arc<Self>) -> Result<(), EngineError> {
        let config = self.config().await;
        let stream = saved_stream(&self.user_id().await?);
        let contents: StreamContents = self
            .execute_json(&ApiRequest::get(&["streams", stream.as_str(), "contents"]))
            .await?;

        self.state.lock().await.saved_cache =
            normalize_stream(contents, config.show_full_feed_content);
        Ok(())
    }

    /// Copy of the saved cache, refetched when empty or when `force` is set.
    pub async fn get_saved_feeds(self: &Arc<Self>, force: bool) -> FeedList {
        let empty = self.state.lock().await.saved_cache.is_empty();
        if empty || force {
            if let Err(err) = self.update_saved_feeds().await {
                tracing::debug!(error = %err, "Saved feeds refresh failed");
            }
        }

        let state = self.state.lock().await;
        FeedList {
            feeds: state.saved_cache.clone(),
            is_logged_in: state.is_logged_in,
        }
    }

    /// Save or unsave an entry.
    ///
    /// The cached item's flag flips right away, before the login check, and is
    /// not rolled back if the server refuses. On success the saved cache is refetched.
    pub async fn set_saved(self: &Arc<Self>, entry_id: &str, saved: bool) -> Result<(), EngineError> {
        if let Some(item) = self
            .state
            .lock()
            .await
            .cache
            .iter_mut()
            .find(|item| item.id == entry_id)
        {
            item.is_saved = saved;
        }

        let tag = saved_stream(&self.user_id().await?);

        let request = if saved {
            ApiRequest::new(Method::PUT, &["tags", tag.as_str()]).json(json!({ "entryId": entry_id }))
        } else {
            ApiRequest::new(Method::DELETE, &["tags", tag.as_str(), entry_id])
        };
        self.execute(&request).await?;

        self.update_saved_feeds().await
    }

    // ========================================================================
    // Categories
    // ========================================================================

    /// The user's categories followed by a synthetic "Uncategorized" entry.
    ///
    /// Logged-out callers get an empty list rather than an error.
    pub async fn get_categories(self: &Arc<Self>) -> Result<Vec<Category>, EngineError> {
        let Ok(user_id) = self.user_id().await else {
            return Ok(Vec::new());
        };

        match self
            .execute_json::<Vec<Category>>(&ApiRequest::get(&["categories"]))
            .await
        {
            Ok(mut categories) => {
                categories.push(Category {
                    id: uncategorized_stream(&user_id),
                    label: UNCATEGORIZED_LABEL.to_string(),
                });
                Ok(categories)
            }
            Err(ApiError::AuthorizationRequired) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }
}
