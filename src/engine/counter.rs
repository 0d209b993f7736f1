use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{Engine, EngineError, EngineEvent};
use crate::api::{global_stream, ApiRequest, Subscription, UnreadCounts};
use crate::counter::{filtered_unread_count, global_unread_count};

impl Engine {
    /// Fetch unread counts and publish the aggregate.
    ///
    /// With counter reset on click enabled, only entries newer than the last
    /// reset are counted. With it disabled the reset time goes back to the
    /// epoch on every call.
    pub async fn update_counter(self: &Arc<Self>) -> Result<i64, EngineError> {
        let config = self.config().await;
        let (user_id, newer_than) = {
            let mut state = self.state.lock().await;
            let reset_at = state.session.last_counter_reset_at;
            let newer_than = if config.reset_counter_on_click {
                (reset_at > DateTime::<Utc>::UNIX_EPOCH).then(|| reset_at.timestamp_millis())
            } else {
                if reset_at != DateTime::<Utc>::UNIX_EPOCH {
                    state.session.last_counter_reset_at = DateTime::<Utc>::UNIX_EPOCH;
                    self.persist(&state.session).await;
                }
                None
            };
            (state.session.user_id.clone(), newer_than)
        };

        let mut request = ApiRequest::get(&["markers", "counts"]);
        if let Some(millis) = newer_than {
            request = request.query("newerThan", millis);
        }
        let counts: UnreadCounts = self.execute_json(&request).await?;

        let count = if config.filters_active() {
            let subscriptions: Vec<Subscription> = self
                .execute_json(&ApiRequest::get(&["subscriptions"]))
                .await?;
            filtered_unread_count(&counts, &subscriptions, &config.filters)
        } else {
            user_id
                .map(|uid| global_unread_count(&counts, &global_stream(&uid)))
                .unwrap_or(0)
        };

        tracing::debug!(count = count, filtered = config.filters_active(), "Unread count updated");
        self.publish_unread_count(count, true).await;
        Ok(count)
    }

    /// Publish a count, zeroed when counter display is off.
    pub(crate) async fn publish_unread_count(&self, count: i64, is_logged_in: bool) {
        let count = if self.config().await.show_counter {
            count
        } else {
            0
        };
        self.emit(EngineEvent::UnreadCountUpdated {
            count,
            is_logged_in,
        });
    }

    /// Zero the counter and start counting from now, if counter reset on
    /// click is enabled. Otherwise does nothing.
    pub async fn reset_counter(&self) {
        if !self.config().await.reset_counter_on_click {
            return;
        }

        let is_logged_in = {
            let mut state = self.state.lock().await;
            state.session.last_counter_reset_at = Utc::now();
            self.persist(&state.session).await;
            state.is_logged_in
        };
        self.publish_unread_count(0, is_logged_in).await;
    }
}
