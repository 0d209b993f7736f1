use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::{Engine, EngineEvent};
use crate::api::{decode, ApiError, ApiRequest};

impl Engine {
    /// Send an API call with the current access token.
    ///
    /// Success clears the authorization guard and marks the session active.
    /// The first authorization failure while the guard is clear takes the
    /// session offline and starts a token refresh; later ones only report
    /// [`ApiError::AuthorizationRequired`] until the guard clears. Any other
    /// failure is logged and returned as is.
    pub(crate) async fn execute(self: &Arc<Self>, request: &ApiRequest) -> Result<Vec<u8>, ApiError> {
        let base = self.api_base().await?;
        let token = self.access_token().await;

        match self.client.send(&base, request, token.as_ref()).await {
            Ok(body) => {
                self.set_active().await;
                Ok(body)
            }
            Err(ApiError::AuthorizationRequired) => {
                tracing::debug!(endpoint = %request.endpoint(), "Authorization required");
                self.recover_authorization().await;
                Err(ApiError::AuthorizationRequired)
            }
            Err(err) => {
                tracing::warn!(endpoint = %request.endpoint(), error = %err, "API request failed");
                Err(err)
            }
        }
    }

    pub(crate) async fn execute_json<T: DeserializeOwned>(
        self: &Arc<Self>,
        request: &ApiRequest,
    ) -> Result<T, ApiError> {
        let body = self.execute(request).await?;
        decode(&body).inspect_err(|err| {
            tracing::warn!(endpoint = %request.endpoint(), error = %err, "Malformed API response");
        })
    }

    async fn set_active(&self) {
        let mut state = self.state.lock().await;
        state.is_logged_in = true;
        if state.session.authorization_retry_pending {
            state.session.authorization_retry_pending = false;
            self.persist(&state.session).await;
        }
    }

    async fn recover_authorization(self: &Arc<Self>) {
        let first = {
            let mut state = self.state.lock().await;
            if state.session.authorization_retry_pending {
                false
            } else {
                state.session.authorization_retry_pending = true;
                self.persist(&state.session).await;
                true
            }
        };

        if first {
            tracing::info!("Access token rejected, refreshing");
            self.set_inactive().await;
            self.spawn_refresh();
        }
    }

    /// Logged-out presentation: no animation, zero count, empty cache, no timers.
    pub(crate) async fn set_inactive(&self) {
        self.emit(EngineEvent::UpdateAnimation { running: false });
        {
            let mut state = self.state.lock().await;
            state.cache.clear();
            state.is_logged_in = false;
        }
        self.publish_unread_count(0, false).await;
        self.stop_schedule().await;
    }
}
