//! Token lifecycle: authorization code capture, code exchange, refresh, logout.
//!
//! The token endpoint is called directly, never through the gateway, so a
//! rejected grant cannot start another recovery.
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use url::Url;

use super::{credentials, Engine, EngineError, EngineEvent};
use crate::api::{decode, extract_code, ApiError, ApiRequest, Profile, TokenResponse};
use crate::scheduler::spawn_detached;

impl Engine {
    async fn request_token(&self, request: &ApiRequest) -> Result<TokenResponse, ApiError> {
        let base = self.api_base().await?;
        let body = self.client.send(&base, request, None).await?;
        decode(&body)
    }

    /// Build the consent URL and remember its `state` for the redirect check.
    ///
    /// Emits [`EngineEvent::OpenUrl`]; navigating there is up to the caller.
    pub async fn begin_authorization(&self) -> Result<Url, EngineError> {
        let config = self.config().await;
        let base = config.api_base()?;
        let state_token = Utc::now().timestamp_millis().to_string();
        let url = credentials(&config).authorization_url(&base, &state_token)?;

        self.state.lock().await.pending_authorization = Some(state_token);
        self.emit(EngineEvent::OpenUrl {
            url: url.to_string(),
            in_background: false,
        });
        Ok(url)
    }

    /// Finish the flow started by [`Engine::begin_authorization`].
    ///
    /// The pending authorization is consumed only by a redirect whose `state`
    /// matches, so a second capture of the same redirect is rejected.
    pub async fn complete_authorization(self: &Arc<Self>, redirect: &str) -> Result<(), EngineError> {
        let code = {
            let mut state = self.state.lock().await;
            let expected = state
                .pending_authorization
                .as_deref()
                .ok_or(EngineError::NoPendingAuthorization)?;
            let code = extract_code(redirect, expected)?;
            state.pending_authorization = None;
            code
        };

        self.exchange_code(&code).await
    }

    /// Trade an authorization code for tokens, then restart the schedule.
    pub async fn exchange_code(self: &Arc<Self>, code: &str) -> Result<(), EngineError> {
        let config = self.config().await;
        let token = self
            .request_token(&credentials(&config).code_grant(code))
            .await?;

        {
            let mut state = self.state.lock().await;
            state.session.access_token = Some(SecretString::from(token.access_token));
            state.session.refresh_token = token.refresh_token.map(SecretString::from);
            state.session.user_id = token.id;
            self.persist(&state.session).await;
        }
        tracing::info!("Authorization code exchanged for tokens");

        self.initialize().await?;
        Ok(())
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Returns `Ok(false)` without touching the network when no refresh token
    /// is stored. The authorization guard is cleared once the exchange
    /// completes, whatever its outcome.
    pub async fn refresh_access_token(self: &Arc<Self>) -> Result<bool, EngineError> {
        let refresh_token = {
            let state = self.state.lock().await;
            state
                .session
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().to_owned())
        };
        let Some(refresh_token) = refresh_token else {
            tracing::debug!("No refresh token stored, staying logged out");
            return Ok(false);
        };

        let config = self.config().await;
        let result = self
            .request_token(&credentials(&config).refresh_grant(&refresh_token))
            .await;

        {
            let mut state = self.state.lock().await;
            if let Ok(token) = &result {
                state.session.access_token = Some(SecretString::from(token.access_token.clone()));
                if token.id.is_some() {
                    state.session.user_id = token.id.clone();
                }
            }
            state.session.authorization_retry_pending = false;
            self.persist(&state.session).await;
        }

        match result {
            Ok(_) => {
                tracing::info!("Access token refreshed");
                self.initialize().await?;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Token refresh failed");
                Err(err.into())
            }
        }
    }

    pub(crate) fn spawn_refresh(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        spawn_detached("token-refresh", async move {
            // Failures are already logged; the next authorization failure retries.
            let _ = engine.refresh_access_token().await;
        });
    }

    /// Resolve the user id if needed, then (re)start the schedule.
    ///
    /// Sessions from older versions may hold a token but no user id; `profile`
    /// fills it in. If that lookup fails the schedule stays stopped.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), ApiError> {
        let has_user = self.state.lock().await.session.user_id.is_some();
        if !has_user {
            let profile: Profile = self.execute_json(&ApiRequest::get(&["profile"])).await?;
            let mut state = self.state.lock().await;
            state.session.user_id = Some(profile.id);
            self.persist(&state.session).await;
        }

        self.start_schedule().await;
        Ok(())
    }

    /// Forget both tokens and re-initialize, which lands in the logged-out state.
    pub async fn logout(self: &Arc<Self>) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock().await;
            state.session.access_token = None;
            state.session.refresh_token = None;
            self.persist(&state.session).await;
        }
        tracing::info!("Logged out");

        if let Err(err) = self.initialize().await {
            tracing::debug!(error = %err, "Re-initialization after logout failed");
        }
        Ok(())
    }
}
