//! OAuth request builders for the authorization-code and refresh-token grants.
//!
//! Browser navigation belongs to the caller: this module only builds the
//! consent URL and parses the redirect the browser lands on.
use serde_json::json;
use thiserror::Error;
use url::Url;

use super::client::{ApiError, ApiRequest};

const SCOPE: &str = "https://cloud.feedly.com/subscriptions";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to parse redirect URL: {0}")]
    InvalidRedirect(#[from] url::ParseError),
    /// Redirect belongs to another authorization attempt (or none)
    #[error("Redirect state does not match the pending authorization")]
    StateMismatch,
    #[error("No 'code' parameter in redirect")]
    MissingCode,
}

/// OAuth client identity sent with both token grants.
#[derive(Debug, Clone)]
pub struct ClientCredentials<'a> {
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
    pub redirect_uri: &'a str,
}

impl ClientCredentials<'_> {
    fn grant(&self, mut body: serde_json::Value) -> ApiRequest {
        body["client_id"] = json!(self.client_id);
        if let Some(secret) = self.client_secret {
            body["client_secret"] = json!(secret);
        }
        ApiRequest::post(&["auth", "token"]).json(body)
    }

    /// `POST auth/token` exchanging a captured authorization code.
    pub fn code_grant(&self, code: &str) -> ApiRequest {
        self.grant(json!({
            "code": code,
            "redirect_uri": self.redirect_uri,
            "grant_type": "authorization_code",
        }))
    }

    /// `POST auth/token` exchanging a refresh token for a new access token.
    pub fn refresh_grant(&self, refresh_token: &str) -> ApiRequest {
        self.grant(json!({
            "refresh_token": refresh_token,
            "grant_type": "refresh_token",
        }))
    }

    /// Consent page URL (`auth/auth`) the user must visit.
    pub fn authorization_url(&self, base: &Url, state: &str) -> Result<Url, ApiError> {
        ApiRequest::get(&["auth", "auth"])
            .query("response_type", "code")
            .query("client_id", self.client_id)
            .query("redirect_uri", self.redirect_uri)
            .query("scope", SCOPE)
            .query("state", state)
            .url(base)
    }
}

/// Pull the authorization code out of the redirect URL, checking `state`.
pub fn extract_code(redirect: &str, expected_state: &str) -> Result<String, AuthError> {
    let url = Url::parse(redirect)?;

    let state_matches = url
        .query_pairs()
        .any(|(k, v)| k == "state" && v == expected_state);
    if !state_matches {
        return Err(AuthError::StateMismatch);
    }

    url.query_pairs()
        .find(|(k, v)| k == "code" && !v.is_empty())
        .map(|(_, v)| v.into_owned())
        .ok_or(AuthError::MissingCode)
}
