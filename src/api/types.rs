//! Wire types for the Feedly Cloud v3 endpoints the engine consumes.
//!
//! Everything optional on the server side is `Option` or `#[serde(default)]`
//! here; one odd entry must not fail a whole stream page.
use serde::Deserialize;

/// `GET streams/{id}/contents`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamContents {
    #[serde(default)]
    pub items: Vec<Entry>,
}

/// A raw stream entry, normalized into a [`crate::feed::FeedItem`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Entry {
    pub id: String,
    pub title: Option<String>,
    pub origin: Option<Origin>,
    #[serde(default)]
    pub alternate: Vec<Link>,
    pub content: Option<TextContent>,
    pub summary: Option<TextContent>,
    /// Milliseconds since the Unix epoch
    pub crawled: Option<i64>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub title: Option<String>,
    pub html_url: Option<String>,
    pub stream_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextContent {
    #[serde(default)]
    pub content: String,
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub id: String,
    pub label: Option<String>,
}

/// A user category; also the element type of `GET categories`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, serde::Serialize)]
pub struct Category {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

/// `GET markers/counts`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnreadCounts {
    #[serde(default)]
    pub unreadcounts: Vec<UnreadCount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnreadCount {
    pub id: String,
    #[serde(default)]
    pub count: i64,
}

/// Element of `GET subscriptions`
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub categories: Vec<Category>,
}

/// `GET profile`
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub id: String,
}

/// `POST auth/token`, for both grant types.
///
/// Refresh responses carry no refresh token.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Feedly user id
    pub id: Option<String>,
    pub expires_in: Option<u64>,
}
