use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Writing direction hint for titles and content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    Ltr,
    Rtl,
}

impl TextDirection {
    /// Parse the API's `direction` field; anything but `rtl` reads as left-to-right.
    pub fn from_api(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("rtl") {
            TextDirection::Rtl
        } else {
            TextDirection::Ltr
        }
    }
}

/// Category membership of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCategory {
    pub id: String,
    /// `id` escaped for embedding in a link
    pub encoded_id: String,
    pub label: String,
}

/// One normalized unread (or saved) entry.
///
/// Serialized in camelCase, which is the shape UI collaborators consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: String,
    pub title: Option<String>,
    pub title_direction: Option<TextDirection>,
    pub blog: Option<String>,
    pub blog_title_direction: Option<TextDirection>,
    pub blog_url: String,
    pub blog_icon_url: String,
    pub url: String,
    pub content: Option<String>,
    pub content_direction: Option<TextDirection>,
    pub crawled_at: Option<DateTime<Utc>>,
    pub is_saved: bool,
    pub categories: Vec<ItemCategory>,
}

impl FeedItem {
    /// Minimal item, mostly for tests and fixtures.
    pub fn new(id: impl Into<String>, crawled_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            title: None,
            title_direction: None,
            blog: None,
            blog_title_direction: None,
            blog_url: crate::util::ORIGIN_PLACEHOLDER.to_string(),
            blog_icon_url: String::new(),
            url: String::new(),
            content: None,
            content_direction: None,
            crawled_at,
            is_saved: false,
            categories: Vec::new(),
        }
    }
}
