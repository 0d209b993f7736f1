use chrono::DateTime;
use regex::Regex;
use std::sync::OnceLock;

use super::item::{FeedItem, ItemCategory, TextDirection};
use crate::api::{Entry, StreamContents, TextContent};
use crate::util::{encode_uri, site_origin_or_placeholder};

/// Marker the API leaves inside titles it wrapped in a right-to-left `<div>`.
const RTL_MARKER: &str = "direction:rtl";
const SAVED_TAG_SUFFIX: &str = "global.saved";

fn div_tag_regex() -> &'static Regex {
    static DIV_TAG: OnceLock<Regex> = OnceLock::new();
    DIV_TAG.get_or_init(|| Regex::new(r"(?i)</?div.*?>").expect("div tag pattern is valid"))
}

/// Strip the RTL `<div>` wrapper from a title, reporting its direction.
///
/// Notification collaborators only render plain text, so the wrapper has to go.
fn unwrap_title(raw: Option<String>) -> (Option<String>, Option<TextDirection>) {
    match raw {
        Some(title) if title.contains(RTL_MARKER) => {
            let stripped = div_tag_regex().replace_all(&title, "").into_owned();
            (Some(stripped), Some(TextDirection::Rtl))
        }
        other => (other, None),
    }
}

fn pick_content(
    content: Option<TextContent>,
    summary: Option<TextContent>,
    show_full_content: bool,
) -> (Option<String>, Option<TextDirection>) {
    let full = if show_full_content {
        content.filter(|c| !c.content.is_empty())
    } else {
        None
    };

    match full.or_else(|| summary.filter(|s| !s.content.is_empty())) {
        Some(text) => (
            Some(text.content),
            text.direction.as_deref().map(TextDirection::from_api),
        ),
        None => (None, None),
    }
}

fn favicon_url(blog_url: &str) -> String {
    format!(
        "https://www.google.com/s2/favicons?domain={}&alt=feed",
        blog_url
    )
}

/// Convert one raw entry into a [`FeedItem`].
pub fn normalize_entry(entry: Entry, show_full_content: bool) -> FeedItem {
    let blog_url = site_origin_or_placeholder(
        entry
            .origin
            .as_ref()
            .and_then(|origin| origin.html_url.as_deref()),
    );

    let (title, title_direction) = unwrap_title(entry.title);
    let (blog, blog_title_direction) = unwrap_title(entry.origin.and_then(|origin| origin.title));
    let (content, content_direction) =
        pick_content(entry.content, entry.summary, show_full_content);

    let is_saved = entry
        .tags
        .iter()
        .any(|tag| tag.id.to_ascii_lowercase().ends_with(SAVED_TAG_SUFFIX));

    let categories = entry
        .categories
        .into_iter()
        .map(|category| ItemCategory {
            encoded_id: encode_uri(&category.id),
            id: category.id,
            label: category.label,
        })
        .collect();

    FeedItem {
        id: entry.id,
        title,
        title_direction,
        blog,
        blog_title_direction,
        blog_icon_url: favicon_url(&blog_url),
        blog_url,
        url: entry
            .alternate
            .into_iter()
            .next()
            .map(|link| link.href)
            .unwrap_or_default(),
        content,
        content_direction,
        crawled_at: entry.crawled.and_then(DateTime::from_timestamp_millis),
        is_saved,
        categories,
    }
}

/// Normalize a whole stream page, preserving server order.
pub fn normalize_stream(contents: StreamContents, show_full_content: bool) -> Vec<FeedItem> {
    contents
        .items
        .into_iter()
        .map(|entry| normalize_entry(entry, show_full_content))
        .collect()
}
