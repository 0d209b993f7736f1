use chrono::{DateTime, Utc};
use std::collections::HashSet;

use super::item::FeedItem;

/// Drop repeated ids, keeping the last occurrence of each.
///
/// Survivors stay in their original relative order.
pub fn dedup_last_wins(items: Vec<FeedItem>) -> Vec<FeedItem> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut kept: Vec<FeedItem> = items
        .into_iter()
        .rev()
        .filter(|item| seen.insert(item.id.clone()))
        .collect();
    kept.reverse();
    kept
}

/// Stable sort by crawl time. Items without a timestamp sort as the earliest.
pub fn sort_by_crawled(items: &mut [FeedItem], oldest_first: bool) {
    if oldest_first {
        items.sort_by(|a, b| a.crawled_at.cmp(&b.crawled_at));
    } else {
        items.sort_by(|a, b| b.crawled_at.cmp(&a.crawled_at));
    }
}

/// Merge result of a fan-out pass: dedup, sort, then trim to `max_items`.
pub fn reconcile(items: Vec<FeedItem>, max_items: usize, oldest_first: bool) -> Vec<FeedItem> {
    let mut items = dedup_last_wins(items);
    sort_by_crawled(&mut items, oldest_first);
    items.truncate(max_items);
    items
}

/// Items strictly newer than `watermark`, plus the advanced watermark.
///
/// The returned watermark is never earlier than the one passed in. Items
/// without a crawl time are never new.
pub fn detect_new(
    items: &[FeedItem],
    watermark: Option<DateTime<Utc>>,
) -> (Vec<FeedItem>, Option<DateTime<Utc>>) {
    let mut latest = watermark;
    let fresh = items
        .iter()
        .filter(|item| match (item.crawled_at, watermark) {
            (Some(crawled), Some(seen)) => crawled > seen,
            (Some(_), None) => true,
            (None, _) => false,
        })
        .inspect(|item| latest = latest.max(item.crawled_at))
        .cloned()
        .collect();

    (fresh, latest)
}
