//! Unread-count aggregation.
//!
//! With category filters the server reports one count per category, so a
//! subscription filed under several selected categories would be counted once
//! per category. [`filtered_unread_count`] subtracts those extra copies.
use std::collections::HashSet;

use crate::api::{Subscription, UnreadCounts};

/// Count reported for `stream_id`, or 0 if the server did not list it.
pub fn global_unread_count(counts: &UnreadCounts, stream_id: &str) -> i64 {
    counts
        .unreadcounts
        .iter()
        .find(|entry| entry.id == stream_id)
        .map(|entry| entry.count)
        .unwrap_or(0)
}

/// Sum of the filtered categories' counts, corrected for subscriptions that
/// sit in more than one filtered category.
///
/// A subscription in `n > 1` filtered categories contributes `count * (n - 1)`
/// too much to the sum; that excess is subtracted.
pub fn filtered_unread_count(
    counts: &UnreadCounts,
    subscriptions: &[Subscription],
    filters: &[String],
) -> i64 {
    let selected: HashSet<&str> = filters.iter().map(String::as_str).collect();

    let sum: i64 = counts
        .unreadcounts
        .iter()
        .filter(|entry| selected.contains(entry.id.as_str()))
        .map(|entry| entry.count)
        .sum();

    let excess: i64 = subscriptions
        .iter()
        .filter_map(|subscription| {
            let memberships = subscription
                .categories
                .iter()
                .filter(|category| selected.contains(category.id.as_str()))
                .count() as i64;
            if memberships < 2 {
                return None;
            }
            let count = global_unread_count(counts, &subscription.id);
            Some(count * (memberships - 1))
        })
        .sum();

    sum - excess
}
