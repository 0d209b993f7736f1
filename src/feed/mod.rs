//! Feed items and the reconciliation pipeline.
//!
//! - `item` - the normalized [`FeedItem`] handed to UI collaborators
//! - `normalize` - raw API entries to [`FeedItem`]s
//! - `reconcile` - dedup, ordering, capacity trim and "new since last check"
//!
//! # Example
//!
//! ```
//! use feedwatch::feed::{reconcile, FeedItem};
//! use chrono::DateTime;
//!
//! let items = vec![
//!     FeedItem::new("1", DateTime::from_timestamp_millis(100)),
//!     FeedItem::new("2", DateTime::from_timestamp_millis(200)),
//!     FeedItem::new("1", DateTime::from_timestamp_millis(150)),
//! ];
//! let cache = reconcile(items, 10, false);
//! assert_eq!(cache.len(), 2);
//! assert_eq!(cache[0].id, "2");
//! ```

mod item;
mod normalize;
mod reconcile;

pub use item::{FeedItem, ItemCategory, TextDirection};
pub use normalize::{normalize_entry, normalize_stream};
pub use reconcile::{dedup_last_wins, detect_new, reconcile, sort_by_crawled};
