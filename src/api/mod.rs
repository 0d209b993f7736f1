//! Feedly Cloud API access.
//!
//! - [`client`] - request primitive classifying outcomes into success,
//!   authorization-required and other failures
//! - [`auth`] - OAuth grant builders and redirect parsing
//! - [`types`] - wire types
//!
//! Stream ids are scoped to the user id returned at login.

mod auth;
mod client;
mod types;

pub use auth::{extract_code, AuthError, ClientCredentials};
pub use client::{decode, ApiClient, ApiError, ApiRequest};
pub use types::{
    Category, Entry, Link, Origin, Profile, StreamContents, Subscription, Tag, TextContent,
    TokenResponse, UnreadCount, UnreadCounts,
};

/// Every unread entry across all subscriptions.
pub fn global_stream(user_id: &str) -> String {
    format!("user/{}/category/global.all", user_id)
}

/// Entries the user tagged as saved.
pub fn saved_stream(user_id: &str) -> String {
    format!("user/{}/tag/global.saved", user_id)
}

/// Subscriptions outside any category.
pub fn uncategorized_stream(user_id: &str) -> String {
    format!("user/{}/category/global.uncategorized", user_id)
}
