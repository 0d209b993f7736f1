//! feedwatch: a headless Feedly Cloud sync engine.
//!
//! Polls the Feedly API on a schedule, keeps a deduplicated and
//! capacity-bounded cache of unread entries, computes the unread counter
//! (optionally restricted to selected categories) and keeps the OAuth session
//! alive, recovering from rejected access tokens on its own.
//!
//! Presentation is left to collaborators, which drive the [`engine::Engine`]
//! through its async methods and listen to its [`engine::EngineEvent`]s.

pub mod api;
pub mod config;
pub mod counter;
pub mod engine;
pub mod feed;
pub mod scheduler;
pub mod storage;
pub mod util;
