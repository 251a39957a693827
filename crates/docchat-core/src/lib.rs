//! docchat-core: message lifecycle and document indexing orchestration
//!
//! This crate drives a document-aware chat backend: it sends user messages
//! and observes their asynchronous processing jobs, waits for uploaded
//! documents to be indexed, reconciles the authoritative transcript and
//! replays new assistant replies progressively into an observable store.

pub mod api;
pub mod config;
pub mod error;
pub mod http;
pub mod indexing;
pub mod models;
pub mod notice;
pub mod paths;
pub mod poller;
pub mod reveal;
pub mod session;
pub mod store;
pub mod tree;

#[cfg(test)]
mod test_support;

pub use api::Backend;
pub use config::Config;
pub use error::Error;
pub use error::Result;
pub use http::HttpBackend;
pub use notice::Notice;
pub use session::ChatSession;
pub use store::{ConversationStore, StoreEvent};

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "docchat";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "DOCCHAT".to_string()
}
