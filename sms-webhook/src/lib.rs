//! SmsHook - signed SMS webhook receiver.
//!
//! This library backs the `smshook-web` binary, which:
//! - Verifies HMAC-SHA256 signatures on inbound webhooks
//! - Validates the message payload
//! - Stores each `message_id` at most once, even under concurrent retries
//! - Serves paginated listings and aggregate statistics
//!
//! ## Architecture
//!
//! ```text
//! Sender → POST /webhook → verify → validate → MessageStore (SQLite) ← GET /messages, /stats
//! ```

pub mod config;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use store::{InsertOutcome, Message, MessageStore, Stats, StorageError, StoredMessage};
pub use web::{router, AppState};
