//! Message store backed by SQLite.
//!
//! This module provides:
//! - Message and aggregate types shared with the web layer
//! - `MessageStore`, an async pool-backed store whose `insert` is idempotent
//!   on `message_id`
//!
//! ## Idempotency
//!
//! ```text
//! INSERT ... → ok                → Created
//!            → unique violation  → Duplicate
//!            → anything else     → StorageError
//! ```

pub mod sqlite;
pub mod types;

pub use sqlite::MessageStore;
pub use types::{
    InsertOutcome, Message, MessageFilter, SenderCount, Stats, StorageError, StoredMessage,
    TOP_SENDERS_LIMIT,
};
