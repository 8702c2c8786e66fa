//! Store types for persisted messages and read-side aggregates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of senders reported in [`Stats::messages_per_sender`].
pub const TOP_SENDERS_LIMIT: i64 = 10;

// =============================================================================
// Messages
// =============================================================================

/// An inbound SMS-like message, as accepted from the webhook.
///
/// Ordering for listing is `(ts, message_id)` ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Idempotency key, unique across the store
    pub message_id: String,
    /// Sender endpoint
    pub from: String,
    /// Recipient endpoint
    pub to: String,
    /// Caller-supplied ISO-8601 event timestamp
    pub ts: String,
    /// Optional message body
    pub text: Option<String>,
}

/// A message together with its server-assigned persistence time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(flatten)]
    pub message: Message,
    /// RFC 3339 UTC timestamp set once at insertion
    pub created_at: String,
}

/// Classification of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record did not exist and was written
    Created,
    /// A record with the same `message_id` already existed; nothing changed
    Duplicate,
}

impl InsertOutcome {
    /// Label used in structured logs.
    pub fn as_str(self) -> &'static str {
        match self {
            InsertOutcome::Created => "created",
            InsertOutcome::Duplicate => "duplicate",
        }
    }

    pub fn is_duplicate(self) -> bool {
        matches!(self, InsertOutcome::Duplicate)
    }
}

/// Optional listing filters, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    /// Exact sender match
    pub from: Option<String>,
    /// Inclusive lower bound on `ts`
    pub since: Option<String>,
    /// Case-insensitive substring of `text`
    pub q: Option<String>,
}

impl MessageFilter {
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.since.is_none() && self.q.is_none()
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Message count for a single sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderCount {
    pub from: String,
    pub count: i64,
}

/// Aggregate snapshot over the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_messages: i64,
    /// Number of distinct senders
    pub senders_count: i64,
    /// Top senders by count descending, ties broken by sender ascending
    pub messages_per_sender: Vec<SenderCount>,
    pub first_message_ts: Option<String>,
    pub last_message_ts: Option<String>,
}

// =============================================================================
// Errors
// =============================================================================

/// Storage failure unrelated to the uniqueness constraint.
///
/// A duplicate insert is never reported through this type.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("write task did not complete: {0}")]
    Interrupted(#[from] tokio::task::JoinError),
}
