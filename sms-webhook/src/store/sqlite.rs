//! SQLite-backed message store.
//!
//! The `messages.message_id` primary key is the only synchronization used for
//! idempotency: concurrent inserts of the same id race inside SQLite, exactly
//! one wins, and the losers observe a unique-constraint violation which is
//! classified as [`InsertOutcome::Duplicate`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{info, warn};

use super::types::{
    InsertOutcome, Message, MessageFilter, SenderCount, Stats, StorageError, StoredMessage,
    TOP_SENDERS_LIMIT,
};

/// How long a writer waits for the database lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_CONNECTIONS: u32 = 10;

const MIGRATIONS: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        message_id  TEXT PRIMARY KEY,
        from_msisdn TEXT NOT NULL,
        to_msisdn   TEXT NOT NULL,
        ts          TEXT NOT NULL,
        text        TEXT,
        text_folded TEXT,
        created_at  TEXT NOT NULL
    );"#,
    "CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages (ts, message_id);",
    "CREATE INDEX IF NOT EXISTS idx_messages_from ON messages (from_msisdn);",
];

/// Async SQLite message store.
///
/// Cloning is cheap; all clones share one connection pool.
#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    /// Connect using a `sqlite:` URL such as `sqlite://data/app.db` or
    /// `sqlite::memory:`. Parent directories of a file database are created.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)?;

        match database_path(database_url) {
            Some(path) => {
                ensure_parent_dir(&path)?;
                Self::from_options(options, false).await
            }
            None => Self::from_options(options, true).await,
        }
    }

    /// Open a file database at `path`, creating it and its parent directories.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        ensure_parent_dir(path)?;
        Self::from_options(SqliteConnectOptions::new().filename(path), false).await
    }

    async fn from_options(
        options: SqliteConnectOptions,
        in_memory: bool,
    ) -> Result<Self, StorageError> {
        let options = options.create_if_missing(true).busy_timeout(BUSY_TIMEOUT);

        let pool = if in_memory {
            // Every connection to :memory: is a separate database, so pin one.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        info!(in_memory = in_memory, "store_connected");

        Ok(Self { pool })
    }

    /// Create the schema if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!(statements = MIGRATIONS.len(), "store_migrated");
        Ok(())
    }

    /// Check that the database answers queries.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Insert a message, classifying the attempt as created or duplicate.
    ///
    /// `created_at` is taken at the moment of the write. An existing record
    /// is never modified, even if the other fields differ.
    pub async fn insert(&self, message: &Message) -> Result<InsertOutcome, StorageError> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let result = sqlx::query(
            r#"
            INSERT INTO messages
                (message_id, from_msisdn, to_msisdn, ts, text, text_folded, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.message_id.as_str())
        .bind(message.from.as_str())
        .bind(message.to.as_str())
        .bind(message.ts.as_str())
        .bind(message.text.as_deref())
        .bind(message.text.as_deref().map(str::to_lowercase))
        .bind(created_at.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "store_insert_failed");
                Err(e.into())
            }
        }
    }

    /// Fetch a single stored message by id.
    pub async fn get(&self, message_id: &str) -> Result<Option<StoredMessage>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT message_id, from_msisdn, to_msisdn, ts, text, created_at
            FROM messages
            WHERE message_id = ?
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(StoredMessage {
            message: message_from_row(&row)?,
            created_at: row.try_get("created_at")?,
        }))
    }

    /// Return one page ordered by `(ts, message_id)` and the filtered total.
    ///
    /// Page and total are separate reads; concurrent inserts may show up in
    /// one and not the other.
    pub async fn list_messages(
        &self,
        limit: u32,
        offset: u32,
        filter: &MessageFilter,
    ) -> Result<(Vec<Message>, i64), StorageError> {
        let mut page = QueryBuilder::<Sqlite>::new(
            "SELECT message_id, from_msisdn, to_msisdn, ts, text FROM messages",
        );
        push_filter(&mut page, filter);
        page.push(" ORDER BY ts ASC, message_id ASC LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(i64::from(offset));

        let rows = page.build().fetch_all(&self.pool).await?;
        let data = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM messages");
        push_filter(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        Ok((data, total))
    }

    /// Aggregate snapshot over all stored messages.
    pub async fn stats(&self) -> Result<Stats, StorageError> {
        let total_messages = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;

        let senders_count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT from_msisdn) FROM messages")
                .fetch_one(&self.pool)
                .await?;

        let sender_rows = sqlx::query(
            r#"
            SELECT from_msisdn, COUNT(*) AS message_count
            FROM messages
            GROUP BY from_msisdn
            ORDER BY message_count DESC, from_msisdn ASC
            LIMIT ?
            "#,
        )
        .bind(TOP_SENDERS_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let messages_per_sender = sender_rows
            .iter()
            .map(|row| -> Result<SenderCount, sqlx::Error> {
                Ok(SenderCount {
                    from: row.try_get("from_msisdn")?,
                    count: row.try_get("message_count")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let bounds = sqlx::query("SELECT MIN(ts) AS first_ts, MAX(ts) AS last_ts FROM messages")
            .fetch_one(&self.pool)
            .await?;

        Ok(Stats {
            total_messages,
            senders_count,
            messages_per_sender,
            first_message_ts: bounds.try_get("first_ts")?,
            last_message_ts: bounds.try_get("last_ts")?,
        })
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("store_closed");
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message, sqlx::Error> {
    Ok(Message {
        message_id: row.try_get("message_id")?,
        from: row.try_get("from_msisdn")?,
        to: row.try_get("to_msisdn")?,
        ts: row.try_get("ts")?,
        text: row.try_get("text")?,
    })
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &MessageFilter) {
    let mut separator = " WHERE ";

    if let Some(from) = &filter.from {
        builder.push(separator).push("from_msisdn = ").push_bind(from.clone());
        separator = " AND ";
    }

    if let Some(since) = &filter.since {
        builder.push(separator).push("ts >= ").push_bind(since.clone());
        separator = " AND ";
    }

    if let Some(q) = &filter.q {
        // instr has no wildcards; folding happens in Rust so it covers non-ASCII.
        builder
            .push(separator)
            .push("instr(text_folded, ")
            .push_bind(q.to_lowercase())
            .push(") > 0");
    }
}

/// Extract the file path from a `sqlite:` URL, `None` for in-memory databases.
fn database_path(database_url: &str) -> Option<PathBuf> {
    let rest = database_url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or_default();

    if path.is_empty() || path == ":memory:" {
        return None;
    }

    Some(PathBuf::from(path))
}

fn ensure_parent_dir(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use tempfile::TempDir;

    async fn temp_store() -> (TempDir, MessageStore) {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::open(&dir.path().join("app.db")).await.unwrap();
        store.migrate().await.unwrap();
        (dir, store)
    }

    fn message(id: &str, from: &str, ts: &str) -> Message {
        Message {
            message_id: id.to_string(),
            from: from.to_string(),
            to: "+14155550100".to_string(),
            ts: ts.to_string(),
            text: Some(format!("body of {}", id)),
        }
    }

    #[test]
    fn test_database_path() {
        assert_eq!(
            database_path("sqlite://data/app.db"),
            Some(PathBuf::from("data/app.db"))
        );
        assert_eq!(
            database_path("sqlite:///var/lib/app.db?mode=rwc"),
            Some(PathBuf::from("/var/lib/app.db"))
        );
        assert_eq!(database_path("sqlite:app.db"), Some(PathBuf::from("app.db")));
        assert_eq!(database_path("sqlite::memory:"), None);
        assert_eq!(database_path("postgres://localhost/db"), None);
    }

    #[tokio::test]
    async fn test_connect_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b").join("app.db");
        let url = format!("sqlite://{}", nested.display());

        let store = MessageStore::connect(&url).await.unwrap();
        store.migrate().await.unwrap();
        store.ping().await.unwrap();

        assert!(nested.exists());
    }

    #[tokio::test]
    async fn test_in_memory_store_keeps_data_across_queries() {
        let store = MessageStore::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        store
            .insert(&message("m1", "+91", "2025-01-01T00:00:00Z"))
            .await
            .unwrap();

        let (_, total) = store
            .list_messages(10, 0, &MessageFilter::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let (_dir, store) = temp_store().await;
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_then_duplicate_keeps_first_record() {
        let (_dir, store) = temp_store().await;
        let first = message("m1", "+91", "2025-01-01T00:00:00Z");

        assert_eq!(store.insert(&first).await.unwrap(), InsertOutcome::Created);
        let stored = store.get("m1").await.unwrap().unwrap();

        let mut retry = first.clone();
        retry.from = "+44".to_string();
        retry.text = Some("changed".to_string());
        assert_eq!(store.insert(&retry).await.unwrap(), InsertOutcome::Duplicate);

        let after = store.get("m1").await.unwrap().unwrap();
        assert_eq!(after, stored);
        assert_eq!(after.message, first);
        assert!(after.created_at.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (_dir, store) = temp_store().await;
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_without_text() {
        let (_dir, store) = temp_store().await;
        let mut msg = message("m1", "+91", "2025-01-01T00:00:00Z");
        msg.text = None;

        store.insert(&msg).await.unwrap();
        let stored = store.get("m1").await.unwrap().unwrap();
        assert_eq!(stored.message.text, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_inserts_create_once() {
        let (_dir, store) = temp_store().await;

        let attempts = (0..16).map(|i| {
            let store = store.clone();
            let mut msg = message("same-id", "+91", "2025-01-01T00:00:00Z");
            msg.text = Some(format!("attempt {}", i));
            tokio::spawn(async move { store.insert(&msg).await })
        });

        let outcomes: Vec<InsertOutcome> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let created = outcomes
            .iter()
            .filter(|o| **o == InsertOutcome::Created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(outcomes.len() - created, 15);

        let (rows, total) = store
            .list_messages(100, 0, &MessageFilter::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].message_id, "same-id");
    }

    #[tokio::test]
    async fn test_list_orders_by_ts_then_id() {
        let (_dir, store) = temp_store().await;
        store.insert(&message("b", "+91", "2025-01-02T00:00:00Z")).await.unwrap();
        store.insert(&message("a", "+91", "2025-01-01T00:00:00Z")).await.unwrap();
        store.insert(&message("c", "+91", "2025-01-03T00:00:00Z")).await.unwrap();
        store.insert(&message("a2", "+91", "2025-01-02T00:00:00Z")).await.unwrap();

        let (rows, total) = store
            .list_messages(10, 0, &MessageFilter::default())
            .await
            .unwrap();

        let ids: Vec<&str> = rows.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "a2", "b", "c"]);
        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn test_list_pagination_last_page() {
        let (_dir, store) = temp_store().await;
        for i in 0..25 {
            let ts = format!("2025-01-01T00:00:{:02}Z", i);
            store.insert(&message(&format!("m{:02}", i), "+91", &ts)).await.unwrap();
        }

        let (rows, total) = store
            .list_messages(10, 20, &MessageFilter::default())
            .await
            .unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(total, 25);
        assert_eq!(rows[0].message_id, "m20");
    }

    #[tokio::test]
    async fn test_list_filters_apply_to_total() {
        let (_dir, store) = temp_store().await;
        let mut hello = message("m1", "+91", "2025-01-01T00:00:00Z");
        hello.text = Some("Hello there".to_string());
        store.insert(&hello).await.unwrap();
        store.insert(&message("m2", "+91", "2025-01-02T00:00:00Z")).await.unwrap();
        store.insert(&message("m3", "+44", "2025-01-03T00:00:00Z")).await.unwrap();

        let by_sender = MessageFilter {
            from: Some("+91".to_string()),
            ..Default::default()
        };
        let (rows, total) = store.list_messages(1, 0, &by_sender).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(total, 2);

        let since = MessageFilter {
            since: Some("2025-01-02T00:00:00Z".to_string()),
            ..Default::default()
        };
        let (rows, _) = store.list_messages(10, 0, &since).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);

        let search = MessageFilter {
            q: Some("hello".to_string()),
            ..Default::default()
        };
        let (rows, total) = store.list_messages(10, 0, &search).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].message_id, "m1");
    }

    #[tokio::test]
    async fn test_text_search_is_literal_and_unicode_case_insensitive() {
        let (_dir, store) = temp_store().await;
        for (id, text) in [("m1", "costs 50 dollars"), ("m2", "ab"), ("m3", "Ünïcode")] {
            let mut msg = message(id, "+91", "2025-01-01T00:00:00Z");
            msg.text = Some(text.to_string());
            store.insert(&msg).await.unwrap();
        }
        let mut no_text = message("m4", "+91", "2025-01-01T00:00:00Z");
        no_text.text = None;
        store.insert(&no_text).await.unwrap();

        let search = |q: &str| MessageFilter {
            q: Some(q.to_string()),
            ..Default::default()
        };

        let (_, total) = store.list_messages(10, 0, &search("50%")).await.unwrap();
        assert_eq!(total, 0);

        let (_, total) = store.list_messages(10, 0, &search("a_")).await.unwrap();
        assert_eq!(total, 0);

        let (rows, total) = store.list_messages(10, 0, &search("ünï")).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].message_id, "m3");

        let (rows, _) = store.list_messages(10, 0, &search("50 DOLL")).await.unwrap();
        assert_eq!(rows[0].message_id, "m1");
    }

    #[tokio::test]
    async fn test_stats_empty_store() {
        let (_dir, store) = temp_store().await;
        let stats = store.stats().await.unwrap();

        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.senders_count, 0);
        assert!(stats.messages_per_sender.is_empty());
        assert_eq!(stats.first_message_ts, None);
        assert_eq!(stats.last_message_ts, None);
    }

    #[tokio::test]
    async fn test_stats_counts_and_bounds() {
        let (_dir, store) = temp_store().await;
        store.insert(&message("m1", "+91", "2025-01-02T00:00:00Z")).await.unwrap();
        store.insert(&message("m2", "+91", "2025-01-03T00:00:00Z")).await.unwrap();
        store.insert(&message("m3", "+44", "2025-01-01T00:00:00Z")).await.unwrap();
        store.insert(&message("m4", "+33", "2025-01-04T00:00:00Z")).await.unwrap();

        let stats = store.stats().await.unwrap();

        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.senders_count, 3);
        assert_eq!(
            stats.messages_per_sender,
            vec![
                SenderCount { from: "+91".to_string(), count: 2 },
                SenderCount { from: "+33".to_string(), count: 1 },
                SenderCount { from: "+44".to_string(), count: 1 },
            ]
        );
        assert_eq!(stats.first_message_ts.as_deref(), Some("2025-01-01T00:00:00Z"));
        assert_eq!(stats.last_message_ts.as_deref(), Some("2025-01-04T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_stats_top_senders_capped() {
        let (_dir, store) = temp_store().await;
        for i in 0..12 {
            let sender = format!("+1000{:02}", i);
            store
                .insert(&message(&format!("m{}", i), &sender, "2025-01-01T00:00:00Z"))
                .await
                .unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.senders_count, 12);
        assert_eq!(stats.messages_per_sender.len(), TOP_SENDERS_LIMIT as usize);
        assert_eq!(stats.messages_per_sender[0].from, "+100000");
    }
}
