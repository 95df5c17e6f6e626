//! SQLite-backed queue store.
//!
//! Every state change is a single conditional `UPDATE ... RETURNING`, so the
//! row's current status is checked and changed in one statement. Two workers
//! sharing the database can therefore never both move the same row out of
//! `pending`. When a conditional update matches nothing the store returns
//! `None` and leaves the explanation to the repository.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::error::{QueueError, QueueResult};
use super::types::{EmailStatus, EmailType, EntryId, QueueEntry};

const COLUMNS: &str = "id, recipient_email, recipient_name, email_type, subject, body, \
     scheduled_at, status, retry_count, max_retries, error_message, created_at, updated_at, sent_at";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS email_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recipient_email TEXT NOT NULL,
        recipient_name TEXT NOT NULL,
        email_type TEXT NOT NULL,
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        scheduled_at INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'processing', 'sent', 'failed', 'cancelled')),
        retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
        max_retries INTEGER NOT NULL CHECK (max_retries >= 0),
        error_message TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        sent_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_email_queue_claim
        ON email_queue (status, email_type, scheduled_at, id)",
    "CREATE INDEX IF NOT EXISTS idx_email_queue_created_at ON email_queue (created_at)",
    // One active entry per recipient and type
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_email_queue_active_recipient
        ON email_queue (recipient_email, email_type) WHERE status <> 'cancelled'",
];

/// `SET` clause for a failed attempt that spends retry budget. The row goes
/// back to `pending` until the attempt count reaches `max_retries`, then to
/// `failed`; the count itself never passes `max_retries`. SQLite evaluates
/// every expression against the row as it was before the update.
const SPEND_RETRY: &str = "retry_count = MIN(retry_count + 1, max_retries), \
     status = CASE WHEN retry_count + 1 >= max_retries THEN 'failed' ELSE 'pending' END";

/// Same as `SPEND_RETRY` but always ends in `failed`.
const FAIL_NOW: &str = "retry_count = MIN(retry_count + 1, max_retries), status = 'failed'";

/// Row as stored; timestamps are epoch milliseconds.
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: i64,
    recipient_email: String,
    recipient_name: String,
    email_type: String,
    subject: String,
    body: String,
    scheduled_at: i64,
    status: String,
    retry_count: i64,
    max_retries: i64,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
    sent_at: Option<i64>,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = QueueError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |reason: String| QueueError::Corrupt { id, reason };

        Ok(QueueEntry {
            id: EntryId(id),
            recipient_email: row.recipient_email,
            recipient_name: row.recipient_name,
            email_type: row.email_type.parse().map_err(|e| corrupt(format!("{e}")))?,
            subject: row.subject,
            body: row.body,
            scheduled_time: from_millis(id, row.scheduled_at)?,
            status: row.status.parse().map_err(|e| corrupt(format!("{e}")))?,
            retry_count: u32::try_from(row.retry_count)
                .map_err(|_| corrupt(format!("retry_count {}", row.retry_count)))?,
            max_retries: u32::try_from(row.max_retries)
                .map_err(|_| corrupt(format!("max_retries {}", row.max_retries)))?,
            error_message: row.error_message,
            created_at: from_millis(id, row.created_at)?,
            updated_at: from_millis(id, row.updated_at)?,
            sent_at: row.sent_at.map(|ms| from_millis(id, ms)).transpose()?,
        })
    }
}

fn from_millis(id: i64, ms: i64) -> QueueResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| QueueError::Corrupt {
        id,
        reason: format!("timestamp out of range: {ms}"),
    })
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn into_entries(rows: Vec<QueueRow>) -> QueueResult<Vec<QueueEntry>> {
    rows.into_iter().map(QueueEntry::try_from).collect()
}

/// Fields written when a row is created.
#[derive(Debug, Clone)]
pub struct InsertEntry {
    pub recipient_email: String,
    pub recipient_name: String,
    pub email_type: EmailType,
    pub subject: String,
    pub body: String,
    pub scheduled_time: DateTime<Utc>,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
}

/// How a failed attempt is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Back to `pending` until the retry budget is spent
    CountAgainstBudget,
    /// Straight to `failed`
    Terminal,
}

/// Persistent table of queue entries.
#[derive(Clone)]
pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    /// Open (creating if needed) the database at `url`.
    ///
    /// In-memory databases live only as long as their connection, so they get a
    /// single connection that is never recycled.
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        info!(in_memory = in_memory, "queue_store_connected");

        Ok(Self { pool })
    }

    /// Create the table and indexes. Safe to run on every startup.
    pub async fn migrate(&self) -> QueueResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("queue_store_schema_ready");
        Ok(())
    }

    /// Insert a new `pending` row.
    pub async fn insert(&self, entry: &InsertEntry) -> QueueResult<QueueEntry> {
        let sql = format!(
            "INSERT INTO email_queue (recipient_email, recipient_name, email_type, subject, body, \
                 scheduled_at, status, retry_count, max_retries, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, ?8, ?8) \
             RETURNING {COLUMNS}"
        );

        let result = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(&entry.recipient_email)
            .bind(&entry.recipient_name)
            .bind(entry.email_type.as_str())
            .bind(&entry.subject)
            .bind(&entry.body)
            .bind(millis(entry.scheduled_time))
            .bind(i64::from(entry.max_retries))
            .bind(millis(entry.created_at))
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => row.try_into(),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(QueueError::DuplicateEntry {
                    recipient: entry.recipient_email.clone(),
                    email_type: entry.email_type,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: EntryId) -> QueueResult<Option<QueueEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM email_queue WHERE id = ?1");
        sqlx::query_as::<_, QueueRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(QueueEntry::try_from)
            .transpose()
    }

    /// Flip up to `limit` due `pending` rows of one type to `processing`.
    ///
    /// Returned entries are ordered by `scheduled_time`, then id.
    pub async fn claim_due(
        &self,
        email_type: EmailType,
        now: DateTime<Utc>,
        limit: u32,
    ) -> QueueResult<Vec<QueueEntry>> {
        let sql = format!(
            "UPDATE email_queue SET status = 'processing', updated_at = ?1 \
             WHERE status = 'pending' AND id IN ( \
                 SELECT id FROM email_queue \
                 WHERE status = 'pending' AND email_type = ?2 AND scheduled_at <= ?1 \
                 ORDER BY scheduled_at ASC, id ASC \
                 LIMIT ?3 \
             ) \
             RETURNING {COLUMNS}"
        );

        let rows = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(millis(now))
            .bind(email_type.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        // RETURNING order is unspecified
        let mut entries = into_entries(rows)?;
        entries.sort_by_key(|e| (e.scheduled_time, e.id));
        Ok(entries)
    }

    /// `processing -> sent`. `None` if the row is not `processing`.
    pub async fn mark_sent(
        &self,
        id: EntryId,
        sent_at: DateTime<Utc>,
    ) -> QueueResult<Option<QueueEntry>> {
        let sql = format!(
            "UPDATE email_queue SET status = 'sent', sent_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND status = 'processing' \
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(millis(sent_at))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(QueueEntry::try_from).transpose()
    }

    /// Record a failed attempt on a `processing` row. `None` if it is not `processing`.
    pub async fn record_failure(
        &self,
        id: EntryId,
        error_message: &str,
        mode: FailureMode,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<QueueEntry>> {
        let attempt = match mode {
            FailureMode::CountAgainstBudget => SPEND_RETRY,
            FailureMode::Terminal => FAIL_NOW,
        };
        let sql = format!(
            "UPDATE email_queue SET {attempt}, error_message = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status = 'processing' \
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(error_message)
            .bind(millis(now))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(QueueEntry::try_from).transpose()
    }

    /// `failed -> pending` with a fresh budget. `None` if the row is not `failed`.
    pub async fn reset_failed(
        &self,
        id: EntryId,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<QueueEntry>> {
        let sql = format!(
            "UPDATE email_queue SET status = 'pending', retry_count = 0, error_message = NULL, \
                 updated_at = ?1 \
             WHERE id = ?2 AND status = 'failed' \
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(millis(now))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(QueueEntry::try_from).transpose()
    }

    /// `pending -> cancelled`. `None` if the row is not `pending`.
    pub async fn cancel_pending(
        &self,
        id: EntryId,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<QueueEntry>> {
        let sql = format!(
            "UPDATE email_queue SET status = 'cancelled', updated_at = ?1 \
             WHERE id = ?2 AND status = 'pending' \
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(millis(now))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(QueueEntry::try_from).transpose()
    }

    /// Count every `processing` row last touched before `cutoff` as a failed attempt.
    pub async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<Vec<QueueEntry>> {
        let sql = format!(
            "UPDATE email_queue SET {SPEND_RETRY}, error_message = ?1, updated_at = ?2 \
             WHERE status = 'processing' AND updated_at < ?3 \
             RETURNING {COLUMNS}"
        );

        let rows = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(error_message)
            .bind(millis(now))
            .bind(millis(cutoff))
            .fetch_all(&self.pool)
            .await?;

        into_entries(rows)
    }

    pub async fn list_by_status(
        &self,
        status: EmailStatus,
        limit: u32,
        offset: u32,
    ) -> QueueResult<Vec<QueueEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM email_queue WHERE status = ?1 \
             ORDER BY scheduled_at ASC, id ASC LIMIT ?2 OFFSET ?3"
        );

        let rows = sqlx::query_as::<_, QueueRow>(&sql)
            .bind(status.as_str())
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?;

        into_entries(rows)
    }

    /// Row counts grouped by type and status.
    pub async fn counts(&self) -> QueueResult<Vec<(EmailType, EmailStatus, u64)>> {
        let rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT email_type, status, COUNT(*) FROM email_queue GROUP BY email_type, status",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(ty, status, count)| -> QueueResult<(EmailType, EmailStatus, u64)> {
                let corrupt = |reason: String| QueueError::Corrupt { id: 0, reason };
                Ok((
                    ty.parse().map_err(|e| corrupt(format!("{e}")))?,
                    status.parse().map_err(|e| corrupt(format!("{e}")))?,
                    u64::try_from(count).unwrap_or(0),
                ))
            })
            .collect()
    }

    /// Earliest `scheduled_time` among pending rows and the latest `sent_at`.
    pub async fn schedule_bounds(
        &self,
    ) -> QueueResult<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let (next, last): (Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT \
                 (SELECT MIN(scheduled_at) FROM email_queue WHERE status = 'pending'), \
                 (SELECT MAX(sent_at) FROM email_queue WHERE status = 'sent')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok((
            next.map(|ms| from_millis(0, ms)).transpose()?,
            last.map(|ms| from_millis(0, ms)).transpose()?,
        ))
    }
}
