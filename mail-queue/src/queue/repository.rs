//! Queue repository: the typed operations callers use.
//!
//! The repository stamps eligibility times through the scheduling policy,
//! renders default content, validates input and turns "conditional update
//! matched nothing" from the store into a precise error.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::error::{QueueError, QueueResult};
use super::state;
use super::store::{FailureMode, InsertEntry, QueueStore};
use super::types::{
    CampaignStatus, EmailStatus, EmailType, EntryId, NewEntry, QueueEntry, QueueStats, Recipient,
    MAX_RETRIES_LIMIT,
};
use crate::schedule::SchedulingPolicy;
use crate::templates;

/// Error text recorded when a stale `processing` row is reclaimed.
pub const STALE_CLAIM_ERROR: &str = "processing lease expired";

/// Typed queue operations over a `QueueStore`.
#[derive(Clone)]
pub struct QueueRepository {
    store: QueueStore,
    policy: SchedulingPolicy,
    default_max_retries: u32,
}

impl QueueRepository {
    pub fn new(store: QueueStore, policy: SchedulingPolicy, default_max_retries: u32) -> Self {
        Self {
            store,
            policy,
            default_max_retries,
        }
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Queue a message as `pending`.
    ///
    /// Fails with `DuplicateEntry` if the recipient already has an active
    /// entry of the same type.
    pub async fn enqueue(&self, entry: NewEntry, now: DateTime<Utc>) -> QueueResult<QueueEntry> {
        let recipient = normalize_recipient(&entry.recipient)?;

        let max_retries = entry.max_retries.unwrap_or(self.default_max_retries);
        if max_retries > MAX_RETRIES_LIMIT {
            return Err(QueueError::Validation(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}, got {max_retries}"
            )));
        }

        let scheduled_time = self
            .policy
            .scheduled_time(entry.email_type, now)
            .ok_or(QueueError::CampaignNotScheduled(entry.email_type))?;

        let (default_subject, default_body) = templates::render(entry.email_type, &recipient.name);
        let subject = entry
            .subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(default_subject);
        let body = entry
            .body
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(default_body);

        let stored = self
            .store
            .insert(&InsertEntry {
                recipient_email: recipient.email,
                recipient_name: recipient.name,
                email_type: entry.email_type,
                subject,
                body,
                scheduled_time,
                max_retries,
                created_at: now,
            })
            .await?;

        info!(
            entry_id = %stored.id,
            email_type = %stored.email_type,
            recipient = %stored.recipient_email,
            scheduled_time = %stored.scheduled_time,
            "queue_entry_enqueued"
        );

        Ok(stored)
    }

    /// Queue everything a newly registered user should receive: the welcome
    /// email now, plus each campaign whose date is still ahead.
    ///
    /// A duplicate welcome is an error; campaigns the user already has are skipped.
    pub async fn enqueue_signup(
        &self,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> QueueResult<Vec<QueueEntry>> {
        let mut queued = vec![
            self.enqueue(NewEntry::new(recipient.clone(), EmailType::Welcome), now)
                .await?,
        ];

        for (email_type, _) in self.policy.upcoming_campaigns(now) {
            match self
                .enqueue(NewEntry::new(recipient.clone(), email_type), now)
                .await
            {
                Ok(entry) => queued.push(entry),
                Err(QueueError::DuplicateEntry { .. }) => {
                    debug!(email_type = %email_type, recipient = %recipient.email, "signup_campaign_already_queued");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(queued)
    }

    /// Queue one campaign for every recipient, all sharing the campaign's date.
    ///
    /// Recipients that already have an active entry of this type, or whose
    /// address is invalid, are skipped. A campaign whose date has already
    /// passed queues nothing. Returns the number of new entries.
    pub async fn fan_out_campaign(
        &self,
        email_type: EmailType,
        recipients: &[Recipient],
        now: DateTime<Utc>,
    ) -> QueueResult<usize> {
        if !email_type.is_campaign() {
            return Err(QueueError::Validation(format!(
                "{email_type} is not a campaign type"
            )));
        }

        let anchor = self
            .policy
            .scheduled_time(email_type, now)
            .ok_or(QueueError::CampaignNotScheduled(email_type))?;

        if anchor <= now {
            warn!(
                email_type = %email_type,
                scheduled_time = %anchor,
                "campaign_fan_out_skipped_past_date"
            );
            return Ok(0);
        }

        let mut inserted = 0;
        let mut skipped = 0;
        for recipient in recipients {
            match self
                .enqueue(NewEntry::new(recipient.clone(), email_type), now)
                .await
            {
                Ok(_) => inserted += 1,
                Err(QueueError::DuplicateEntry { .. }) => skipped += 1,
                Err(QueueError::Validation(reason)) => {
                    warn!(recipient = %recipient.email, reason = %reason, "campaign_fan_out_invalid_recipient");
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            email_type = %email_type,
            inserted = inserted,
            skipped = skipped,
            scheduled_time = %anchor,
            "campaign_fan_out_complete"
        );

        Ok(inserted)
    }

    // =========================================================================
    // Processing
    // =========================================================================

    /// Atomically claim up to `limit` due entries of one type.
    pub async fn claim_due(
        &self,
        email_type: EmailType,
        now: DateTime<Utc>,
        limit: u32,
    ) -> QueueResult<Vec<QueueEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store.claim_due(email_type, now, limit).await
    }

    /// `processing -> sent`.
    pub async fn mark_sent(&self, id: EntryId, sent_at: DateTime<Utc>) -> QueueResult<QueueEntry> {
        match self.store.mark_sent(id, sent_at).await? {
            Some(entry) => Ok(entry),
            None => Err(self.rejected(id, EmailStatus::Sent).await),
        }
    }

    /// Count a failed delivery attempt against the retry budget.
    ///
    /// The entry returns to `pending` while budget remains, otherwise it
    /// becomes `failed`.
    pub async fn mark_failed_attempt(
        &self,
        id: EntryId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<QueueEntry> {
        self.record_failure(id, error_message, FailureMode::CountAgainstBudget, now)
            .await
    }

    /// Fail the entry outright, for errors no retry can fix.
    pub async fn mark_permanent_failure(
        &self,
        id: EntryId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<QueueEntry> {
        self.record_failure(id, error_message, FailureMode::Terminal, now)
            .await
    }

    async fn record_failure(
        &self,
        id: EntryId,
        error_message: &str,
        mode: FailureMode,
        now: DateTime<Utc>,
    ) -> QueueResult<QueueEntry> {
        match self.store.record_failure(id, error_message, mode, now).await? {
            Some(entry) => Ok(entry),
            // Report against `failed`; `pending` shares the same source state
            None => Err(self.rejected(id, EmailStatus::Failed).await),
        }
    }

    /// Treat `processing` rows untouched since `cutoff` as failed attempts.
    pub async fn reclaim_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Vec<QueueEntry>> {
        let reclaimed = self.store.reclaim_stale(cutoff, STALE_CLAIM_ERROR, now).await?;
        for entry in &reclaimed {
            warn!(
                entry_id = %entry.id,
                email_type = %entry.email_type,
                status = %entry.status,
                retry_count = entry.retry_count,
                "queue_entry_reclaimed"
            );
        }
        Ok(reclaimed)
    }

    // =========================================================================
    // Operator actions
    // =========================================================================

    /// Requeue a `failed` entry with a fresh retry budget.
    ///
    /// `scheduled_time` is left as it was, so the entry is claimable on the
    /// next cycle.
    pub async fn retry(&self, id: EntryId, now: DateTime<Utc>) -> QueueResult<QueueEntry> {
        match self.store.reset_failed(id, now).await? {
            Some(entry) => {
                info!(entry_id = %id, email_type = %entry.email_type, "queue_entry_retry_requested");
                Ok(entry)
            }
            None => match self.store.get(id).await? {
                None => Err(QueueError::NotFound(id)),
                Some(entry) => Err(QueueError::NotRetryable {
                    id,
                    status: entry.status,
                }),
            },
        }
    }

    /// `pending -> cancelled`.
    pub async fn cancel(&self, id: EntryId, now: DateTime<Utc>) -> QueueResult<QueueEntry> {
        match self.store.cancel_pending(id, now).await? {
            Some(entry) => {
                info!(entry_id = %id, email_type = %entry.email_type, "queue_entry_cancelled");
                Ok(entry)
            }
            None => Err(self.rejected(id, EmailStatus::Cancelled).await),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, id: EntryId) -> QueueResult<QueueEntry> {
        self.store.get(id).await?.ok_or(QueueError::NotFound(id))
    }

    pub async fn list_by_status(
        &self,
        status: EmailStatus,
        limit: u32,
        offset: u32,
    ) -> QueueResult<Vec<QueueEntry>> {
        self.store.list_by_status(status, limit, offset).await
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let mut stats = QueueStats::default();

        for (email_type, status, count) in self.store.counts().await? {
            stats.total += count;
            *stats.by_status.entry(status).or_default() += count;
            *stats
                .by_type
                .entry(email_type)
                .or_default()
                .entry(status)
                .or_default() += count;
        }

        let (next_scheduled, last_sent) = self.store.schedule_bounds().await?;
        stats.next_scheduled = next_scheduled;
        stats.last_sent = last_sent;

        Ok(stats)
    }

    /// Progress of every campaign type.
    pub async fn campaign_status(&self, now: DateTime<Utc>) -> QueueResult<Vec<CampaignStatus>> {
        let stats = self.stats().await?;

        Ok(EmailType::CAMPAIGNS
            .into_iter()
            .map(|email_type| {
                let counts: BTreeMap<EmailStatus, u64> =
                    stats.by_type.get(&email_type).cloned().unwrap_or_default();
                let scheduled_time = self.policy.calendar().get(email_type);
                CampaignStatus {
                    email_type,
                    scheduled_time,
                    is_past_due: scheduled_time.map(|at| at <= now).unwrap_or(false),
                    total: counts.values().sum(),
                    counts,
                }
            })
            .collect())
    }

    /// Build the error for a conditional update that matched nothing.
    async fn rejected(&self, id: EntryId, to: EmailStatus) -> QueueError {
        match self.store.get(id).await {
            Ok(Some(entry)) => {
                debug!(
                    entry_id = %id,
                    from = %entry.status,
                    to = %to,
                    required = ?state::required_source(to),
                    "queue_transition_rejected"
                );
                QueueError::InvalidTransition {
                    id,
                    from: entry.status,
                    to,
                }
            }
            Ok(None) => QueueError::NotFound(id),
            Err(e) => e,
        }
    }
}

/// Trim the name, lowercase the address and check the address has a local
/// part and a dotted domain.
fn normalize_recipient(recipient: &Recipient) -> QueueResult<Recipient> {
    let email = recipient.email.trim().to_lowercase();
    let name = recipient.name.trim();

    if name.is_empty() {
        return Err(QueueError::Validation("recipient name cannot be empty".into()));
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(QueueError::Validation(format!(
            "invalid recipient email: {:?}",
            recipient.email
        )));
    }

    Ok(Recipient::new(email, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::CampaignCalendar;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    const CAMPAIGN_AT: i64 = 10_000;

    async fn repo() -> QueueRepository {
        let store = QueueStore::connect("sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        let calendar = CampaignCalendar::new()
            .with(EmailType::SearchEngine, t(CAMPAIGN_AT))
            .unwrap()
            .with(EmailType::PortfolioBuilder, t(-10))
            .unwrap();
        QueueRepository::new(store, SchedulingPolicy::new(calendar), 3)
    }

    fn alice() -> Recipient {
        Recipient::new("alice@example.com", "Alice")
    }

    #[tokio::test]
    async fn test_enqueue_welcome_is_due_immediately_with_template() {
        let repo = repo().await;
        let entry = repo
            .enqueue(NewEntry::new(alice(), EmailType::Welcome), t(0))
            .await
            .unwrap();

        assert_eq!(entry.status, EmailStatus::Pending);
        assert_eq!(entry.scheduled_time, t(0));
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.max_retries, 3);
        assert!(entry.body.contains("Alice"));
        assert!(entry.sent_at.is_none());
        assert!(entry.error_message.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_keeps_explicit_content() {
        let repo = repo().await;
        let entry = repo
            .enqueue(
                NewEntry::new(alice(), EmailType::Welcome)
                    .with_content("Hi", "Custom body")
                    .with_max_retries(5),
                t(0),
            )
            .await
            .unwrap();

        assert_eq!(entry.subject, "Hi");
        assert_eq!(entry.body, "Custom body");
        assert_eq!(entry.max_retries, 5);
    }

    #[tokio::test]
    async fn test_enqueue_validation() {
        let repo = repo().await;

        let blank_name = NewEntry::new(Recipient::new("a@example.com", "  "), EmailType::Welcome);
        assert!(matches!(
            repo.enqueue(blank_name, t(0)).await,
            Err(QueueError::Validation(_))
        ));

        for bad in ["", "no-at-sign", "@example.com", "a@localhost", "a b@example.com"] {
            let entry = NewEntry::new(Recipient::new(bad, "Name"), EmailType::Welcome);
            assert!(
                matches!(repo.enqueue(entry, t(0)).await, Err(QueueError::Validation(_))),
                "{bad:?}"
            );
        }

        let too_many = NewEntry::new(alice(), EmailType::Welcome).with_max_retries(11);
        assert!(matches!(
            repo.enqueue(too_many, t(0)).await,
            Err(QueueError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_enqueue_duplicate_is_case_insensitive() {
        let repo = repo().await;
        repo.enqueue(NewEntry::new(alice(), EmailType::Welcome), t(0))
            .await
            .unwrap();

        let shouting = Recipient::new(" ALICE@Example.com ", "Alice");
        let err = repo
            .enqueue(NewEntry::new(shouting, EmailType::Welcome), t(5))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::DuplicateEntry { .. }));
    }

    #[tokio::test]
    async fn test_campaign_without_date_is_rejected() {
        let repo = repo().await;
        let err = repo
            .enqueue(NewEntry::new(alice(), EmailType::PlatformComplete), t(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QueueError::CampaignNotScheduled(EmailType::PlatformComplete)
        ));
    }

    #[tokio::test]
    async fn test_scenario_enqueue_claim_send_stats() {
        let repo = repo().await;
        let entry = repo
            .enqueue(NewEntry::new(alice(), EmailType::Welcome), t(0))
            .await
            .unwrap();

        let claimed = repo.claim_due(EmailType::Welcome, t(60), 10).await.unwrap();
        assert_eq!(claimed.iter().map(|e| e.id).collect::<Vec<_>>(), vec![entry.id]);

        let sent = repo.mark_sent(entry.id, t(61)).await.unwrap();
        assert_eq!(sent.status, EmailStatus::Sent);
        assert_eq!(sent.sent_at, Some(t(61)));

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.count(EmailType::Welcome, EmailStatus::Sent), 1);
        assert_eq!(stats.status_count(EmailStatus::Sent), 1);
        assert_eq!(stats.last_sent, Some(t(61)));
        assert_eq!(stats.next_scheduled, None);
    }

    #[tokio::test]
    async fn test_invalid_transitions_leave_state_unchanged() {
        let repo = repo().await;
        let entry = repo
            .enqueue(NewEntry::new(alice(), EmailType::Welcome), t(0))
            .await
            .unwrap();

        let err = repo.mark_sent(entry.id, t(1)).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: EmailStatus::Pending,
                to: EmailStatus::Sent,
                ..
            }
        ));

        let err = repo.mark_failed_attempt(entry.id, "x", t(1)).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));

        let err = repo.retry(entry.id, t(1)).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::NotRetryable {
                status: EmailStatus::Pending,
                ..
            }
        ));

        let unchanged = repo.get(entry.id).await.unwrap();
        assert_eq!(unchanged, entry);

        assert!(matches!(
            repo.mark_sent(EntryId(999), t(1)).await,
            Err(QueueError::NotFound(EntryId(999)))
        ));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_after_max_retries_attempts() {
        let repo = repo().await;
        let entry = repo
            .enqueue(NewEntry::new(alice(), EmailType::Welcome), t(0))
            .await
            .unwrap();

        let mut last = entry.clone();
        for attempt in 1..=3u32 {
            let claimed = repo
                .claim_due(EmailType::Welcome, t(attempt as i64 * 60), 10)
                .await
                .unwrap();
            assert_eq!(claimed.len(), 1, "attempt {attempt}");

            last = repo
                .mark_failed_attempt(entry.id, "smtp 421", t(attempt as i64 * 60))
                .await
                .unwrap();
            assert_eq!(last.retry_count, attempt);
            if last.status != EmailStatus::Failed {
                assert!(last.retry_count <= last.max_retries);
            }
        }

        assert_eq!(last.status, EmailStatus::Failed);
        assert_eq!(last.retry_count, 3);
        assert_eq!(last.error_message.as_deref(), Some("smtp 421"));

        // Failed entries are no longer claimable
        assert!(repo.claim_due(EmailType::Welcome, t(1_000), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_remaining_budget() {
        let repo = repo().await;
        let entry = repo
            .enqueue(NewEntry::new(alice(), EmailType::Welcome), t(0))
            .await
            .unwrap();
        repo.claim_due(EmailType::Welcome, t(1), 10).await.unwrap();

        let failed = repo
            .mark_permanent_failure(entry.id, "permanent: mailbox unavailable", t(2))
            .await
            .unwrap();
        assert_eq!(failed.status, EmailStatus::Failed);
        assert_eq!(failed.retry_count, 1);
    }

    #[tokio::test]
    async fn test_scenario_retry_resets_and_reclaims() {
        let repo = repo().await;
        let entry = repo
            .enqueue(
                NewEntry::new(alice(), EmailType::Welcome).with_max_retries(1),
                t(0),
            )
            .await
            .unwrap();
        repo.claim_due(EmailType::Welcome, t(1), 10).await.unwrap();
        let failed = repo.mark_failed_attempt(entry.id, "boom", t(2)).await.unwrap();
        assert_eq!(failed.status, EmailStatus::Failed);

        let retried = repo.retry(entry.id, t(3)).await.unwrap();
        assert_eq!(retried.status, EmailStatus::Pending);
        assert_eq!(retried.retry_count, 0);
        assert_eq!(retried.error_message, None);
        assert_eq!(retried.scheduled_time, entry.scheduled_time);

        let claimed = repo.claim_due(EmailType::Welcome, t(4), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, entry.id);
    }

    #[tokio::test]
    async fn test_cancel_only_from_pending() {
        let repo = repo().await;
        let entry = repo
            .enqueue(NewEntry::new(alice(), EmailType::Welcome), t(0))
            .await
            .unwrap();
        let cancelled = repo.cancel(entry.id, t(1)).await.unwrap();
        assert_eq!(cancelled.status, EmailStatus::Cancelled);

        let err = repo.cancel(entry.id, t(2)).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: EmailStatus::Cancelled,
                to: EmailStatus::Cancelled,
                ..
            }
        ));

        // Slot is free again
        repo.enqueue(NewEntry::new(alice(), EmailType::Welcome), t(3))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fan_out_is_idempotent_and_shares_anchor() {
        let repo = repo().await;
        let recipients: Vec<_> = (0..5)
            .map(|i| Recipient::new(format!("user{i}@example.com"), format!("User {i}")))
            .collect();

        let first = repo
            .fan_out_campaign(EmailType::SearchEngine, &recipients, t(0))
            .await
            .unwrap();
        assert_eq!(first, 5);

        let second = repo
            .fan_out_campaign(EmailType::SearchEngine, &recipients, t(100))
            .await
            .unwrap();
        assert_eq!(second, 0);

        let pending = repo.list_by_status(EmailStatus::Pending, 100, 0).await.unwrap();
        assert_eq!(pending.len(), 5);
        assert!(pending.iter().all(|e| e.scheduled_time == t(CAMPAIGN_AT)));

        // Nothing is due before the anchor
        assert!(repo
            .claim_due(EmailType::SearchEngine, t(CAMPAIGN_AT - 1), 100)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_skips_invalid_and_past_campaigns() {
        let repo = repo().await;
        let recipients = vec![alice(), Recipient::new("broken", "Broken")];

        assert_eq!(
            repo.fan_out_campaign(EmailType::SearchEngine, &recipients, t(0))
                .await
                .unwrap(),
            1
        );
        // Anchor already passed
        assert_eq!(
            repo.fan_out_campaign(EmailType::PortfolioBuilder, &recipients, t(0))
                .await
                .unwrap(),
            0
        );
        assert!(matches!(
            repo.fan_out_campaign(EmailType::Welcome, &recipients, t(0)).await,
            Err(QueueError::Validation(_))
        ));
        assert!(matches!(
            repo.fan_out_campaign(EmailType::PlatformComplete, &recipients, t(0)).await,
            Err(QueueError::CampaignNotScheduled(_))
        ));
    }

    #[tokio::test]
    async fn test_signup_queues_welcome_and_future_campaigns() {
        let repo = repo().await;
        let queued = repo.enqueue_signup(&alice(), t(0)).await.unwrap();

        let types: Vec<_> = queued.iter().map(|e| e.email_type).collect();
        assert_eq!(types, vec![EmailType::Welcome, EmailType::SearchEngine]);

        let err = repo.enqueue_signup(&alice(), t(5)).await.unwrap_err();
        assert!(matches!(err, QueueError::DuplicateEntry { .. }));
    }

    #[tokio::test]
    async fn test_list_by_status_pages() {
        let repo = repo().await;
        for i in 0..5 {
            repo.enqueue(
                NewEntry::new(
                    Recipient::new(format!("u{i}@example.com"), "U"),
                    EmailType::Welcome,
                ),
                t(i),
            )
            .await
            .unwrap();
        }

        let page = repo.list_by_status(EmailStatus::Pending, 2, 2).await.unwrap();
        let emails: Vec<_> = page.iter().map(|e| e.recipient_email.as_str()).collect();
        assert_eq!(emails, vec!["u2@example.com", "u3@example.com"]);
        assert!(repo.list_by_status(EmailStatus::Failed, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_campaign_status_reports_counts_and_due() {
        let repo = repo().await;
        repo.fan_out_campaign(EmailType::SearchEngine, &[alice()], t(0))
            .await
            .unwrap();

        let status = repo.campaign_status(t(CAMPAIGN_AT + 1)).await.unwrap();
        assert_eq!(status.len(), 3);

        let search = &status[0];
        assert_eq!(search.email_type, EmailType::SearchEngine);
        assert!(search.is_past_due);
        assert_eq!(search.total, 1);
        assert_eq!(search.counts.get(&EmailStatus::Pending), Some(&1));

        let platform = &status[2];
        assert_eq!(platform.scheduled_time, None);
        assert!(!platform.is_past_due);
        assert_eq!(platform.total, 0);
    }

    #[tokio::test]
    async fn test_campaign_status_agrees_with_fan_out_at_the_anchor() {
        let repo = repo().await;

        let status = repo.campaign_status(t(CAMPAIGN_AT)).await.unwrap();
        assert!(status[0].is_past_due);
        assert_eq!(
            repo.fan_out_campaign(EmailType::SearchEngine, &[alice()], t(CAMPAIGN_AT))
                .await
                .unwrap(),
            0
        );

        let status = repo.campaign_status(t(CAMPAIGN_AT - 1)).await.unwrap();
        assert!(!status[0].is_past_due);
        assert_eq!(
            repo.fan_out_campaign(EmailType::SearchEngine, &[alice()], t(CAMPAIGN_AT - 1))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_reclaim_stale_spends_budget() {
        let repo = repo().await;
        let entry = repo
            .enqueue(
                NewEntry::new(alice(), EmailType::Welcome).with_max_retries(1),
                t(0),
            )
            .await
            .unwrap();
        repo.claim_due(EmailType::Welcome, t(1), 10).await.unwrap();

        let reclaimed = repo.reclaim_stale(t(100), t(100)).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, entry.id);
        assert_eq!(reclaimed[0].status, EmailStatus::Failed);
        assert_eq!(reclaimed[0].error_message.as_deref(), Some(STALE_CLAIM_ERROR));
    }
}
