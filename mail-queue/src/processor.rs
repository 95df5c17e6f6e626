//! Background processor: claims due entries and hands them to the mail sender.
//!
//! Each cycle first reclaims abandoned `processing` rows, then walks the
//! email types in a fixed order, claiming up to `batch_size` due entries per
//! type and sending them one at a time. Outcomes go straight back to the
//! store; the processor holds no entry state between cycles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::queue::{state, EmailType, QueueEntry, QueueRepository, QueueResult};
use crate::sender::{MailSender, SendError};

/// Settings for one processor instance.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Time between cycles
    pub check_interval: Duration,
    /// Maximum claims per type per cycle
    pub batch_size: u32,
    /// Upper bound on a single send
    pub send_timeout: Duration,
    /// `processing` rows untouched for this long are reclaimed. Never shorter
    /// than one full batch of timed-out sends plus one interval.
    pub stale_after: Duration,
    /// Permanent send errors fail the entry immediately
    pub fail_fast_on_permanent: bool,
    /// Types processed each cycle, in order
    pub email_types: Vec<EmailType>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            batch_size: 100,
            send_timeout: Duration::from_secs(30),
            stale_after: Duration::from_secs(3_300),
            fail_fast_on_permanent: true,
            email_types: EmailType::ALL.to_vec(),
        }
    }
}

impl ProcessorConfig {
    /// Age at which another worker may take over a claim.
    pub fn reclaim_after(&self) -> Duration {
        let longest_batch = self
            .send_timeout
            .saturating_mul(self.batch_size)
            .saturating_add(self.check_interval);
        self.stale_after.max(longest_batch)
    }
}

impl From<&Config> for ProcessorConfig {
    fn from(config: &Config) -> Self {
        Self {
            check_interval: config.check_interval,
            batch_size: config.batch_size,
            send_timeout: config.send_timeout,
            stale_after: config.stale_after(),
            fail_fast_on_permanent: config.fail_fast_on_permanent,
            email_types: EmailType::ALL.to_vec(),
        }
    }
}

/// Outcome counts for one email type within a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeReport {
    pub claimed: usize,
    pub sent: usize,
    /// Failed attempts that went back to `pending`
    pub retried: usize,
    /// Failed attempts that ended in `failed`
    pub failed: usize,
}

/// Summary of one processor cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub reclaimed: usize,
    pub by_type: BTreeMap<EmailType, TypeReport>,
}

impl CycleReport {
    pub fn claimed(&self) -> usize {
        self.by_type.values().map(|r| r.claimed).sum()
    }

    pub fn sent(&self) -> usize {
        self.by_type.values().map(|r| r.sent).sum()
    }

    pub fn retried(&self) -> usize {
        self.by_type.values().map(|r| r.retried).sum()
    }

    pub fn failed(&self) -> usize {
        self.by_type.values().map(|r| r.failed).sum()
    }

    pub fn for_type(&self, email_type: EmailType) -> TypeReport {
        self.by_type.get(&email_type).cloned().unwrap_or_default()
    }
}

pub struct QueueProcessor {
    repo: QueueRepository,
    sender: Arc<dyn MailSender>,
    config: ProcessorConfig,
}

impl QueueProcessor {
    pub fn new(repo: QueueRepository, sender: Arc<dyn MailSender>, config: ProcessorConfig) -> Self {
        Self {
            repo,
            sender,
            config,
        }
    }

    /// Run one full cycle as of `now`.
    ///
    /// Store errors abort the cycle. Rows claimed before the abort stay
    /// `processing` until a later cycle reclaims them.
    ///
    /// Timestamps written during the cycle are `now` advanced by the time the
    /// cycle has been running, so a batch claimed late in a long cycle carries
    /// its real claim time.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> QueueResult<CycleReport> {
        let started = Instant::now();
        let elapsed = || chrono::Duration::milliseconds(started.elapsed().as_millis() as i64);
        let mut report = CycleReport::default();

        let reclaim_after = chrono::Duration::from_std(self.config.reclaim_after())
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(reclaim_after).unwrap_or(DateTime::<Utc>::MIN_UTC);
        report.reclaimed = self.repo.reclaim_stale(cutoff, now).await?.len();

        for &email_type in &self.config.email_types {
            let entries = self
                .repo
                .claim_due(email_type, now + elapsed(), self.config.batch_size)
                .await?;

            let mut type_report = TypeReport {
                claimed: entries.len(),
                ..TypeReport::default()
            };

            for entry in &entries {
                let outcome = self.deliver(entry).await;
                let at = now + elapsed();
                self.record(entry, outcome, at, &mut type_report).await?;
            }

            if type_report.claimed > 0 {
                info!(
                    email_type = %email_type,
                    claimed = type_report.claimed,
                    sent = type_report.sent,
                    retried = type_report.retried,
                    failed = type_report.failed,
                    "processor_batch_complete"
                );
            }
            report.by_type.insert(email_type, type_report);
        }

        info!(
            reclaimed = report.reclaimed,
            claimed = report.claimed(),
            sent = report.sent(),
            retried = report.retried(),
            failed = report.failed(),
            duration_ms = started.elapsed().as_millis() as u64,
            "processor_cycle_complete"
        );

        Ok(report)
    }

    /// Send one entry, treating a timeout as a transient failure.
    async fn deliver(&self, entry: &QueueEntry) -> Result<(), SendError> {
        let recipient = entry.recipient();
        let send = self.sender.send(&recipient, &entry.subject, &entry.body);

        match tokio::time::timeout(self.config.send_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Transient(format!(
                "send timed out after {}ms",
                self.config.send_timeout.as_millis()
            ))),
        }
    }

    async fn record(
        &self,
        entry: &QueueEntry,
        outcome: Result<(), SendError>,
        at: DateTime<Utc>,
        report: &mut TypeReport,
    ) -> QueueResult<()> {
        let delivered = outcome.is_ok();
        let result = match outcome {
            Ok(()) => self.repo.mark_sent(entry.id, at).await.map(|_| {
                report.sent += 1;
                info!(entry_id = %entry.id, email_type = %entry.email_type, "queue_entry_sent");
            }),
            Err(send_error) => {
                let message = send_error.to_string();
                let updated = if send_error.is_permanent() && self.config.fail_fast_on_permanent {
                    self.repo.mark_permanent_failure(entry.id, &message, at).await
                } else {
                    self.repo.mark_failed_attempt(entry.id, &message, at).await
                };
                updated.map(|updated| {
                    if state::is_terminal(updated.status) {
                        report.failed += 1;
                    } else {
                        report.retried += 1;
                    }
                    warn!(
                        entry_id = %entry.id,
                        email_type = %entry.email_type,
                        status = %updated.status,
                        retry_count = updated.retry_count,
                        max_retries = updated.max_retries,
                        error = %message,
                        "queue_entry_send_failed"
                    );
                })
            }
        };

        match result {
            Ok(()) => Ok(()),
            // Another actor moved the row; nothing left for this cycle to do with it
            Err(e) if e.is_client_error() && delivered => {
                error!(entry_id = %entry.id, error = %e, "queue_entry_sent_without_claim");
                Ok(())
            }
            Err(e) if e.is_client_error() => {
                warn!(entry_id = %entry.id, error = %e, "queue_entry_outcome_rejected");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Loop until `shutdown` flips to true or its sender is dropped.
    ///
    /// The first cycle runs one interval after start. Shutdown is only
    /// observed between cycles, so a cycle in progress always completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.check_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            check_interval_secs = period.as_secs_f64(),
            batch_size = self.config.batch_size,
            "processor_started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.run_cycle(Utc::now()).await {
                error!(error = %e, "processor_cycle_failed");
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!("processor_stopped");
    }

    /// Run the loop on a background task.
    pub fn spawn(self) -> ProcessorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(shutdown_rx).await });

        ProcessorHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a processor started with `QueueProcessor::spawn`.
pub struct ProcessorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Request shutdown and wait for the in-flight cycle to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "processor_task_panicked");
        }
    }
}
