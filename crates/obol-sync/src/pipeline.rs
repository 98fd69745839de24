//! The `sync_account` pipeline: job tracking, reconciliation and the
//! account state machine around one adapter execution.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use obol_adapters::adapter_for_provider;
use obol_core::normalize::{normalize_fragments, NormalizedBill};
use obol_core::{
    AccountStatus, Bill, CredentialContext, DebugEvent, ErrorCode, JobStatus, ProviderAccount,
    ScrapeOutcome, SyncJob, SyncSummary,
};
use obol_storage::{Automation, EvidenceStore, StorageError, Store};
use obol_vault::{CredentialVault, EncryptedSecret};
use serde::Serialize;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

/// Request-level failures. Everything that happens after a job has been
/// begun is converted into a finished failed job instead of surfacing here.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("provider account not found")]
    AccountNotFound,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Creates and finalizes the one job record every pipeline invocation gets.
pub struct SyncJobTracker;

impl SyncJobTracker {
    pub fn begin(account: &ProviderAccount) -> SyncJob {
        SyncJob {
            id: Uuid::new_v4(),
            provider_account_id: account.id,
            user_id: account.user_id,
            status: JobStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            bills_found: 0,
            bills_new: 0,
            bills_updated: 0,
            error_code: None,
            error_message: None,
            debug_log: Vec::new(),
            evidence_path: None,
        }
    }

    /// Move the job to its terminal state. The debug trail and error
    /// classification are persisted verbatim for operator diagnosis; a job is
    /// finished exactly once and immutable afterwards.
    pub fn finish(
        job: &mut SyncJob,
        outcome: &ScrapeOutcome,
        counts: ReconcileCounts,
        evidence_path: Option<String>,
        extra_debug: Vec<DebugEvent>,
        finished_at: DateTime<Utc>,
    ) {
        job.status = if outcome.success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        job.completed_at = Some(finished_at);
        job.duration_ms = Some((finished_at - job.started_at).num_milliseconds().max(0));
        job.bills_found = outcome.bills.len() as i64;
        job.bills_new = counts.bills_new;
        job.bills_updated = counts.bills_updated;
        job.error_code = outcome.error_code;
        job.error_message = outcome.error.clone();
        job.debug_log = outcome.debug.clone();
        job.debug_log.extend(extra_debug);
        job.evidence_path = evidence_path;
    }
}

/// Derives the next account status from an outcome.
pub struct AccountStateMachine;

impl AccountStateMachine {
    pub fn enter_sync(account: &mut ProviderAccount, now: DateTime<Utc>) {
        account.status = AccountStatus::Syncing;
        account.updated_at = now;
    }

    /// Success re-connects and resets the error counter; a second-factor
    /// challenge parks the account until the user acts; anything else is an
    /// error. Next sync is always now + 24h; no backoff on repeated
    /// failure, preserved from observed behavior.
    pub fn apply_outcome(
        account: &mut ProviderAccount,
        outcome: &ScrapeOutcome,
        now: DateTime<Utc>,
    ) {
        account.status = if outcome.success {
            AccountStatus::Connected
        } else if outcome.error_code == Some(ErrorCode::TwoFactorRequired) {
            AccountStatus::NeedsOtp
        } else {
            AccountStatus::Error
        };
        account.status_message = outcome.error.clone();
        account.sync_count += 1;
        account.error_count = if outcome.success {
            0
        } else {
            account.error_count + 1
        };
        account.last_sync_at = Some(now);
        account.last_sync_success = Some(outcome.success);
        account.last_sync_bills_found = Some(outcome.bills.len() as i64);
        account.next_sync_at = Some(now + ChronoDuration::hours(24));
        account.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub bills_new: i64,
    pub bills_updated: i64,
}

/// Idempotent upsert of normalized bills keyed by
/// (user, provider, reference number).
pub struct BillReconciler {
    store: Arc<dyn Store>,
}

impl BillReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Update the mutable fields of a known bill in place, or insert a new
    /// one. Title, bill type and creation identity survive re-scrapes.
    pub async fn upsert(
        &self,
        account: &ProviderAccount,
        bill: &NormalizedBill,
        scraped_at: DateTime<Utc>,
    ) -> Result<ReconcileAction, StorageError> {
        let existing = self
            .store
            .find_bill(account.user_id, account.provider_id, &bill.reference_number)
            .await?;

        match existing {
            Some(stored) => {
                self.store
                    .update_bill_scrape(stored.id, bill.amount, bill.due_date, scraped_at)
                    .await?;
                Ok(ReconcileAction::Updated)
            }
            None => {
                self.store
                    .insert_bill(&Bill {
                        id: Uuid::new_v4(),
                        user_id: account.user_id,
                        provider_account_id: account.id,
                        provider_id: account.provider_id,
                        title: bill.title.clone(),
                        amount: bill.amount,
                        due_date: bill.due_date,
                        issue_date: bill.issue_date,
                        period_start: bill.period_start,
                        period_end: bill.period_end,
                        reference_number: bill.reference_number.clone(),
                        bill_type: bill.bill_type.clone(),
                        payment_code: bill.payment_code.clone(),
                        source: "scraped".to_string(),
                        scraped_at,
                        created_at: scraped_at,
                        updated_at: scraped_at,
                    })
                    .await?;
                Ok(ReconcileAction::Created)
            }
        }
    }

    pub async fn reconcile_all(
        &self,
        account: &ProviderAccount,
        bills: &[NormalizedBill],
        scraped_at: DateTime<Utc>,
    ) -> Result<ReconcileCounts, StorageError> {
        let mut counts = ReconcileCounts::default();
        for bill in bills {
            match self.upsert(account, bill, scraped_at).await? {
                ReconcileAction::Created => counts.bills_new += 1,
                ReconcileAction::Updated => counts.bills_updated += 1,
            }
        }
        Ok(counts)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub accounts_processed: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

struct Attempt {
    outcome: ScrapeOutcome,
    counts: ReconcileCounts,
}

impl Attempt {
    fn failed(code: ErrorCode, message: String) -> Self {
        Self {
            outcome: ScrapeOutcome::failure(code, message),
            counts: ReconcileCounts::default(),
        }
    }
}

/// Composes vault, registry, automation transport, normalizer, reconciler,
/// job tracker and state machine into the single `sync_account` operation.
pub struct SyncOrchestrator {
    store: Arc<dyn Store>,
    vault: CredentialVault,
    automation: Arc<dyn Automation>,
    evidence: EvidenceStore,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        vault: CredentialVault,
        automation: Arc<dyn Automation>,
        evidence: EvidenceStore,
    ) -> Self {
        Self {
            store,
            vault,
            automation,
            evidence,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run the pipeline once for one account. Account lookup failure is the
    /// only request-level error; once a job exists, every fault is converted
    /// into a finished failed job and an account status update, so an
    /// account never stays `syncing` after this returns.
    pub async fn sync_account(&self, account_id: Uuid) -> Result<SyncSummary, SyncError> {
        let mut account = self
            .store
            .provider_account(account_id)
            .await?
            .ok_or(SyncError::AccountNotFound)?;

        AccountStateMachine::enter_sync(&mut account, Utc::now());
        self.store.update_provider_account(&account).await?;

        let mut job = SyncJobTracker::begin(&account);
        self.store.insert_sync_job(&job).await?;

        let span = info_span!(
            "sync_account",
            account_id = %account.id,
            provider = %account.provider_id,
            job_id = %job.id,
        );
        let attempt = self.run_attempt(&account).instrument(span).await;

        let mut extra_debug = Vec::new();
        let mut evidence_path = None;
        if let Some(screenshot) = &attempt.outcome.screenshot {
            match self
                .evidence
                .store_screenshot(account.user_id, account.provider_id, Utc::now(), screenshot)
                .await
            {
                Ok(stored) => evidence_path = Some(stored.relative_path.display().to_string()),
                Err(err) => {
                    warn!(account_id = %account.id, error = %err, "evidence storage failed");
                    extra_debug.push(DebugEvent::message("evidence_store_failed", err.to_string()));
                }
            }
        }

        let finished_at = Utc::now();
        SyncJobTracker::finish(
            &mut job,
            &attempt.outcome,
            attempt.counts,
            evidence_path,
            extra_debug,
            finished_at,
        );
        self.store.update_sync_job(&job).await?;

        AccountStateMachine::apply_outcome(&mut account, &attempt.outcome, finished_at);
        self.store.update_provider_account(&account).await?;

        Ok(SyncSummary {
            success: attempt.outcome.success,
            bills_found: attempt.outcome.bills.len() as i64,
            bills_new: attempt.counts.bills_new,
            bills_updated: attempt.counts.bills_updated,
            error_code: attempt.outcome.error_code,
            error: attempt.outcome.error,
        })
    }

    async fn run_attempt(&self, account: &ProviderAccount) -> Attempt {
        let password = match self.vault.decrypt(&EncryptedSecret {
            ciphertext: account.encrypted_password.clone(),
            nonce: account.encryption_nonce.clone(),
        }) {
            Ok(password) => password,
            Err(err) => {
                return Attempt::failed(
                    ErrorCode::InternalError,
                    format!("credential decryption failed: {err}"),
                )
            }
        };

        let Some(adapter) = adapter_for_provider(account.provider_id.as_str()) else {
            return Attempt::failed(
                ErrorCode::ProviderNotFound,
                format!("no adapter registered for {}", account.provider_id),
            );
        };

        let context = CredentialContext {
            username: account.username.clone(),
            password,
        };
        let outcome = match self.automation.run(&adapter.script(), &context).await {
            Ok(outcome) => adapter.finalize(outcome),
            Err(err) => return Attempt::failed(ErrorCode::ScraperError, err.to_string()),
        };

        if !outcome.success {
            return Attempt {
                outcome,
                counts: ReconcileCounts::default(),
            };
        }

        // Zero fragments on a successful run is a zero-count success.
        let normalized = normalize_fragments(
            account.provider_id,
            adapter.default_bill_type(),
            &outcome.bills,
        );
        let reconciler = BillReconciler::new(self.store.clone());
        match reconciler
            .reconcile_all(account, &normalized, Utc::now())
            .await
        {
            Ok(counts) => Attempt { outcome, counts },
            Err(err) => {
                let mut failed = outcome;
                failed.success = false;
                failed.error_code = Some(ErrorCode::InternalError);
                failed.error = Some(format!("bill reconciliation failed: {err}"));
                Attempt {
                    outcome: failed,
                    counts: ReconcileCounts::default(),
                }
            }
        }
    }

    /// Enumerate due accounts and sync them sequentially with a fixed
    /// inter-call delay, respecting the automation capability's rate limits.
    pub async fn sync_due_accounts(
        &self,
        inter_call_delay: Duration,
    ) -> Result<SweepSummary, StorageError> {
        let started_at = Utc::now();
        let due = self.store.accounts_due(started_at).await?;

        let mut success_count = 0usize;
        let mut fail_count = 0usize;
        for account in &due {
            match self.sync_account(account.id).await {
                Ok(summary) if summary.success => success_count += 1,
                Ok(_) => fail_count += 1,
                Err(err) => {
                    warn!(account_id = %account.id, error = %err, "sweep sync failed");
                    fail_count += 1;
                }
            }
            tokio::time::sleep(inter_call_delay).await;
        }

        Ok(SweepSummary {
            accounts_processed: due.len(),
            success_count,
            fail_count,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use chrono::NaiveDate;
    use obol_core::{BillFragment, ProviderId, RawAmount};
    use obol_storage::{AutomationError, MemoryStore};

    const KEY: [u8; 32] = [0x07u8; 32];

    fn test_vault() -> CredentialVault {
        CredentialVault::new(KEY)
    }

    struct FakeAutomation {
        results: Mutex<VecDeque<Result<ScrapeOutcome, AutomationError>>>,
    }

    impl FakeAutomation {
        fn scripted(results: Vec<Result<ScrapeOutcome, AutomationError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Automation for FakeAutomation {
        async fn run(
            &self,
            _script: &str,
            _context: &CredentialContext,
        ) -> Result<ScrapeOutcome, AutomationError> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected extra automation call")
        }
    }

    fn harness(
        results: Vec<Result<ScrapeOutcome, AutomationError>>,
    ) -> (SyncOrchestrator, Arc<MemoryStore>, tempfile::TempDir) {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn Store> = store.clone();
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = SyncOrchestrator::new(
            dyn_store,
            test_vault(),
            Arc::new(FakeAutomation::scripted(results)),
            EvidenceStore::new(dir.path()),
        );
        (orchestrator, store, dir)
    }

    async fn seed_account(store: &MemoryStore, provider: ProviderId) -> ProviderAccount {
        let secret = test_vault().encrypt("pass").unwrap();
        let now = Utc::now();
        let account = ProviderAccount {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            provider_id: provider,
            username: "user".into(),
            username_masked: "****user".into(),
            encrypted_password: secret.ciphertext,
            encryption_nonce: secret.nonce,
            status: AccountStatus::Pending,
            status_message: None,
            sync_count: 0,
            error_count: 0,
            last_sync_at: None,
            last_sync_success: None,
            last_sync_bills_found: None,
            next_sync_at: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_provider_account(&account).await.unwrap();
        account
    }

    fn one_bill_outcome(amount: f64, reference: &str) -> ScrapeOutcome {
        ScrapeOutcome {
            success: true,
            bills: vec![BillFragment {
                amount: Some(RawAmount::Number(amount)),
                due_date: Some("20/03/2025".into()),
                reference_number: Some(reference.into()),
                ..Default::default()
            }],
            error: None,
            error_code: None,
            debug: vec![DebugEvent::step("extract_bills")],
            screenshot: None,
        }
    }

    #[tokio::test]
    async fn successful_sync_creates_bill_and_connects_account() {
        let (orchestrator, store, _dir) = harness(vec![Ok(one_bill_outcome(45.30, "REF1"))]);
        let account = seed_account(&store, ProviderId::Deh).await;

        let summary = orchestrator.sync_account(account.id).await.unwrap();
        assert!(summary.success);
        assert_eq!(summary.bills_found, 1);
        assert_eq!(summary.bills_new, 1);
        assert_eq!(summary.bills_updated, 0);

        let bill = store
            .find_bill(account.user_id, ProviderId::Deh, "REF1")
            .await
            .unwrap()
            .expect("bill written");
        assert_eq!(bill.amount, 45.30);
        assert_eq!(bill.due_date, NaiveDate::from_ymd_opt(2025, 3, 20).unwrap());
        assert_eq!(bill.bill_type, "electricity");
        assert_eq!(bill.source, "scraped");

        let updated = store.provider_account(account.id).await.unwrap().unwrap();
        assert_eq!(updated.status, AccountStatus::Connected);
        assert_eq!(updated.error_count, 0);
        assert_eq!(updated.sync_count, 1);
        assert_eq!(updated.last_sync_success, Some(true));
        assert!(updated.next_sync_at.unwrap() > Utc::now() + ChronoDuration::hours(23));

        let jobs = store.jobs_for_account(account.id, 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].bills_new, 1);
        assert!(jobs[0].duration_ms.is_some());
    }

    #[tokio::test]
    async fn repeated_sync_updates_in_place_instead_of_duplicating() {
        let (orchestrator, store, _dir) = harness(vec![
            Ok(one_bill_outcome(45.30, "REF1")),
            Ok(one_bill_outcome(47.10, "REF1")),
        ]);
        let account = seed_account(&store, ProviderId::Deh).await;

        let first = orchestrator.sync_account(account.id).await.unwrap();
        assert_eq!((first.bills_new, first.bills_updated), (1, 0));

        let second = orchestrator.sync_account(account.id).await.unwrap();
        assert_eq!((second.bills_new, second.bills_updated), (0, 1));

        assert_eq!(store.bill_count().await, 1);
        let bill = store
            .find_bill(account.user_id, ProviderId::Deh, "REF1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bill.amount, 47.10);
        // Title and bill type survive the refresh.
        assert_eq!(bill.bill_type, "electricity");
        assert_eq!(bill.title, "DEH bill");
    }

    #[tokio::test]
    async fn two_factor_outcome_parks_account_in_needs_otp() {
        let (orchestrator, store, _dir) = harness(vec![Ok(ScrapeOutcome::failure(
            ErrorCode::TwoFactorRequired,
            "TaxisNet requires a one-time code after login",
        ))]);
        let account = seed_account(&store, ProviderId::Aade).await;

        let summary = orchestrator.sync_account(account.id).await.unwrap();
        assert!(!summary.success);
        assert_eq!(summary.error_code, Some(ErrorCode::TwoFactorRequired));

        let updated = store.provider_account(account.id).await.unwrap().unwrap();
        assert_eq!(updated.status, AccountStatus::NeedsOtp);
        assert_eq!(updated.error_count, 1);
        assert_eq!(store.bill_count().await, 0);

        let jobs = store.jobs_for_account(account.id, 10).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].error_code, Some(ErrorCode::TwoFactorRequired));
    }

    #[tokio::test]
    async fn transport_failure_still_finalizes_the_job() {
        let (orchestrator, store, _dir) = harness(vec![Err(AutomationError::MalformedEnvelope(
            "missing boolean `success` field".into(),
        ))]);
        let account = seed_account(&store, ProviderId::Eydap).await;

        let summary = orchestrator.sync_account(account.id).await.unwrap();
        assert!(!summary.success);
        assert_eq!(summary.error_code, Some(ErrorCode::ScraperError));

        let updated = store.provider_account(account.id).await.unwrap().unwrap();
        assert_eq!(updated.status, AccountStatus::Error);
        assert_eq!(updated.error_count, 1);

        let jobs = store.jobs_for_account(account.id, 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn vault_failure_is_fatal_for_the_attempt_but_never_uncaught() {
        let (orchestrator, store, _dir) = harness(vec![]);
        let mut account = seed_account(&store, ProviderId::Deh).await;
        account.encrypted_password = BASE64.encode(b"garbage");
        account.encryption_nonce = BASE64.encode([0u8; 12]);
        store.update_provider_account(&account).await.unwrap();

        let summary = orchestrator.sync_account(account.id).await.unwrap();
        assert!(!summary.success);
        assert_eq!(summary.error_code, Some(ErrorCode::InternalError));

        let updated = store.provider_account(account.id).await.unwrap().unwrap();
        assert_eq!(updated.status, AccountStatus::Error);
        let jobs = store.jobs_for_account(account.id, 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].error_code, Some(ErrorCode::InternalError));
    }

    #[tokio::test]
    async fn unknown_account_is_a_request_level_error() {
        let (orchestrator, store, _dir) = harness(vec![]);
        let result = orchestrator.sync_account(Uuid::new_v4()).await;
        assert!(matches!(result, Err(SyncError::AccountNotFound)));
        assert_eq!(store.bill_count().await, 0);
    }

    #[tokio::test]
    async fn evidence_screenshot_lands_on_the_job() {
        let mut outcome = one_bill_outcome(45.30, "REF1");
        outcome.screenshot = Some(BASE64.encode(b"png-bytes"));
        let (orchestrator, store, dir) = harness(vec![Ok(outcome)]);
        let account = seed_account(&store, ProviderId::Deh).await;

        orchestrator.sync_account(account.id).await.unwrap();

        let jobs = store.jobs_for_account(account.id, 1).await.unwrap();
        let evidence_path = jobs[0].evidence_path.clone().expect("evidence recorded");
        assert!(dir.path().join(&evidence_path).exists());
    }

    #[tokio::test]
    async fn evidence_failure_never_fails_the_job() {
        let mut outcome = one_bill_outcome(45.30, "REF1");
        outcome.screenshot = Some("%%%not-base64%%%".into());
        let (orchestrator, store, _dir) = harness(vec![Ok(outcome)]);
        let account = seed_account(&store, ProviderId::Deh).await;

        let summary = orchestrator.sync_account(account.id).await.unwrap();
        assert!(summary.success);

        let jobs = store.jobs_for_account(account.id, 1).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert!(jobs[0].evidence_path.is_none());
        assert!(jobs[0]
            .debug_log
            .iter()
            .any(|e| e.step == "evidence_store_failed"));
    }

    #[tokio::test]
    async fn sweep_processes_due_accounts_sequentially() {
        let (orchestrator, store, _dir) = harness(vec![
            Ok(one_bill_outcome(10.0, "A")),
            Ok(ScrapeOutcome::failure(ErrorCode::LoginFailed, "bad creds")),
        ]);
        let mut first = seed_account(&store, ProviderId::Deh).await;
        first.status = AccountStatus::Connected;
        store.update_provider_account(&first).await.unwrap();
        let mut second = seed_account(&store, ProviderId::Eydap).await;
        second.status = AccountStatus::Connected;
        second.user_id = first.user_id;
        store.update_provider_account(&second).await.unwrap();

        let summary = orchestrator
            .sync_due_accounts(Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(summary.accounts_processed, 2);
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.fail_count, 1);
    }

    #[test]
    fn state_machine_transitions_cover_all_outcomes() {
        let now = Utc::now();
        let mut account = ProviderAccount {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            provider_id: ProviderId::Deh,
            username: "u".into(),
            username_masked: "****u".into(),
            encrypted_password: String::new(),
            encryption_nonce: String::new(),
            status: AccountStatus::Syncing,
            status_message: None,
            sync_count: 4,
            error_count: 3,
            last_sync_at: None,
            last_sync_success: None,
            last_sync_bills_found: None,
            next_sync_at: None,
            created_at: now,
            updated_at: now,
        };

        let success = ScrapeOutcome {
            success: true,
            bills: vec![],
            error: None,
            error_code: None,
            debug: vec![],
            screenshot: None,
        };
        AccountStateMachine::apply_outcome(&mut account, &success, now);
        assert_eq!(account.status, AccountStatus::Connected);
        assert_eq!(account.error_count, 0);
        assert_eq!(account.sync_count, 5);
        assert_eq!(account.next_sync_at, Some(now + ChronoDuration::hours(24)));

        account.status = AccountStatus::Syncing;
        let otp = ScrapeOutcome::failure(ErrorCode::TwoFactorRequired, "otp");
        AccountStateMachine::apply_outcome(&mut account, &otp, now);
        assert_eq!(account.status, AccountStatus::NeedsOtp);
        assert_eq!(account.error_count, 1);

        account.status = AccountStatus::Syncing;
        let failure = ScrapeOutcome::failure(ErrorCode::LoginFailed, "rejected");
        AccountStateMachine::apply_outcome(&mut account, &failure, now);
        assert_eq!(account.status, AccountStatus::Error);
        assert_eq!(account.error_count, 2);
        assert_eq!(account.status_message.as_deref(), Some("rejected"));
    }

    #[tokio::test]
    async fn reconciler_preserves_identity_fields_on_update() {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn Store> = store.clone();
        let reconciler = BillReconciler::new(dyn_store);
        let account = seed_account(&store, ProviderId::Cosmote).await;
        let scraped_at = Utc::now();

        let first = NormalizedBill {
            title: "Λογαριασμός Κινητής".into(),
            amount: 30.0,
            due_date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            issue_date: None,
            period_start: None,
            period_end: None,
            reference_number: "C-1".into(),
            bill_type: "mobile".into(),
            payment_code: None,
        };
        let action = reconciler.upsert(&account, &first, scraped_at).await.unwrap();
        assert_eq!(action, ReconcileAction::Created);

        let refreshed = NormalizedBill {
            title: "different title from a later scrape".into(),
            amount: 31.5,
            due_date: NaiveDate::from_ymd_opt(2025, 4, 8).unwrap(),
            bill_type: "internet".into(),
            ..first.clone()
        };
        let action = reconciler
            .upsert(&account, &refreshed, scraped_at)
            .await
            .unwrap();
        assert_eq!(action, ReconcileAction::Updated);

        let stored = store
            .find_bill(account.user_id, ProviderId::Cosmote, "C-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.amount, 31.5);
        assert_eq!(stored.due_date, NaiveDate::from_ymd_opt(2025, 4, 8).unwrap());
        assert_eq!(stored.title, "Λογαριασμός Κινητής");
        assert_eq!(stored.bill_type, "mobile");
    }
}
