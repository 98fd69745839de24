//! Persistence traits, evidence storage and the remote automation transport.

pub mod automation;
pub mod evidence;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use obol_core::{AuditEntry, Bill, ProviderAccount, ProviderId, SyncJob};
use thiserror::Error;
use uuid::Uuid;

pub use automation::{Automation, AutomationConfig, AutomationError, HttpAutomationClient};
pub use evidence::{EvidenceStore, StoredEvidence};
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "obol-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("provider already connected for this user")]
    DuplicateAccount,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Persistence seam for the pipeline. The Postgres implementation backs the
/// deployed service; the in-memory one backs unit and end-to-end tests.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_provider_account(&self, account: &ProviderAccount) -> Result<(), StorageError>;
    async fn provider_account(&self, id: Uuid) -> Result<Option<ProviderAccount>, StorageError>;
    async fn provider_account_for_user(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> Result<Option<ProviderAccount>, StorageError>;
    async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<ProviderAccount>, StorageError>;
    async fn update_provider_account(&self, account: &ProviderAccount) -> Result<(), StorageError>;
    /// Connected accounts whose `next_sync_at` has passed or was never set.
    async fn accounts_due(&self, now: DateTime<Utc>) -> Result<Vec<ProviderAccount>, StorageError>;

    async fn insert_sync_job(&self, job: &SyncJob) -> Result<(), StorageError>;
    async fn update_sync_job(&self, job: &SyncJob) -> Result<(), StorageError>;
    async fn sync_job(&self, id: Uuid) -> Result<Option<SyncJob>, StorageError>;
    async fn jobs_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SyncJob>, StorageError>;

    async fn find_bill(
        &self,
        user_id: Uuid,
        provider: ProviderId,
        reference_number: &str,
    ) -> Result<Option<Bill>, StorageError>;
    async fn insert_bill(&self, bill: &Bill) -> Result<(), StorageError>;
    /// Refresh the mutable fields of an existing bill after a re-scrape.
    /// Title, bill type and creation identity are left untouched.
    async fn update_bill_scrape(
        &self,
        bill_id: Uuid,
        amount: f64,
        due_date: NaiveDate,
        scraped_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
    async fn bills_for_user(&self, user_id: Uuid) -> Result<Vec<Bill>, StorageError>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError>;
}
