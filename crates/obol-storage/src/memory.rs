//! In-memory store used by unit and end-to-end tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use obol_core::{AccountStatus, AuditEntry, Bill, ProviderAccount, ProviderId, SyncJob};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{StorageError, Store};

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, ProviderAccount>,
    jobs: HashMap<Uuid, SyncJob>,
    job_order: Vec<Uuid>,
    bills: Vec<Bill>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().await.audit.clone()
    }

    pub async fn bill_count(&self) -> usize {
        self.inner.lock().await.bills.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_provider_account(&self, account: &ProviderAccount) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        let duplicate = inner.accounts.values().any(|existing| {
            existing.user_id == account.user_id && existing.provider_id == account.provider_id
        });
        if duplicate {
            return Err(StorageError::DuplicateAccount);
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn provider_account(&self, id: Uuid) -> Result<Option<ProviderAccount>, StorageError> {
        Ok(self.inner.lock().await.accounts.get(&id).cloned())
    }

    async fn provider_account_for_user(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> Result<Option<ProviderAccount>, StorageError> {
        Ok(self
            .inner
            .lock()
            .await
            .accounts
            .values()
            .find(|a| a.user_id == user_id && a.provider_id == provider)
            .cloned())
    }

    async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<ProviderAccount>, StorageError> {
        let mut accounts: Vec<ProviderAccount> = self
            .inner
            .lock()
            .await
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }

    async fn update_provider_account(&self, account: &ProviderAccount) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        if !inner.accounts.contains_key(&account.id) {
            return Err(StorageError::NotFound("provider account"));
        }
        inner.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn accounts_due(&self, now: DateTime<Utc>) -> Result<Vec<ProviderAccount>, StorageError> {
        let mut due: Vec<ProviderAccount> = self
            .inner
            .lock()
            .await
            .accounts
            .values()
            .filter(|a| a.status == AccountStatus::Connected)
            .filter(|a| a.next_sync_at.map_or(true, |next| next <= now))
            .cloned()
            .collect();
        due.sort_by_key(|a| a.next_sync_at);
        Ok(due)
    }

    async fn insert_sync_job(&self, job: &SyncJob) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.id, job.clone());
        inner.job_order.push(job.id);
        Ok(())
    }

    async fn update_sync_job(&self, job: &SyncJob) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        if !inner.jobs.contains_key(&job.id) {
            return Err(StorageError::NotFound("sync job"));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn sync_job(&self, id: Uuid) -> Result<Option<SyncJob>, StorageError> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn jobs_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SyncJob>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .job_order
            .iter()
            .rev()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| job.provider_account_id == account_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn find_bill(
        &self,
        user_id: Uuid,
        provider: ProviderId,
        reference_number: &str,
    ) -> Result<Option<Bill>, StorageError> {
        Ok(self
            .inner
            .lock()
            .await
            .bills
            .iter()
            .find(|b| {
                b.user_id == user_id
                    && b.provider_id == provider
                    && b.reference_number == reference_number
            })
            .cloned())
    }

    async fn insert_bill(&self, bill: &Bill) -> Result<(), StorageError> {
        self.inner.lock().await.bills.push(bill.clone());
        Ok(())
    }

    async fn update_bill_scrape(
        &self,
        bill_id: Uuid,
        amount: f64,
        due_date: NaiveDate,
        scraped_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        let bill = inner
            .bills
            .iter_mut()
            .find(|b| b.id == bill_id)
            .ok_or(StorageError::NotFound("bill"))?;
        bill.amount = amount;
        bill.due_date = due_date;
        bill.scraped_at = scraped_at;
        bill.updated_at = scraped_at;
        Ok(())
    }

    async fn bills_for_user(&self, user_id: Uuid) -> Result<Vec<Bill>, StorageError> {
        Ok(self
            .inner
            .lock()
            .await
            .bills
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        self.inner.lock().await.audit.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account(user_id: Uuid, provider: ProviderId) -> ProviderAccount {
        let now = Utc::now();
        ProviderAccount {
            id: Uuid::new_v4(),
            user_id,
            provider_id: provider,
            username: "user".into(),
            username_masked: "****user".into(),
            encrypted_password: "ct".into(),
            encryption_nonce: "n".into(),
            status: AccountStatus::Connected,
            status_message: None,
            sync_count: 0,
            error_count: 0,
            last_sync_at: None,
            last_sync_success: None,
            last_sync_bills_found: None,
            next_sync_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn one_account_per_user_and_provider() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store
            .insert_provider_account(&account(user, ProviderId::Deh))
            .await
            .unwrap();

        let duplicate = store
            .insert_provider_account(&account(user, ProviderId::Deh))
            .await;
        assert!(matches!(duplicate, Err(StorageError::DuplicateAccount)));

        // Same provider for a different user is fine.
        store
            .insert_provider_account(&account(Uuid::new_v4(), ProviderId::Deh))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn due_selection_picks_overdue_and_never_synced_connected_accounts() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user = Uuid::new_v4();

        let never_synced = account(user, ProviderId::Deh);
        let mut overdue = account(user, ProviderId::Eydap);
        overdue.next_sync_at = Some(now - Duration::hours(1));
        let mut fresh = account(user, ProviderId::Cosmote);
        fresh.next_sync_at = Some(now + Duration::hours(12));
        let mut errored = account(user, ProviderId::Aade);
        errored.status = AccountStatus::Error;

        for a in [&never_synced, &overdue, &fresh, &errored] {
            store.insert_provider_account(a).await.unwrap();
        }

        let due = store.accounts_due(now).await.unwrap();
        let ids: Vec<Uuid> = due.iter().map(|a| a.id).collect();
        assert!(ids.contains(&never_synced.id));
        assert!(ids.contains(&overdue.id));
        assert!(!ids.contains(&fresh.id));
        assert!(!ids.contains(&errored.id));
    }

    #[tokio::test]
    async fn jobs_for_account_returns_newest_first() {
        let store = MemoryStore::new();
        let account_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let job = SyncJob {
                id: Uuid::new_v4(),
                provider_account_id: account_id,
                user_id,
                status: obol_core::JobStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
                duration_ms: None,
                bills_found: 0,
                bills_new: 0,
                bills_updated: 0,
                error_code: None,
                error_message: None,
                debug_log: vec![],
                evidence_path: None,
            };
            store.insert_sync_job(&job).await.unwrap();
            ids.push(job.id);
        }
        let jobs = store.jobs_for_account(account_id, 2).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, ids[2]);
        assert_eq!(jobs[1].id, ids[1]);
    }
}
