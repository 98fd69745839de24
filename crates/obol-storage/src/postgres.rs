//! Postgres-backed store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use obol_core::{
    AccountStatus, AuditEntry, Bill, ErrorCode, JobStatus, ProviderAccount, ProviderId, SyncJob,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{StorageError, Store};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Database(sqlx::Error::Migrate(Box::new(e))))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_provider(raw: &str) -> Result<ProviderId, StorageError> {
    ProviderId::parse(raw).ok_or_else(|| StorageError::Corrupt(format!("provider id {raw}")))
}

fn parse_account_status(raw: &str) -> Result<AccountStatus, StorageError> {
    AccountStatus::parse(raw).ok_or_else(|| StorageError::Corrupt(format!("account status {raw}")))
}

fn parse_job_status(raw: &str) -> Result<JobStatus, StorageError> {
    JobStatus::parse(raw).ok_or_else(|| StorageError::Corrupt(format!("job status {raw}")))
}

fn account_from_row(row: &PgRow) -> Result<ProviderAccount, StorageError> {
    let provider_raw: String = row.try_get("provider_id")?;
    let status_raw: String = row.try_get("status")?;
    Ok(ProviderAccount {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        provider_id: parse_provider(&provider_raw)?,
        username: row.try_get("username")?,
        username_masked: row.try_get("username_masked")?,
        encrypted_password: row.try_get("encrypted_password")?,
        encryption_nonce: row.try_get("encryption_nonce")?,
        status: parse_account_status(&status_raw)?,
        status_message: row.try_get("status_message")?,
        sync_count: row.try_get("sync_count")?,
        error_count: row.try_get("error_count")?,
        last_sync_at: row.try_get("last_sync_at")?,
        last_sync_success: row.try_get("last_sync_success")?,
        last_sync_bills_found: row.try_get("last_sync_bills_found")?,
        next_sync_at: row.try_get("next_sync_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<SyncJob, StorageError> {
    let status_raw: String = row.try_get("status")?;
    let error_code_raw: Option<String> = row.try_get("error_code")?;
    let debug_log_raw: serde_json::Value = row.try_get("debug_log")?;
    Ok(SyncJob {
        id: row.try_get("id")?,
        provider_account_id: row.try_get("provider_account_id")?,
        user_id: row.try_get("user_id")?,
        status: parse_job_status(&status_raw)?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        duration_ms: row.try_get("duration_ms")?,
        bills_found: row.try_get("bills_found")?,
        bills_new: row.try_get("bills_new")?,
        bills_updated: row.try_get("bills_updated")?,
        error_code: error_code_raw.as_deref().and_then(ErrorCode::parse),
        error_message: row.try_get("error_message")?,
        debug_log: serde_json::from_value(debug_log_raw)
            .map_err(|e| StorageError::Corrupt(format!("debug_log: {e}")))?,
        evidence_path: row.try_get("evidence_path")?,
    })
}

fn bill_from_row(row: &PgRow) -> Result<Bill, StorageError> {
    let provider_raw: String = row.try_get("provider_id")?;
    Ok(Bill {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        provider_account_id: row.try_get("provider_account_id")?,
        provider_id: parse_provider(&provider_raw)?,
        title: row.try_get("title")?,
        amount: row.try_get("amount")?,
        due_date: row.try_get("due_date")?,
        issue_date: row.try_get("issue_date")?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        reference_number: row.try_get("reference_number")?,
        bill_type: row.try_get("bill_type")?,
        payment_code: row.try_get("payment_code")?,
        source: row.try_get("source")?,
        scraped_at: row.try_get("scraped_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_unique_violation(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StorageError::DuplicateAccount;
        }
    }
    StorageError::Database(err)
}

#[async_trait]
impl Store for PgStore {
    async fn insert_provider_account(&self, account: &ProviderAccount) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO provider_accounts (
                id, user_id, provider_id, username, username_masked,
                encrypted_password, encryption_nonce, status, status_message,
                sync_count, error_count, last_sync_at, last_sync_success,
                last_sync_bills_found, next_sync_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(account.id)
        .bind(account.user_id)
        .bind(account.provider_id.as_str())
        .bind(&account.username)
        .bind(&account.username_masked)
        .bind(&account.encrypted_password)
        .bind(&account.encryption_nonce)
        .bind(account.status.as_str())
        .bind(&account.status_message)
        .bind(account.sync_count)
        .bind(account.error_count)
        .bind(account.last_sync_at)
        .bind(account.last_sync_success)
        .bind(account.last_sync_bills_found)
        .bind(account.next_sync_at)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    async fn provider_account(&self, id: Uuid) -> Result<Option<ProviderAccount>, StorageError> {
        let row = sqlx::query("SELECT * FROM provider_accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn provider_account_for_user(
        &self,
        user_id: Uuid,
        provider: ProviderId,
    ) -> Result<Option<ProviderAccount>, StorageError> {
        let row =
            sqlx::query("SELECT * FROM provider_accounts WHERE user_id = $1 AND provider_id = $2")
                .bind(user_id)
                .bind(provider.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<ProviderAccount>, StorageError> {
        let rows =
            sqlx::query("SELECT * FROM provider_accounts WHERE user_id = $1 ORDER BY created_at")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn update_provider_account(&self, account: &ProviderAccount) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE provider_accounts
               SET status = $2,
                   status_message = $3,
                   sync_count = $4,
                   error_count = $5,
                   last_sync_at = $6,
                   last_sync_success = $7,
                   last_sync_bills_found = $8,
                   next_sync_at = $9,
                   updated_at = $10
             WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(account.status.as_str())
        .bind(&account.status_message)
        .bind(account.sync_count)
        .bind(account.error_count)
        .bind(account.last_sync_at)
        .bind(account.last_sync_success)
        .bind(account.last_sync_bills_found)
        .bind(account.next_sync_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("provider account"));
        }
        Ok(())
    }

    async fn accounts_due(&self, now: DateTime<Utc>) -> Result<Vec<ProviderAccount>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM provider_accounts
             WHERE status = 'connected'
               AND (next_sync_at IS NULL OR next_sync_at <= $1)
             ORDER BY next_sync_at NULLS FIRST
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn insert_sync_job(&self, job: &SyncJob) -> Result<(), StorageError> {
        let debug_log = serde_json::to_value(&job.debug_log)
            .map_err(|e| StorageError::Corrupt(format!("debug_log: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                id, provider_account_id, user_id, status, started_at,
                completed_at, duration_ms, bills_found, bills_new, bills_updated,
                error_code, error_message, debug_log, evidence_path
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(job.id)
        .bind(job.provider_account_id)
        .bind(job.user_id)
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.duration_ms)
        .bind(job.bills_found)
        .bind(job.bills_new)
        .bind(job.bills_updated)
        .bind(job.error_code.map(|c| c.as_str()))
        .bind(&job.error_message)
        .bind(debug_log)
        .bind(&job.evidence_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_sync_job(&self, job: &SyncJob) -> Result<(), StorageError> {
        let debug_log = serde_json::to_value(&job.debug_log)
            .map_err(|e| StorageError::Corrupt(format!("debug_log: {e}")))?;
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
               SET status = $2,
                   completed_at = $3,
                   duration_ms = $4,
                   bills_found = $5,
                   bills_new = $6,
                   bills_updated = $7,
                   error_code = $8,
                   error_message = $9,
                   debug_log = $10,
                   evidence_path = $11
             WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.completed_at)
        .bind(job.duration_ms)
        .bind(job.bills_found)
        .bind(job.bills_new)
        .bind(job.bills_updated)
        .bind(job.error_code.map(|c| c.as_str()))
        .bind(&job.error_message)
        .bind(debug_log)
        .bind(&job.evidence_path)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("sync job"));
        }
        Ok(())
    }

    async fn sync_job(&self, id: Uuid) -> Result<Option<SyncJob>, StorageError> {
        let row = sqlx::query("SELECT * FROM sync_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn jobs_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<SyncJob>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sync_jobs
             WHERE provider_account_id = $1
             ORDER BY started_at DESC
             LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn find_bill(
        &self,
        user_id: Uuid,
        provider: ProviderId,
        reference_number: &str,
    ) -> Result<Option<Bill>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM bills
             WHERE user_id = $1 AND provider_id = $2 AND reference_number = $3
            "#,
        )
        .bind(user_id)
        .bind(provider.as_str())
        .bind(reference_number)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(bill_from_row).transpose()
    }

    async fn insert_bill(&self, bill: &Bill) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO bills (
                id, user_id, provider_account_id, provider_id, title, amount,
                due_date, issue_date, period_start, period_end, reference_number,
                bill_type, payment_code, source, scraped_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(bill.id)
        .bind(bill.user_id)
        .bind(bill.provider_account_id)
        .bind(bill.provider_id.as_str())
        .bind(&bill.title)
        .bind(bill.amount)
        .bind(bill.due_date)
        .bind(bill.issue_date)
        .bind(bill.period_start)
        .bind(bill.period_end)
        .bind(&bill.reference_number)
        .bind(&bill.bill_type)
        .bind(&bill.payment_code)
        .bind(&bill.source)
        .bind(bill.scraped_at)
        .bind(bill.created_at)
        .bind(bill.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_bill_scrape(
        &self,
        bill_id: Uuid,
        amount: f64,
        due_date: NaiveDate,
        scraped_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE bills
               SET amount = $2, due_date = $3, scraped_at = $4, updated_at = $4
             WHERE id = $1
            "#,
        )
        .bind(bill_id)
        .bind(amount)
        .bind(due_date)
        .bind(scraped_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("bill"));
        }
        Ok(())
    }

    async fn bills_for_user(&self, user_id: Uuid) -> Result<Vec<Bill>, StorageError> {
        let rows = sqlx::query("SELECT * FROM bills WHERE user_id = $1 ORDER BY due_date")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(bill_from_row).collect()
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, user_id, action, resource_type, resource_id, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(entry.resource_id)
        .bind(&entry.detail)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
