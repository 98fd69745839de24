//! Core domain model and wire contracts for the Obol bill-aggregation pipeline.

pub mod normalize;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "obol-core";

/// Closed set of provider portals the pipeline knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Deh,
    Eydap,
    Cosmote,
    Aade,
    Efka,
}

impl ProviderId {
    pub const ALL: [ProviderId; 5] = [
        ProviderId::Deh,
        ProviderId::Eydap,
        ProviderId::Cosmote,
        ProviderId::Aade,
        ProviderId::Efka,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Deh => "DEH",
            ProviderId::Eydap => "EYDAP",
            ProviderId::Cosmote => "COSMOTE",
            ProviderId::Aade => "AADE",
            ProviderId::Efka => "EFKA",
        }
    }

    pub fn parse(input: &str) -> Option<ProviderId> {
        match input.trim().to_ascii_uppercase().as_str() {
            "DEH" => Some(ProviderId::Deh),
            "EYDAP" => Some(ProviderId::Eydap),
            "COSMOTE" => Some(ProviderId::Cosmote),
            "AADE" => Some(ProviderId::Aade),
            "EFKA" => Some(ProviderId::Efka),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProviderId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProviderId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ProviderId::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown provider id: {raw}")))
    }
}

/// Lifecycle of a stored provider account.
///
/// `pending -> syncing -> {connected, error, needs_otp}`; the three terminal
/// states re-enter `syncing` on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Syncing,
    Connected,
    Error,
    NeedsOtp,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Syncing => "syncing",
            AccountStatus::Connected => "connected",
            AccountStatus::Error => "error",
            AccountStatus::NeedsOtp => "needs_otp",
        }
    }

    pub fn parse(input: &str) -> Option<AccountStatus> {
        match input {
            "pending" => Some(AccountStatus::Pending),
            "syncing" => Some(AccountStatus::Syncing),
            "connected" => Some(AccountStatus::Connected),
            "error" => Some(AccountStatus::Error),
            "needs_otp" => Some(AccountStatus::NeedsOtp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(input: &str) -> Option<JobStatus> {
        match input {
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Stable failure vocabulary surfaced to callers and persisted on jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    LoginFailed,
    LoginFormNotFound,
    TwoFactorRequired,
    ProviderNotFound,
    BadRequest,
    InternalError,
    ScraperError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::LoginFailed => "LOGIN_FAILED",
            ErrorCode::LoginFormNotFound => "LOGIN_FORM_NOT_FOUND",
            ErrorCode::TwoFactorRequired => "2FA_REQUIRED",
            ErrorCode::ProviderNotFound => "PROVIDER_NOT_FOUND",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ScraperError => "SCRAPER_ERROR",
        }
    }

    pub fn parse(input: &str) -> Option<ErrorCode> {
        match input {
            "LOGIN_FAILED" => Some(ErrorCode::LoginFailed),
            "LOGIN_FORM_NOT_FOUND" => Some(ErrorCode::LoginFormNotFound),
            "2FA_REQUIRED" => Some(ErrorCode::TwoFactorRequired),
            "PROVIDER_NOT_FOUND" => Some(ErrorCode::ProviderNotFound),
            "BAD_REQUEST" => Some(ErrorCode::BadRequest),
            "INTERNAL_ERROR" => Some(ErrorCode::InternalError),
            "SCRAPER_ERROR" => Some(ErrorCode::ScraperError),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Unknown codes from a remote script collapse to the generic
        // scraper failure.
        let raw = String::deserialize(deserializer)?;
        Ok(ErrorCode::parse(&raw).unwrap_or(ErrorCode::ScraperError))
    }
}

/// One step in the ordered trail a script accumulates while it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEvent {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl DebugEvent {
    pub fn step(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: None,
            url: None,
        }
    }

    pub fn message(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: Some(message.into()),
            url: None,
        }
    }
}

/// An amount as a portal rendered it: already numeric, or locale-formatted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Number(f64),
    Text(String),
}

/// One raw extracted bill candidate, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BillFragment {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub amount: Option<RawAmount>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub reference_number: Option<String>,
    #[serde(default)]
    pub bill_type: Option<String>,
    #[serde(default)]
    pub issue_date: Option<String>,
    #[serde(default)]
    pub period_start: Option<String>,
    #[serde(default)]
    pub period_end: Option<String>,
    #[serde(default)]
    pub payment_code: Option<String>,
}

/// Structured result of one adapter execution: the whole contract between a
/// script and the orchestrator, with nothing provider-specific in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub success: bool,
    #[serde(default)]
    pub bills: Vec<BillFragment>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
    #[serde(default)]
    pub debug: Vec<DebugEvent>,
    #[serde(default)]
    pub screenshot: Option<String>,
}

impl ScrapeOutcome {
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            bills: Vec::new(),
            error: Some(message.into()),
            error_code: Some(code),
            debug: Vec::new(),
            screenshot: None,
        }
    }
}

/// Credentials handed to the remote automation capability as a context
/// object, never interpolated into script text.
#[derive(Clone, Serialize)]
pub struct CredentialContext {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for CredentialContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialContext")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A (user, provider) credential binding. At most one per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider_id: ProviderId,
    pub username: String,
    pub username_masked: String,
    pub encrypted_password: String,
    pub encryption_nonce: String,
    pub status: AccountStatus,
    pub status_message: Option<String>,
    pub sync_count: i64,
    pub error_count: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_success: Option<bool>,
    pub last_sync_bills_found: Option<i64>,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One record per pipeline invocation; immutable once finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub provider_account_id: Uuid,
    pub user_id: Uuid,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub bills_found: i64,
    pub bills_new: i64,
    pub bills_updated: i64,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub debug_log: Vec<DebugEvent>,
    pub evidence_path: Option<String>,
}

/// Canonical extracted obligation.
///
/// Identity key for reconciliation: (user_id, provider_id, reference_number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider_account_id: Uuid,
    pub provider_id: ProviderId,
    pub title: String,
    pub amount: f64,
    pub due_date: NaiveDate,
    pub issue_date: Option<NaiveDate>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub reference_number: String,
    pub bill_type: String,
    pub payment_code: Option<String>,
    pub source: String,
    pub scraped_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What one `sync_account` call reports back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub success: bool,
    pub bills_found: i64,
    pub bills_new: i64,
    pub bills_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only audit record for account mutations outside the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Display-only username mask, derived once at registration. Never reversible
/// to the full username.
pub fn mask_username(username: &str, provider: ProviderId) -> String {
    let chars: Vec<char> = username.chars().collect();
    let take_first = |n: usize| chars.iter().take(n).collect::<String>();
    let take_last = |n: usize| {
        let skip = chars.len().saturating_sub(n);
        chars.iter().skip(skip).collect::<String>()
    };

    match provider {
        ProviderId::Aade | ProviderId::Efka => {
            format!("{}****{}", take_first(3), take_last(2))
        }
        ProviderId::Deh | ProviderId::Eydap => format!("****{}", take_last(4)),
        ProviderId::Cosmote => {
            if !chars.is_empty() && chars.iter().all(|c| c.is_ascii_digit()) {
                format!("{}****{}", take_first(3), take_last(2))
            } else {
                let mut parts = username.splitn(2, '@');
                let local = parts.next().unwrap_or_default();
                let domain = parts.next().unwrap_or_default();
                let local_prefix: String = local.chars().take(2).collect();
                format!("{local_prefix}***@{domain}")
            }
        }
    }
}
