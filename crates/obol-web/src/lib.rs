//! Axum HTTP surface: account registration, manual sync trigger, read
//! endpoints for accounts, jobs and bills.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use obol_core::{
    mask_username, AccountStatus, AuditEntry, ErrorCode, ProviderAccount, ProviderId, SyncSummary,
};
use obol_storage::{StorageError, Store};
use obol_sync::{ProviderCatalog, SyncConfig, SyncError, SyncOrchestrator};
use obol_vault::CredentialVault;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::warn;
use uuid::Uuid;

pub const CRATE_NAME: &str = "obol-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub vault: CredentialVault,
    pub catalog: ProviderCatalog,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/accounts", post(register_account_handler).get(list_accounts_handler))
        .route("/accounts/{id}/sync", post(sync_account_handler))
        .route("/accounts/{id}/jobs", get(list_jobs_handler))
        .route("/bills", get(list_bills_handler))
        .layer(middleware::from_fn(cors))
        .with_state(Arc::new(state))
}

/// Serve an already-assembled application state.
pub async fn serve_app(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Serve the API against the configured Postgres store.
pub async fn serve(config: SyncConfig) -> anyhow::Result<()> {
    let store: Arc<dyn Store> =
        Arc::new(obol_storage::PgStore::connect(&config.database_url).await?);
    let orchestrator = Arc::new(obol_sync::build_orchestrator(&config, store.clone())?);
    let state = AppState {
        store,
        orchestrator,
        vault: config.vault()?,
        catalog: ProviderCatalog::load(&config.providers_file).await?,
    };
    serve_app(state, config.web_port).await
}

/// Permissive CORS for the browser frontend; preflight requests are answered
/// here without touching the handlers.
async fn cors(req: Request, next: Next) -> Response {
    let preflight = req.method() == Method::OPTIONS;
    let mut response = if preflight {
        StatusCode::OK.into_response()
    } else {
        next.run(req).await
    };
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("authorization, content-type"),
    );
    response
}

#[derive(Debug, Deserialize)]
pub struct RegisterAccountRequest {
    pub user_id: Uuid,
    pub provider_id: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
struct AccountView {
    id: Uuid,
    provider_id: ProviderId,
    username_masked: String,
    status: AccountStatus,
    status_message: Option<String>,
    last_sync_at: Option<DateTime<Utc>>,
    next_sync_at: Option<DateTime<Utc>>,
    error_count: i64,
}

impl From<&ProviderAccount> for AccountView {
    fn from(account: &ProviderAccount) -> Self {
        Self {
            id: account.id,
            provider_id: account.provider_id,
            username_masked: account.username_masked.clone(),
            status: account.status,
            status_message: account.status_message.clone(),
            last_sync_at: account.last_sync_at,
            next_sync_at: account.next_sync_at,
            error_count: account.error_count,
        }
    }
}

fn error_response(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": message.into(),
            "error_code": code,
        })),
    )
        .into_response()
}

async fn health_handler() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn register_account_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterAccountRequest>,
) -> Response {
    let Some(provider) = ProviderId::parse(&request.provider_id) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::ProviderNotFound,
            format!("unknown provider: {}", request.provider_id),
        );
    };
    if !state.catalog.is_active(provider) {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::BadRequest,
            format!("provider {provider} is not available"),
        );
    }

    match state
        .store
        .provider_account_for_user(request.user_id, provider)
        .await
    {
        Ok(Some(_)) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorCode::BadRequest,
                "provider already connected; disconnect first",
            )
        }
        Ok(None) => {}
        Err(err) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                err.to_string(),
            )
        }
    }

    let secret = match state.vault.encrypt(&request.password) {
        Ok(secret) => secret,
        Err(err) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                format!("credential encryption failed: {err}"),
            )
        }
    };

    let now = Utc::now();
    let account = ProviderAccount {
        id: Uuid::new_v4(),
        user_id: request.user_id,
        provider_id: provider,
        username: request.username.clone(),
        username_masked: mask_username(&request.username, provider),
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

    match state.store.insert_provider_account(&account).await {
        Ok(()) => {}
        Err(StorageError::DuplicateAccount) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorCode::BadRequest,
                "provider already connected; disconnect first",
            )
        }
        Err(err) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::InternalError,
                err.to_string(),
            )
        }
    }

    let audit = AuditEntry {
        id: Uuid::new_v4(),
        user_id: account.user_id,
        action: "provider_account_created".to_string(),
        resource_type: "provider_account".to_string(),
        resource_id: account.id,
        detail: serde_json::json!({
            "provider_id": account.provider_id,
            "username_masked": account.username_masked,
        }),
        created_at: now,
    };
    if let Err(err) = state.store.append_audit(&audit).await {
        warn!(account_id = %account.id, error = %err, "audit write failed");
    }

    // Kick off the first sync right away; registration still succeeds when
    // the initial sync does not.
    let sync_result: SyncSummary = match state.orchestrator.sync_account(account.id).await {
        Ok(summary) => summary,
        Err(err) => SyncSummary {
            success: false,
            bills_found: 0,
            bills_new: 0,
            bills_updated: 0,
            error_code: None,
            error: Some(err.to_string()),
        },
    };

    let view = match state.store.provider_account(account.id).await {
        Ok(Some(account)) => AccountView::from(&account),
        _ => AccountView::from(&account),
    };

    Json(serde_json::json!({
        "success": true,
        "account": view,
        "sync_result": sync_result,
    }))
    .into_response()
}

async fn sync_account_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
) -> Response {
    match state.orchestrator.sync_account(id).await {
        Ok(summary) => Json(summary).into_response(),
        Err(SyncError::AccountNotFound) => {
            error_response(
                StatusCode::NOT_FOUND,
                ErrorCode::BadRequest,
                "provider account not found",
            )
        }
        Err(err) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError, err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: Uuid,
}

async fn list_accounts_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Response {
    match state.store.accounts_for_user(query.user_id).await {
        Ok(accounts) => {
            let views: Vec<AccountView> = accounts.iter().map(AccountView::from).collect();
            Json(views).into_response()
        }
        Err(err) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError, err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobsQuery {
    #[serde(default = "default_jobs_limit")]
    limit: i64,
}

fn default_jobs_limit() -> i64 {
    20
}

async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
    Query(query): Query<JobsQuery>,
) -> Response {
    match state.store.jobs_for_account(id, query.limit).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(err) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError, err.to_string())
        }
    }
}

async fn list_bills_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Response {
    match state.store.bills_for_user(query.user_id).await {
        Ok(bills) => Json(bills).into_response(),
        Err(err) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError, err.to_string())
        }
    }
}
