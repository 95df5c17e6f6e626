//! Admin endpoint handlers.
//!
//! Thin wrappers over `QueueRepository`: parse the request, call one
//! repository operation, map the result to JSON.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::queue::{
    CampaignStatus, EmailStatus, EmailType, EntryId, NewEntry, QueueEntry, QueueError,
    QueueRepository, QueueStats, Recipient,
};
use crate::queue::types::ParseKindError;
use crate::Config;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 500;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repo: QueueRepository,
}

impl AppState {
    pub fn new(config: Config, repo: QueueRepository) -> Self {
        Self {
            config: Arc::new(config),
            repo,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: String,
}

/// Error returned by admin handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Queue(QueueError),
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError::Queue(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::Queue(e) => {
                let (code, status) = match &e {
                    QueueError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    QueueError::DuplicateEntry { .. } => (StatusCode::CONFLICT, "duplicate"),
                    QueueError::InvalidTransition { .. } | QueueError::NotRetryable { .. } => {
                        (StatusCode::CONFLICT, "invalid_state")
                    }
                    QueueError::CampaignNotScheduled(_) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "campaign_not_scheduled")
                    }
                    QueueError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid"),
                    QueueError::Corrupt { .. } | QueueError::Database(_) => {
                        error!(error = %e, "admin_request_failed");
                        (StatusCode::INTERNAL_SERVER_ERROR, "error")
                    }
                };
                (code, status, e.to_string())
            }
        };

        (code, Json(ErrorResponse { status, error: message })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_email_type(raw: &str) -> ApiResult<EmailType> {
    raw.parse()
        .map_err(|e: ParseKindError| ApiError::BadRequest(e.to_string()))
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Queue
// =============================================================================

pub async fn queue_stats(State(state): State<AppState>) -> ApiResult<Json<QueueStats>> {
    Ok(Json(state.repo.stats().await?))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntryList {
    pub status: EmailStatus,
    pub limit: u32,
    pub offset: u32,
    pub entries: Vec<QueueEntry>,
}

/// `GET /queue/entries?status=failed&limit=50&offset=0`. Status defaults to `pending`.
pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<EntryList>> {
    let status = match query.status.as_deref() {
        None => EmailStatus::Pending,
        Some(raw) => raw
            .parse()
            .map_err(|e: ParseKindError| ApiError::BadRequest(e.to_string()))?,
    };
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let entries = state.repo.list_by_status(status, limit, offset).await?;
    Ok(Json(EntryList {
        status,
        limit,
        offset,
        entries,
    }))
}

pub async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<QueueEntry>> {
    Ok(Json(state.repo.get(EntryId(id)).await?))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub email: String,
    pub name: String,
    pub email_type: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

pub async fn enqueue_entry(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<(StatusCode, Json<QueueEntry>)> {
    let email_type = parse_email_type(&request.email_type)?;
    let entry = NewEntry {
        recipient: Recipient::new(request.email, request.name),
        email_type,
        subject: request.subject,
        body: request.body,
        max_retries: request.max_retries,
    };

    let stored = state.repo.enqueue(entry, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn retry_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<QueueEntry>> {
    Ok(Json(state.repo.retry(EntryId(id), Utc::now()).await?))
}

pub async fn cancel_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<QueueEntry>> {
    Ok(Json(state.repo.cancel(EntryId(id), Utc::now()).await?))
}

// =============================================================================
// Signups and Campaigns
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SignupResponse {
    pub entries: Vec<QueueEntry>,
}

/// Queue the welcome email plus every upcoming campaign for a new user.
pub async fn signup(
    State(state): State<AppState>,
    Json(recipient): Json<Recipient>,
) -> ApiResult<(StatusCode, Json<SignupResponse>)> {
    let entries = state.repo.enqueue_signup(&recipient, Utc::now()).await?;
    info!(
        recipient = %recipient.email,
        queued = entries.len(),
        "signup_emails_queued"
    );
    Ok((StatusCode::CREATED, Json(SignupResponse { entries })))
}

#[derive(Debug, Deserialize)]
pub struct FanOutRequest {
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FanOutResponse {
    pub email_type: EmailType,
    pub requested: usize,
    pub inserted: usize,
}

pub async fn fan_out_campaign(
    State(state): State<AppState>,
    Path(email_type): Path<String>,
    Json(request): Json<FanOutRequest>,
) -> ApiResult<Json<FanOutResponse>> {
    let email_type = parse_email_type(&email_type)?;
    if request.recipients.is_empty() {
        warn!(email_type = %email_type, "campaign_fan_out_empty");
    }

    let inserted = state
        .repo
        .fan_out_campaign(email_type, &request.recipients, Utc::now())
        .await?;

    Ok(Json(FanOutResponse {
        email_type,
        requested: request.recipients.len(),
        inserted,
    }))
}

pub async fn campaign_status(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<CampaignStatus>>> {
    Ok(Json(state.repo.campaign_status(Utc::now()).await?))
}
