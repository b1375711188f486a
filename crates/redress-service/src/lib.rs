#![deny(unsafe_code)]

pub mod auth;

use auth::{AuthActor, CredentialVerifier, CredentialsError, TokenRegistry};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use redress_core::{
    bootstrap_store, AuditAction, AuditEntry, AuditQuery, Complaint, ComplaintDesk,
    ComplaintFilter, ComplaintStatus, Domain, NewComplaint, NewDomain, Priority, PublicComplaint,
    RedressError, StatusCounts, StoreConfig, TransferRecord,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub store: StoreConfig,
    /// JSON file mapping bearer tokens to actors. Absent file means an empty
    /// registry: only the public endpoints will answer.
    pub credentials_path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct ServiceState {
    pub desk: Arc<ComplaintDesk>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub backend: &'static str,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let backend = config.store.label();
        let store = bootstrap_store(config.store).await?;

        let registry = match config.credentials_path {
            Some(path) => TokenRegistry::load(path)?,
            None => TokenRegistry::new(),
        };
        if registry.is_empty() {
            tracing::warn!("credential registry is empty; only public endpoints will answer");
        }

        Ok(Self::from_parts(
            Arc::new(ComplaintDesk::new(store)),
            Arc::new(registry),
            backend,
        ))
    }

    pub fn from_parts(
        desk: Arc<ComplaintDesk>,
        verifier: Arc<dyn CredentialVerifier>,
        backend: &'static str,
    ) -> Self {
        Self {
            desk,
            verifier,
            backend,
        }
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/complaints", post(create_complaint).get(list_complaints))
        .route("/complaints/public", get(public_complaints))
        .route("/complaints/:id", get(get_complaint).put(update_status))
        .route("/complaints/:id/mark-seen", put(mark_seen))
        .route("/complaints/:id/transfer", post(transfer_complaint))
        .route("/complaints/:id/transfers", get(transfer_history))
        .route("/domains", get(list_domains).post(create_domain))
        .route("/audit", get(audit_trail))
        .route("/dashboard", get(dashboard))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core error: {0}")]
    Core(#[from] RedressError),
    #[error("credentials error: {0}")]
    Credentials(#[from] CredentialsError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] RedressError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Http { status, message } => (status, message),
            ApiError::Core(err) => match err {
                RedressError::Validation(_)
                | RedressError::InvalidDomain(_)
                | RedressError::SameDomainTransfer(_) => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                RedressError::Authentication => (StatusCode::UNAUTHORIZED, err.to_string()),
                RedressError::PermissionDenied => (StatusCode::FORBIDDEN, err.to_string()),
                RedressError::NotFound => (StatusCode::NOT_FOUND, err.to_string()),
                RedressError::Storage(_) => {
                    tracing::error!(error = %err, "storage failure");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "storage unavailable".to_string(),
                    )
                }
                RedressError::Internal(_) => {
                    tracing::error!(error = %err, "internal failure");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
                }
            },
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "redress-service",
        storage_backend: state.backend,
    })
}

#[derive(Debug, Clone, Deserialize)]
struct CreateComplaintRequest {
    title: String,
    description: String,
    domain_id: i64,
    priority: Option<String>,
}

async fn create_complaint(
    State(state): State<ServiceState>,
    AuthActor(actor): AuthActor,
    Json(request): Json<CreateComplaintRequest>,
) -> Result<(StatusCode, Json<Complaint>), ApiError> {
    let priority = parse_priority(request.priority.as_deref())?.unwrap_or_default();
    let new = NewComplaint {
        title: request.title,
        description: request.description,
        domain_id: request.domain_id,
        priority,
    };

    let complaint = state.desk.create(&actor, new).await?;
    Ok((StatusCode::CREATED, Json(complaint)))
}

#[derive(Debug, Clone, Deserialize)]
struct ListComplaintsQuery {
    status: Option<String>,
    priority: Option<String>,
    domain_id: Option<i64>,
}

async fn list_complaints(
    State(state): State<ServiceState>,
    AuthActor(actor): AuthActor,
    Query(query): Query<ListComplaintsQuery>,
) -> Result<Json<Vec<Complaint>>, ApiError> {
    let filter = ComplaintFilter {
        status: parse_status(query.status.as_deref())?,
        priority: parse_priority(query.priority.as_deref())?,
        domain_id: query.domain_id,
    };

    Ok(Json(state.desk.list(&actor, filter).await?))
}

async fn public_complaints(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<PublicComplaint>>, ApiError> {
    Ok(Json(state.desk.list_public().await?))
}

async fn get_complaint(
    State(state): State<ServiceState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<i64>,
) -> Result<Json<Complaint>, ApiError> {
    Ok(Json(state.desk.get(&actor, id).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct UpdateStatusRequest {
    status: String,
    resolution_details: Option<String>,
}

async fn update_status(
    State(state): State<ServiceState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<i64>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Complaint>, ApiError> {
    let status = parse_status(Some(&request.status))?
        .ok_or_else(|| ApiError::bad_request("status is required"))?;

    let complaint = state
        .desk
        .update_status(&actor, id, status, request.resolution_details)
        .await?;
    Ok(Json(complaint))
}

async fn mark_seen(
    State(state): State<ServiceState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<i64>,
) -> Result<Json<Complaint>, ApiError> {
    Ok(Json(state.desk.mark_seen(&actor, id).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct TransferRequest {
    to_domain_id: i64,
    reason: String,
}

async fn transfer_complaint(
    State(state): State<ServiceState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<i64>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<Complaint>, ApiError> {
    let complaint = state
        .desk
        .transfer(&actor, id, request.to_domain_id, request.reason)
        .await?;
    Ok(Json(complaint))
}

async fn transfer_history(
    State(state): State<ServiceState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<i64>,
) -> Result<Json<Vec<TransferRecord>>, ApiError> {
    Ok(Json(state.desk.transfer_history(&actor, id).await?))
}

async fn list_domains(
    State(state): State<ServiceState>,
    AuthActor(actor): AuthActor,
) -> Result<Json<Vec<Domain>>, ApiError> {
    Ok(Json(state.desk.list_domains(&actor).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct CreateDomainRequest {
    name: String,
    description: Option<String>,
}

async fn create_domain(
    State(state): State<ServiceState>,
    AuthActor(actor): AuthActor,
    Json(request): Json<CreateDomainRequest>,
) -> Result<(StatusCode, Json<Domain>), ApiError> {
    let new = NewDomain {
        name: request.name,
        description: request.description.unwrap_or_default(),
    };

    let domain = state.desk.create_domain(&actor, new).await?;
    Ok((StatusCode::CREATED, Json(domain)))
}

#[derive(Debug, Clone, Deserialize)]
struct AuditTrailQuery {
    action: Option<String>,
    actor_id: Option<i64>,
    limit: Option<usize>,
    offset: Option<usize>,
    order: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct AuditTrailResponse {
    total: u64,
    returned: usize,
    items: Vec<AuditEntry>,
}

async fn audit_trail(
    State(state): State<ServiceState>,
    AuthActor(actor): AuthActor,
    Query(query): Query<AuditTrailQuery>,
) -> Result<Json<AuditTrailResponse>, ApiError> {
    let action = match query.action.as_deref() {
        None => None,
        Some(value) => Some(AuditAction::parse(value).ok_or_else(|| {
            ApiError::bad_request(format!(
                "invalid action '{value}'; expected one of: create, update, mark_seen, transfer"
            ))
        })?),
    };
    let ascending = match query.order.as_deref().unwrap_or("desc") {
        "asc" => true,
        "desc" => false,
        other => {
            return Err(ApiError::bad_request(format!(
                "invalid order '{other}'; expected asc or desc"
            )))
        }
    };

    let audit_query = AuditQuery {
        action,
        actor_id: query.actor_id,
        limit: query.limit.unwrap_or(100).min(1000),
        offset: query.offset.unwrap_or(0),
        ascending,
    };

    let (total, items) = state.desk.audit_trail(&actor, audit_query).await?;
    Ok(Json(AuditTrailResponse {
        total,
        returned: items.len(),
        items,
    }))
}

async fn dashboard(
    State(state): State<ServiceState>,
    AuthActor(actor): AuthActor,
) -> Result<Json<StatusCounts>, ApiError> {
    Ok(Json(state.desk.dashboard(&actor).await?))
}

fn parse_status(value: Option<&str>) -> Result<Option<ComplaintStatus>, ApiError> {
    match value {
        None => Ok(None),
        Some(value) => ComplaintStatus::parse(value).map(Some).ok_or_else(|| {
            ApiError::bad_request(format!(
                "invalid status '{value}'; expected one of: pending, in_progress, resolved, rejected"
            ))
        }),
    }
}

fn parse_priority(value: Option<&str>) -> Result<Option<Priority>, ApiError> {
    match value {
        None => Ok(None),
        Some(value) => Priority::parse(value).map(Some).ok_or_else(|| {
            ApiError::bad_request(format!(
                "invalid priority '{value}'; expected one of: low, medium, high"
            ))
        }),
    }
}
