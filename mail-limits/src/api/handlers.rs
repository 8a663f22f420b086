//! Request handlers for the limits API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::LimitsError;
use crate::ownership::reclaim::{ReclaimReason, ReclaimSummary};
use crate::quota::engine::Batch;
use crate::quota::manager::{AuditMismatch, DomainTemplate, LimitsManager, TemplateOutcome};
use crate::quota::pool::LimitPool;
use crate::quota::types::{AccountId, DomainId, LimitSnapshot, ResourceId, ResourceKind, Role};
use crate::config::TemplateConfig;
use crate::store::LimitStore;

/// Shared state for all handlers
pub struct AppState {
    pub manager: Arc<LimitsManager>,
    /// Where to persist after each change; `None` keeps state in memory only
    pub store: Option<LimitStore>,
    pub template: TemplateConfig,
}

impl AppState {
    async fn persist(&self) -> Result<(), Rejection> {
        if let Some(store) = &self.store {
            store
                .save_latest(|| self.manager.state())
                .await
                .map_err(reject)?;
        }
        Ok(())
    }
}

/// Error body. `form_errors` is keyed by the form field the error belongs to.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub form_errors: BTreeMap<String, Vec<String>>,
}

impl ApiError {
    pub fn new(msg: &str) -> Self {
        Self {
            error: msg.to_string(),
            form_errors: BTreeMap::new(),
        }
    }
}

pub type Rejection = (StatusCode, Json<ApiError>);
type ApiResult<T> = Result<Json<T>, Rejection>;

/// Map a core error to an HTTP answer
pub fn reject(err: LimitsError) -> Rejection {
    let status = match &err {
        LimitsError::InsufficientResources { .. } => StatusCode::FAILED_DEPENDENCY,
        LimitsError::RoleUnavailable { field, .. } => {
            let mut body = ApiError::new(&err.to_string());
            body.form_errors
                .insert(field.to_string(), vec![err.to_string()]);
            return (StatusCode::BAD_REQUEST, Json(body));
        }
        LimitsError::AccountNotFound(_)
        | LimitsError::PoolNotFound(_)
        | LimitsError::DomainNotFound(_)
        | LimitsError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
        LimitsError::GrantConflict { .. } => StatusCode::CONFLICT,
        LimitsError::UnknownResourceKind { .. }
        | LimitsError::NotAllocatable(_)
        | LimitsError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LimitsError::Config(_)
        | LimitsError::Io(_)
        | LimitsError::Database(_)
        | LimitsError::Json(_) => {
            error!("Internal error: {}", err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("Internal error")),
            );
        }
    };
    if err.is_quota_rejection() {
        warn!("Request refused: {:?}", err);
    }
    (status, Json(ApiError::new(&err.to_string())))
}

fn parse_kind(name: &str) -> Result<ResourceKind, Rejection> {
    name.parse::<ResourceKind>().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(&format!("Unknown resource kind: {}", name))),
        )
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub actor: Option<AccountId>,
    pub role: Role,
    pub mailbox_domain: Option<DomainId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse<T> {
    pub id: T,
}

/// POST /api/accounts
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CreatedResponse<AccountId>>), Rejection> {
    let id = state
        .manager
        .create_account(payload.actor, payload.role, payload.mailbox_domain)
        .map_err(reject)?;
    state.persist().await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

/// DELETE /api/accounts/:id
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AccountId>,
) -> ApiResult<ReclaimSummary> {
    let summary = state.manager.delete_account(id);
    state.persist().await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub actor: Option<AccountId>,
    pub role: Role,
}

/// PUT /api/accounts/:id/role
pub async fn change_role(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AccountId>,
    Json(payload): Json<ChangeRoleRequest>,
) -> Result<StatusCode, Rejection> {
    state
        .manager
        .change_role(payload.actor, id, payload.role)
        .map_err(reject)?;
    state.persist().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/accounts/:id/limits
pub async fn get_limits(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AccountId>,
) -> ApiResult<LimitPool> {
    state.manager.pool(id).map(Json).map_err(reject)
}

/// GET /api/accounts/:id/limits/:kind
pub async fn get_limit(
    State(state): State<Arc<AppState>>,
    Path((id, kind)): Path<(AccountId, String)>,
) -> ApiResult<LimitSnapshot> {
    let kind = parse_kind(&kind)?;
    state.manager.snapshot(id, kind).map(Json).map_err(reject)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvaluateResponse {
    pub allowed: bool,
}

/// GET /api/accounts/:id/evaluate/:kind
pub async fn evaluate_create(
    State(state): State<Arc<AppState>>,
    Path((id, kind)): Path<(AccountId, String)>,
) -> ApiResult<EvaluateResponse> {
    let kind = parse_kind(&kind)?;
    state.manager.evaluate_create(id, kind).map_err(reject)?;
    Ok(Json(EvaluateResponse { allowed: true }))
}

/// GET /api/accounts/:id/roles - roles the account may assign
pub async fn assignable_roles(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AccountId>,
) -> ApiResult<Vec<Role>> {
    if state.manager.account(id).is_none() {
        return Err(reject(LimitsError::AccountNotFound(id)));
    }
    Ok(Json(state.manager.assignable_roles(id)))
}

/// Body of an allocation form: the child's new limits, keyed by kind name
/// (`mailboxes` or `mailboxes_limit`)
#[derive(Debug, Deserialize)]
pub struct AllocationRequest {
    pub parent: AccountId,
    pub limits: BTreeMap<String, u32>,
}

/// PUT /api/accounts/:id/allocations
pub async fn allocate(
    State(state): State<Arc<AppState>>,
    Path(child): Path<AccountId>,
    Json(payload): Json<AllocationRequest>,
) -> ApiResult<LimitPool> {
    let limits = payload
        .limits
        .iter()
        .map(|(name, value)| parse_kind(name).map(|kind| (kind, *value)))
        .collect::<Result<Vec<_>, _>>()?;

    state
        .manager
        .allocate(payload.parent, child, &limits)
        .map_err(reject)?;
    state.persist().await?;
    state.manager.pool(child).map(Json).map_err(reject)
}

/// POST /api/accounts/:id/reclaim
pub async fn reclaim(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AccountId>,
    Json(reason): Json<ReclaimReason>,
) -> ApiResult<ReclaimSummary> {
    let summary = state.manager.reclaim(id, reason);
    state.persist().await?;
    Ok(Json(summary))
}

/// POST /api/batches - apply raw counter changes atomically
pub async fn apply_batch(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<Batch>,
) -> Result<StatusCode, Rejection> {
    state.manager.apply_batch(&batch).map_err(reject)?;
    state.persist().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CreateDomainRequest {
    pub actor: AccountId,
    pub name: String,
    /// Also create the template's administrator and aliases
    #[serde(default)]
    pub from_template: bool,
}

/// POST /api/domains
pub async fn create_domain(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDomainRequest>,
) -> Result<(StatusCode, Json<TemplateOutcome>), Rejection> {
    let template = if payload.from_template {
        DomainTemplate::new(payload.name, &state.template)
    } else {
        DomainTemplate {
            name: payload.name,
            create_admin: false,
            alias_count: 0,
        }
    };
    let outcome = state
        .manager
        .create_domain_from_template(payload.actor, &template)
        .map_err(reject)?;
    state.persist().await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// DELETE /api/domains/:id
pub async fn delete_domain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DomainId>,
) -> Result<StatusCode, Rejection> {
    state.manager.delete_domain(id).map_err(reject)?;
    state.persist().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CreateResourceRequest {
    pub actor: AccountId,
    pub kind: String,
    pub holder: Option<AccountId>,
}

/// POST /api/domains/:id/resources
pub async fn create_resource(
    State(state): State<Arc<AppState>>,
    Path(domain): Path<DomainId>,
    Json(payload): Json<CreateResourceRequest>,
) -> Result<(StatusCode, Json<CreatedResponse<ResourceId>>), Rejection> {
    let kind = parse_kind(&payload.kind)?;
    let id = state
        .manager
        .create_resource(payload.actor, kind, domain, payload.holder)
        .map_err(reject)?;
    state.persist().await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

/// DELETE /api/resources/:id
pub async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ResourceId>,
) -> Result<StatusCode, Rejection> {
    state.manager.delete_resource(id).map_err(reject)?;
    state.persist().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/audit - counters that disagree with recorded objects
pub async fn audit(State(state): State<Arc<AppState>>) -> Json<Vec<AuditMismatch>> {
    Json(state.manager.audit())
}
