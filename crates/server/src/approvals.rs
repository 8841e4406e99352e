use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use signoff_core::approvals::{
    ApprovalDetail, ApprovalListItem, ApprovalService, CancelRequest, DecisionRequest, FlowFilter,
    InstanceFilter, SubmitRequest,
};
use signoff_core::domain::approval::{ApprovalInstance, ApprovalStatus};
use signoff_core::domain::document::BizType;
use signoff_core::domain::flow::FlowDefinition;
use signoff_core::domain::user::UserId;
use signoff_core::errors::{ApprovalError, InterfaceError};
use signoff_core::flows::RawFlowDefinition;

pub const CORRELATION_HEADER: &str = "x-correlation-id";
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct ApprovalsState {
    service: Arc<ApprovalService>,
}

pub fn router(service: Arc<ApprovalService>) -> Router {
    Router::new()
        .route("/api/approvals", post(submit).get(list))
        .route("/api/approvals/{id}", get(detail))
        .route("/api/approvals/{id}/decision", post(decide))
        .route("/api/approvals/{id}/cancel", post(cancel))
        .route("/api/approval-flows", get(list_flows).post(save_flow))
        .with_state(ApprovalsState { service })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn from_approval(error: ApprovalError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    fn validation(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::from_approval(ApprovalError::Validation(message.into()), correlation_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            kind: self.0.kind().to_string(),
            message: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request context
// ---------------------------------------------------------------------------

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn caller_id(headers: &HeaderMap, correlation_id: &str) -> ApiResult<String> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| {
            ApiError::validation(format!("{USER_HEADER} header is required"), correlation_id)
        })
}

fn body<T>(payload: Result<Json<T>, JsonRejection>, correlation_id: &str) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::validation(rejection.body_text(), correlation_id))
}

fn query<T>(params: Result<Query<T>, QueryRejection>, correlation_id: &str) -> ApiResult<T> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| ApiError::validation(rejection.body_text(), correlation_id))
}

// ---------------------------------------------------------------------------
// Approval handlers
// ---------------------------------------------------------------------------

pub async fn submit(
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApprovalInstance>)> {
    let correlation_id = correlation_id(&headers);
    let request = body(payload, &correlation_id)?;

    let instance = state
        .service
        .submit(request, &correlation_id)
        .await
        .map_err(|error| ApiError::from_approval(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// Body of a decision; the instance comes from the path.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionBody {
    pub action: signoff_core::domain::approval::DecisionAction,
    #[serde(default)]
    pub approver_id: String,
    #[serde(default)]
    pub approver_name: String,
    #[serde(default)]
    pub comment: Option<String>,
}

pub async fn decide(
    Path(id): Path<String>,
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
    payload: Result<Json<DecisionBody>, JsonRejection>,
) -> ApiResult<Json<ApprovalInstance>> {
    let correlation_id = correlation_id(&headers);
    let decision = body(payload, &correlation_id)?;
    let request = DecisionRequest {
        instance_id: id,
        action: decision.action,
        approver_id: decision.approver_id,
        approver_name: decision.approver_name,
        comment: decision.comment,
    };

    let outcome = state
        .service
        .decide(request, &correlation_id)
        .await
        .map_err(|error| ApiError::from_approval(error, &correlation_id))?;
    Ok(Json(outcome.instance))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBody {
    #[serde(default)]
    pub operator_id: String,
    #[serde(default)]
    pub comment: Option<String>,
}

pub async fn cancel(
    Path(id): Path<String>,
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
    payload: Result<Json<CancelBody>, JsonRejection>,
) -> ApiResult<Json<ApprovalInstance>> {
    let correlation_id = correlation_id(&headers);
    let cancel = body(payload, &correlation_id)?;
    let request =
        CancelRequest { instance_id: id, operator_id: cancel.operator_id, comment: cancel.comment };

    let instance = state
        .service
        .cancel(request, &correlation_id)
        .await
        .map_err(|error| ApiError::from_approval(error, &correlation_id))?;
    Ok(Json(instance))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub status: Option<String>,
    pub submitter_id: Option<String>,
    pub biz_type: Option<String>,
}

impl ListQuery {
    fn into_filter(self, correlation_id: &str) -> ApiResult<InstanceFilter> {
        let status = non_blank(self.status)
            .map(|value| ApprovalStatus::from_str(&value))
            .transpose()
            .map_err(|message| ApiError::validation(message, correlation_id))?;

        Ok(InstanceFilter {
            status,
            submitter_id: non_blank(self.submitter_id).map(UserId),
            biz_type: non_blank(self.biz_type).map(BizType::new),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub async fn list(
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
    params: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ApprovalListItem>>> {
    let correlation_id = correlation_id(&headers);
    let viewer = caller_id(&headers, &correlation_id)?;
    let filter = query(params, &correlation_id)?.into_filter(&correlation_id)?;

    let items = state
        .service
        .list_visible(&viewer, &filter, &correlation_id)
        .await
        .map_err(|error| ApiError::from_approval(error, &correlation_id))?;
    Ok(Json(items))
}

pub async fn detail(
    Path(id): Path<String>,
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
) -> ApiResult<Json<ApprovalDetail>> {
    let correlation_id = correlation_id(&headers);
    let viewer = caller_id(&headers, &correlation_id)?;

    let detail = state
        .service
        .detail(&id, &viewer, &correlation_id)
        .await
        .map_err(|error| ApiError::from_approval(error, &correlation_id))?;
    Ok(Json(detail))
}

// ---------------------------------------------------------------------------
// Flow administration
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowsQuery {
    pub biz_type: Option<String>,
    pub enabled: Option<bool>,
}

pub async fn list_flows(
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
    params: Result<Query<FlowsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<FlowDefinition>>> {
    let correlation_id = correlation_id(&headers);
    let params = query(params, &correlation_id)?;
    let filter = FlowFilter {
        biz_type: non_blank(params.biz_type).map(BizType::new),
        enabled: params.enabled,
    };

    let flows = state
        .service
        .list_flows(&filter)
        .await
        .map_err(|error| ApiError::from_approval(error, &correlation_id))?;
    Ok(Json(flows))
}

/// Flow edits are attributed to a directory user.
pub async fn save_flow(
    State(state): State<ApprovalsState>,
    headers: HeaderMap,
    payload: Result<Json<RawFlowDefinition>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<FlowDefinition>)> {
    let correlation_id = correlation_id(&headers);
    let actor = caller_id(&headers, &correlation_id)?;
    let raw = body(payload, &correlation_id)?;

    let actor = state
        .service
        .resolve_viewer(&actor)
        .await
        .map_err(|error| ApiError::from_approval(error, &correlation_id))?;
    let flow = state
        .service
        .save_flow(raw, actor.id.as_str(), &correlation_id)
        .await
        .map_err(|error| ApiError::from_approval(error, &correlation_id))?;

    let status = if flow.version == 1 { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(flow)))
}
