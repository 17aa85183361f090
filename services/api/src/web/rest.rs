//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the research session REST endpoints and the
//! master definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use research_core::domain::{
    NewResearchSession, ResearchSession, ResearchSessionUpdate, ResearchStatus, SessionFilter,
    ValidationError,
};
use research_core::ports::PortError;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        create_research_session_handler,
        list_research_sessions_handler,
        get_research_session_handler,
        update_research_session_handler,
        delete_research_session_handler,
        start_research_session_handler,
        complete_research_session_handler,
        fail_research_session_handler,
        follow_up_research_session_handler,
    ),
    components(
        schemas(
            ResearchSessionResponse,
            CreateResearchSessionRequest,
            UpdateResearchSessionRequest,
            StartResearchRequest,
            CompleteResearchRequest,
            FollowUpRequest,
            ErrorResponse,
        )
    ),
    tags(
        (
            name = "Research Sessions API",
            description = "Lifecycle tracking for long-running research queries."
        )
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A research session as returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResearchSessionResponse {
    pub id: Uuid,
    pub user_id: i64,
    pub original_query: String,
    /// One of PENDING, RUNNING, COMPLETED, FAILED.
    #[schema(example = "PENDING")]
    pub status: String,
    #[schema(example = "Pending")]
    pub status_label: String,
    pub final_report: Option<String>,
    pub parent_research: Option<Uuid>,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ResearchSession> for ResearchSessionResponse {
    fn from(s: ResearchSession) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            original_query: s.original_query,
            status: s.status.as_str().to_string(),
            status_label: s.status.label().to_string(),
            final_report: s.final_report,
            parent_research: s.parent_research,
            trace_id: s.trace_id,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// Payload for submitting a research query. `user_id` and `original_query` are required.
#[derive(Deserialize, ToSchema)]
pub struct CreateResearchSessionRequest {
    pub user_id: Option<i64>,
    pub original_query: Option<String>,
    pub parent_research: Option<Uuid>,
    pub trace_id: Option<String>,
}

/// Partial update. Absent fields are left alone; `null` clears an optional field.
#[derive(Deserialize, ToSchema)]
pub struct UpdateResearchSessionRequest {
    #[schema(example = "RUNNING")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub final_report: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub trace_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub parent_research: Option<Option<Uuid>>,
}

#[derive(Default, Deserialize, ToSchema)]
pub struct StartResearchRequest {
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct CompleteResearchRequest {
    pub final_report: Option<String>,
}

/// Payload for continuing an existing session. The owner defaults to the parent's.
#[derive(Deserialize, ToSchema)]
pub struct FollowUpRequest {
    pub user_id: Option<i64>,
    pub original_query: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListResearchSessionsQuery {
    pub user_id: Option<i64>,
    /// One of PENDING, RUNNING, COMPLETED, FAILED.
    pub status: Option<String>,
    pub parent_research: Option<Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn port_error(e: PortError) -> HandlerError {
    let status = match &e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Validation(_) => StatusCode::BAD_REQUEST,
        PortError::Conflict(_) | PortError::InvalidTransition { .. } => StatusCode::CONFLICT,
        PortError::Unexpected(_) => {
            error!("Research session request failed: {:?}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Internal server error".to_string(),
                }),
            );
        }
    };
    (status, Json(ErrorResponse { error: e.to_string() }))
}

/// Malformed or mistyped JSON is a client error like any other validation failure.
fn json_rejection(rejection: JsonRejection) -> HandlerError {
    let status = match rejection.status() {
        StatusCode::UNPROCESSABLE_ENTITY => StatusCode::BAD_REQUEST,
        other => other,
    };
    (
        status,
        Json(ErrorResponse {
            error: rejection.body_text(),
        }),
    )
}

/// `Json` whose rejections use the same `{"error": ...}` body as every other failure.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = HandlerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(json_rejection)?;
        Ok(Self(value))
    }
}

fn invalid(e: ValidationError) -> HandlerError {
    port_error(e.into())
}

fn parse_status(raw: Option<String>) -> Result<Option<ResearchStatus>, HandlerError> {
    raw.map(|s| s.parse::<ResearchStatus>())
        .transpose()
        .map_err(invalid)
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe.
#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is up")))]
pub async fn health_handler() -> &'static str {
    "ok"
}

/// Submit a new research query.
#[utoipa::path(
    post,
    path = "/research-sessions",
    request_body = CreateResearchSessionRequest,
    responses(
        (status = 201, description = "Research session created", body = ResearchSessionResponse),
        (status = 400, description = "Missing or invalid field", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_research_session_handler(
    State(app_state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateResearchSessionRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let mut new =
        NewResearchSession::from_fields(req.user_id, req.original_query).map_err(invalid)?;
    new.parent_research = req.parent_research;
    new.trace_id = req.trace_id;

    let session = app_state.lifecycle.submit(new).await.map_err(port_error)?;
    Ok((StatusCode::CREATED, Json(ResearchSessionResponse::from(session))))
}

/// List research sessions, most recent first.
#[utoipa::path(
    get,
    path = "/research-sessions",
    params(ListResearchSessionsQuery),
    responses(
        (
            status = 200,
            description = "Matching research sessions",
            body = Vec<ResearchSessionResponse>
        ),
        (status = 400, description = "Invalid filter", body = ErrorResponse)
    )
)]
pub async fn list_research_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ListResearchSessionsQuery>,
) -> Result<Json<Vec<ResearchSessionResponse>>, HandlerError> {
    let filter = SessionFilter {
        user_id: query.user_id,
        status: parse_status(query.status)?,
        parent_research: query.parent_research,
        limit: query.limit,
        offset: query.offset,
    };
    let sessions = app_state.db.list(&filter).await.map_err(port_error)?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

/// Fetch one research session.
#[utoipa::path(
    get,
    path = "/research-sessions/{id}",
    params(("id" = Uuid, Path, description = "Research session id")),
    responses(
        (status = 200, description = "The research session", body = ResearchSessionResponse),
        (status = 404, description = "No such session", body = ErrorResponse)
    )
)]
pub async fn get_research_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResearchSessionResponse>, HandlerError> {
    let session = app_state.db.get(id).await.map_err(port_error)?;
    Ok(Json(session.into()))
}

/// Modify fields directly. No lifecycle checks are applied; use the transition
/// endpoints for that.
#[utoipa::path(
    patch,
    path = "/research-sessions/{id}",
    params(("id" = Uuid, Path, description = "Research session id")),
    request_body = UpdateResearchSessionRequest,
    responses(
        (status = 200, description = "Updated research session", body = ResearchSessionResponse),
        (status = 400, description = "Invalid field", body = ErrorResponse),
        (status = 404, description = "No such session", body = ErrorResponse)
    )
)]
pub async fn update_research_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<UpdateResearchSessionRequest>,
) -> Result<Json<ResearchSessionResponse>, HandlerError> {
    let changes = ResearchSessionUpdate {
        status: parse_status(req.status)?,
        final_report: req.final_report,
        trace_id: req.trace_id,
        parent_research: req.parent_research,
    };
    let session = app_state.db.update(id, changes).await.map_err(port_error)?;
    Ok(Json(session.into()))
}

/// Delete a research session. Follow-ups keep existing, detached from it.
#[utoipa::path(
    delete,
    path = "/research-sessions/{id}",
    params(("id" = Uuid, Path, description = "Research session id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "No such session", body = ErrorResponse)
    )
)]
pub async fn delete_research_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    app_state.db.delete(id).await.map_err(port_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Mark a pending session as running. The body may be omitted.
#[utoipa::path(
    post,
    path = "/research-sessions/{id}/start",
    params(("id" = Uuid, Path, description = "Research session id")),
    request_body(
        content = Option<StartResearchRequest>,
        description = "Optional; an empty body starts without a trace id"
    ),
    responses(
        (status = 200, description = "Session is running", body = ResearchSessionResponse),
        (status = 400, description = "Malformed body", body = ErrorResponse),
        (status = 404, description = "No such session", body = ErrorResponse),
        (status = 409, description = "Session is not pending", body = ErrorResponse)
    )
)]
pub async fn start_research_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<ResearchSessionResponse>, HandlerError> {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        StartResearchRequest::default()
    } else {
        let Json(req) = Json::<StartResearchRequest>::from_bytes(&body).map_err(json_rejection)?;
        req
    };
    let session = app_state
        .lifecycle
        .start(id, req.trace_id)
        .await
        .map_err(port_error)?;
    Ok(Json(session.into()))
}

/// Mark a running session as completed with its final report.
#[utoipa::path(
    post,
    path = "/research-sessions/{id}/complete",
    params(("id" = Uuid, Path, description = "Research session id")),
    request_body = CompleteResearchRequest,
    responses(
        (status = 200, description = "Session is completed", body = ResearchSessionResponse),
        (status = 400, description = "Missing report", body = ErrorResponse),
        (status = 404, description = "No such session", body = ErrorResponse),
        (status = 409, description = "Session is not running", body = ErrorResponse)
    )
)]
pub async fn complete_research_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<CompleteResearchRequest>,
) -> Result<Json<ResearchSessionResponse>, HandlerError> {
    let report = req
        .final_report
        .ok_or(ValidationError::MissingField("final_report"))
        .map_err(invalid)?;
    let session = app_state
        .lifecycle
        .complete(id, report)
        .await
        .map_err(port_error)?;
    Ok(Json(session.into()))
}

/// Mark a pending or running session as failed.
#[utoipa::path(
    post,
    path = "/research-sessions/{id}/fail",
    params(("id" = Uuid, Path, description = "Research session id")),
    responses(
        (status = 200, description = "Session is failed", body = ResearchSessionResponse),
        (status = 404, description = "No such session", body = ErrorResponse),
        (status = 409, description = "Session already finished", body = ErrorResponse)
    )
)]
pub async fn fail_research_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResearchSessionResponse>, HandlerError> {
    let session = app_state.lifecycle.fail(id).await.map_err(port_error)?;
    Ok(Json(session.into()))
}

/// Submit a new query that continues an existing session.
#[utoipa::path(
    post,
    path = "/research-sessions/{id}/follow-ups",
    params(("id" = Uuid, Path, description = "Parent research session id")),
    request_body = FollowUpRequest,
    responses(
        (status = 201, description = "Follow-up session created", body = ResearchSessionResponse),
        (status = 400, description = "Missing query", body = ErrorResponse),
        (status = 404, description = "No such parent session", body = ErrorResponse)
    )
)]
pub async fn follow_up_research_session_handler(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<FollowUpRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let original_query = req
        .original_query
        .ok_or(ValidationError::MissingField("original_query"))
        .map_err(invalid)?;
    let session = app_state
        .lifecycle
        .follow_up(id, req.user_id, original_query)
        .await
        .map_err(port_error)?;
    Ok((StatusCode::CREATED, Json(ResearchSessionResponse::from(session))))
}
