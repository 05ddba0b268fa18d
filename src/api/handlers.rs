use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::{Engine, EngineError, LogEntry};
use crate::model::{Acknowledgement, Action, CheckResult, CheckableEntity, EntityId, StateType};

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<Mutex<Engine>>,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn resolve(engine: &Engine, name: &str) -> Result<EntityId, ApiError> {
    Ok(engine.lookup(name)?)
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub entities: usize,
    pub pending_actions: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let engine = state.engine.lock();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        entities: engine.registry().len(),
        pending_actions: engine.pending_actions().count(),
    })
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct EntityInfo {
    pub id: EntityId,
    pub name: String,
    pub kind: String,
    pub state: String,
    pub state_type: StateType,
    pub attempt: u32,
    pub output: String,
    pub last_check: i64,
    pub next_check: i64,
    pub is_problem: bool,
    pub is_impact: bool,
    pub acknowledged: bool,
    pub in_downtime: bool,
    pub flapping: bool,
    pub business_impact: u8,
    pub current_event_id: u64,
    pub current_problem_id: u64,
}

impl From<&CheckableEntity> for EntityInfo {
    fn from(entity: &CheckableEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.full_name(),
            kind: entity.kind.to_string(),
            state: entity.state_label().to_string(),
            state_type: entity.state_type,
            attempt: entity.attempt,
            output: entity.output.clone(),
            last_check: entity.last_check,
            next_check: entity.next_check,
            is_problem: entity.is_problem,
            is_impact: entity.is_impact,
            acknowledged: entity.is_acknowledged(),
            in_downtime: entity.in_downtime(),
            flapping: entity.flap.is_flapping(),
            business_impact: entity.business_impact,
            current_event_id: entity.current_event_id,
            current_problem_id: entity.current_problem_id,
        }
    }
}

#[derive(Serialize)]
pub struct EntitiesResponse {
    pub entities: Vec<EntityInfo>,
}

pub async fn list_entities(State(state): State<Arc<AppState>>) -> Json<EntitiesResponse> {
    let engine = state.engine.lock();
    let entities = engine.registry().iter().map(EntityInfo::from).collect();
    Json(EntitiesResponse { entities })
}

pub async fn get_host(
    State(state): State<Arc<AppState>>,
    Path(host): Path<String>,
) -> Result<Json<EntityInfo>, ApiError> {
    entity_info(&state, &host)
}

pub async fn get_service(
    State(state): State<Arc<AppState>>,
    Path((host, service)): Path<(String, String)>,
) -> Result<Json<EntityInfo>, ApiError> {
    entity_info(&state, &format!("{}/{}", host, service))
}

fn entity_info(state: &AppState, name: &str) -> Result<Json<EntityInfo>, ApiError> {
    let engine = state.engine.lock();
    let id = resolve(&engine, name)?;
    Ok(Json(EntityInfo::from(engine.entity(id)?)))
}

// ============================================================================
// Check Results
// ============================================================================

#[derive(Deserialize)]
pub struct ResultRequest {
    /// `host` or `host/service`
    pub entity: String,
    #[serde(flatten)]
    pub result: CheckResult,
}

pub async fn submit_result(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResultRequest>,
) -> Result<Json<EntityInfo>, ApiError> {
    let mut engine = state.engine.lock();
    let id = resolve(&engine, &request.entity)?;
    engine.consume_result(id, request.result, now())?;
    Ok(Json(EntityInfo::from(engine.entity(id)?)))
}

// ============================================================================
// Acknowledgements and Downtimes
// ============================================================================

#[derive(Deserialize)]
pub struct AcknowledgeRequest {
    pub entity: String,
    pub author: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub notify: bool,
    #[serde(default)]
    pub expiry: Option<i64>,
}

pub async fn acknowledge(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<Json<EntityInfo>, ApiError> {
    let mut engine = state.engine.lock();
    let id = resolve(&engine, &request.entity)?;
    let acknowledgement = Acknowledgement {
        sticky: request.sticky,
        author: request.author,
        comment: request.comment,
        expiry: request.expiry,
        notify: request.notify,
    };
    engine.acknowledge(id, acknowledgement, now())?;
    Ok(Json(EntityInfo::from(engine.entity(id)?)))
}

#[derive(Deserialize)]
pub struct EntityRequest {
    pub entity: String,
}

pub async fn remove_acknowledgement(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EntityRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut engine = state.engine.lock();
    let id = resolve(&engine, &request.entity)?;
    let removed = engine.remove_acknowledgement(id, now())?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

#[derive(Deserialize)]
pub struct DowntimeRequest {
    pub entity: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub comment: String,
}

pub async fn start_downtime(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DowntimeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut engine = state.engine.lock();
    let id = resolve(&engine, &request.entity)?;
    let depth = engine.start_downtime(id, now(), &request.author, &request.comment)?;
    Ok(Json(serde_json::json!({ "downtime_depth": depth })))
}

pub async fn end_downtime(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EntityRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut engine = state.engine.lock();
    let id = resolve(&engine, &request.entity)?;
    let depth = engine.end_downtime(id, now())?;
    Ok(Json(serde_json::json!({ "downtime_depth": depth })))
}

pub async fn force_check(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EntityRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut engine = state.engine.lock();
    let id = resolve(&engine, &request.entity)?;
    let launched = engine.force_check(id, now())?;
    Ok(Json(serde_json::json!({ "launched": launched })))
}

// ============================================================================
// Actions and Notifications
// ============================================================================

#[derive(Serialize)]
pub struct ActionsResponse {
    pub actions: Vec<Action>,
}

pub async fn pending_actions(State(state): State<Arc<AppState>>) -> Json<ActionsResponse> {
    let engine = state.engine.lock();
    Json(ActionsResponse {
        actions: engine.pending_actions().cloned().collect(),
    })
}

/// Hand queued actions to an executor; they are removed from the queue
pub async fn drain_actions(State(state): State<Arc<AppState>>) -> Json<ActionsResponse> {
    Json(ActionsResponse {
        actions: state.engine.lock().drain_actions(),
    })
}

#[derive(Deserialize)]
pub struct NotificationResultRequest {
    pub entity: String,
    pub notification_id: u64,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub output: String,
}

pub async fn notification_completed(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NotificationResultRequest>,
) -> Result<StatusCode, ApiError> {
    let mut engine = state.engine.lock();
    let id = resolve(&engine, &request.entity)?;
    engine.notification_completed(
        id,
        request.notification_id,
        request.exit_code,
        &request.output,
        now(),
    )?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Audit Log
// ============================================================================

#[derive(Deserialize)]
pub struct LogQuery {
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

fn default_log_limit() -> usize {
    100
}

#[derive(Serialize)]
pub struct LogResponse {
    pub entries: Vec<LogEntry>,
}

pub async fn recent_log(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> Json<LogResponse> {
    Json(LogResponse {
        entries: state.engine.lock().audit().recent(query.limit),
    })
}

// ============================================================================
// Business Rules
// ============================================================================

#[derive(Deserialize)]
pub struct RuleRequest {
    pub expression: String,
}

#[derive(Serialize)]
pub struct RuleResponse {
    pub state: String,
    pub ordinal: u8,
}

pub async fn evaluate_rule(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RuleRequest>,
) -> Result<Json<RuleResponse>, ApiError> {
    let status = state
        .engine
        .lock()
        .evaluate_rule(&request.expression)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(Json(RuleResponse {
        state: status.label(crate::model::EntityKind::Service).to_string(),
        ordinal: status.ordinal(),
    }))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::UnknownEntity(_)
            | EngineError::UnknownEntityId(_)
            | EngineError::UnknownNotification { .. } => ApiError::NotFound(error.to_string()),
            EngineError::PassiveChecksDisabled(_)
            | EngineError::NothingToAcknowledge(_)
            | EngineError::NotInDowntime(_) => ApiError::Conflict(error.to_string()),
            EngineError::Graph(_) | EngineError::Rule(_) => ApiError::BadRequest(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
