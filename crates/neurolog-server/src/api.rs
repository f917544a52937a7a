//! REST API endpoints for neurolog
//!
//! All endpoints are under /api/v1/ and return JSON. Rejected state changes
//! (marker during exclusive mode, second recording, inference without a
//! model) answer 409 with a stable `reason`.

use crate::patients::Patient;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Local;
use neurolog_core::marker::DEFAULT_EXCLUSIVE_DURATION;
use neurolog_core::{
    ExclusiveDuration, IntentCommand, LoggerError, Marker, MarkerRejection, PipelineStatus,
    RecordingSession, Task,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,
}

/// Handler error carrying its HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, reason: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                reason: reason.to_string(),
                message: message.into(),
                remaining_secs: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<MarkerRejection> for ApiError {
    fn from(rejection: MarkerRejection) -> Self {
        let (status, remaining_secs) = match &rejection {
            MarkerRejection::ExclusiveModeActive { remaining_secs } => {
                (StatusCode::CONFLICT, *remaining_secs)
            }
            MarkerRejection::NotManual(_) => (StatusCode::CONFLICT, None),
            MarkerRejection::InvalidDuration(_) => (StatusCode::BAD_REQUEST, None),
        };
        Self {
            status,
            body: ErrorResponse {
                reason: rejection.reason().to_string(),
                message: rejection.to_string(),
                remaining_secs,
            },
        }
    }
}

impl From<LoggerError> for ApiError {
    fn from(e: LoggerError) -> Self {
        match e {
            LoggerError::SessionAlreadyOpen { .. } => {
                ApiError::new(StatusCode::CONFLICT, "session_already_open", e.to_string())
            }
            _ => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "recording_io", e.to_string()),
        }
    }
}

/// Application status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    #[serde(flatten)]
    pub status: PipelineStatus,
    pub session: Option<SessionInfo>,
}

/// Open recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub patient_id: String,
    pub task: Task,
    pub started_at: String,
    pub path: PathBuf,
}

impl From<RecordingSession> for SessionInfo {
    fn from(s: RecordingSession) -> Self {
        Self {
            patient_id: s.patient_id,
            task: s.task,
            started_at: s.started_at.to_rfc3339(),
            path: s.path,
        }
    }
}

/// Intent response
#[derive(Debug, Serialize, Deserialize)]
pub struct IntentResponse {
    pub inference_active: bool,
    pub intent: Option<IntentCommand>,
    /// Wire form, e.g. `MOVE_LEFT:0.87`
    pub command: String,
}

/// Marker request, e.g. `{"marker": "T1"}`
#[derive(Debug, Deserialize)]
pub struct MarkerRequest {
    pub marker: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkerResponse {
    pub accepted: bool,
    pub marker: Marker,
}

/// Exclusive mode request; duration defaults to 300 s
#[derive(Debug, Default, Deserialize)]
pub struct ExclusiveRequest {
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExclusiveResponse {
    pub active: bool,
    pub remaining_secs: Option<u64>,
}

/// Recording start request
#[derive(Debug, Deserialize)]
pub struct RecordingRequest {
    pub patient_id: String,
    pub task: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordingStopResponse {
    pub closed: bool,
    pub path: Option<PathBuf>,
    pub samples_written: u64,
}

/// Inference toggle request
#[derive(Debug, Deserialize)]
pub struct InferenceRequest {
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub inference_active: bool,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: neurolog_core::VERSION.to_string(),
        status: state.pipeline.status(),
        session: state.pipeline.current_session().map(SessionInfo::from),
    })
}

/// GET /api/v1/intent
pub async fn get_intent(State(state): State<AppState>) -> Json<IntentResponse> {
    let intent = state.pipeline.latest_intent();
    Json(IntentResponse {
        inference_active: state.pipeline.status().inference_active,
        command: intent.unwrap_or(IntentCommand::NoIntent).to_string(),
        intent,
    })
}

/// POST /api/v1/markers
pub async fn post_marker(
    State(state): State<AppState>,
    Json(req): Json<MarkerRequest>,
) -> Result<Json<MarkerResponse>, ApiError> {
    let marker: Marker = req
        .marker
        .parse()
        .map_err(|e: neurolog_core::marker::UnknownMarker| {
            ApiError::new(StatusCode::BAD_REQUEST, "unknown_marker", e.to_string())
        })?;
    state.pipeline.set_marker(marker)?;
    tracing::info!(%marker, "Manual marker requested");
    Ok(Json(MarkerResponse {
        accepted: true,
        marker,
    }))
}

/// POST /api/v1/exclusive
pub async fn start_exclusive(
    State(state): State<AppState>,
    body: Option<Json<ExclusiveRequest>>,
) -> Result<Json<ExclusiveResponse>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let duration = req
        .duration_secs
        .map(ExclusiveDuration::seconds)
        .unwrap_or(ExclusiveDuration::Wall(DEFAULT_EXCLUSIVE_DURATION));
    state.pipeline.start_exclusive_mode(duration)?;
    Ok(Json(ExclusiveResponse {
        active: true,
        remaining_secs: state.pipeline.status().exclusive_mode_remaining_secs,
    }))
}

/// POST /api/v1/recording
pub async fn start_recording(
    State(state): State<AppState>,
    Json(req): Json<RecordingRequest>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let task: Task = req
        .task
        .parse()
        .map_err(|e: neurolog_core::recording::session::UnknownTask| {
            ApiError::new(StatusCode::BAD_REQUEST, "unknown_task", e.to_string())
        })?;
    let patient: Patient = state.patients.lookup(&req.patient_id).ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "unknown_patient",
            format!("no patient with id {}", req.patient_id),
        )
    })?;

    let started_at = Local::now();
    let path = state
        .layout
        .path_for(&patient.id, &patient.name, task, started_at)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, "invalid_patient_id", e.to_string()))?;
    let session = RecordingSession::started_at(patient.id, task, started_at, path);

    let pipeline = state.pipeline.clone();
    let opened = session.clone();
    tokio::task::spawn_blocking(move || pipeline.start_recording(opened))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()))??;

    Ok((StatusCode::CREATED, Json(SessionInfo::from(session))))
}

/// DELETE /api/v1/recording
pub async fn stop_recording(
    State(state): State<AppState>,
) -> Result<Json<RecordingStopResponse>, ApiError> {
    let pipeline = state.pipeline.clone();
    let summary = tokio::task::spawn_blocking(move || pipeline.stop_recording())
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()))??;

    Ok(Json(match summary {
        Some(s) => RecordingStopResponse {
            closed: true,
            path: Some(s.session.path),
            samples_written: s.samples_written,
        },
        None => RecordingStopResponse {
            closed: false,
            path: None,
            samples_written: 0,
        },
    }))
}

/// POST /api/v1/inference
pub async fn set_inference(
    State(state): State<AppState>,
    Json(req): Json<InferenceRequest>,
) -> Result<Json<InferenceResponse>, ApiError> {
    let active = state.pipeline.set_inference_active(req.active);
    if req.active && !active {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "model_unavailable",
            "no classifier model is loaded",
        ));
    }
    Ok(Json(InferenceResponse {
        inference_active: active,
    }))
}

/// GET /api/v1/patients
pub async fn list_patients(State(state): State<AppState>) -> Json<Vec<Patient>> {
    Json(state.patients.list())
}
