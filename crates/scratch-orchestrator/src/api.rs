//! HTTP surface. Handlers only translate between JSON and [`SessionManager`].

use std::path::Path;

use axum::{
    Extension, Json, Router,
    extract::{Path as UrlPath, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use scratch_session::{CreatedSession, SessionView};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;

use crate::{
    error::SessionError,
    error_payload::ErrorBody,
    request_meta::{self, RequestMeta},
    session_manager::SessionManager,
};

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
}

pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/session", post(create_session))
        .route("/sessions", get(list_sessions))
        .route("/session/:id", delete(destroy_session))
        .route("/volumes/:name", delete(remove_volume))
        .fallback_service(ServeDir::new(static_dir))
        .layer(middleware::from_fn(request_meta::request_id))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SessionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SessionError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::ProvisioningFailed { .. } | SessionError::Runtime(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "request failed");
        }

        let mut body = ErrorBody::new(self.0.code(), self.0.to_string());
        if let SessionError::CapacityExceeded { .. } = self.0 {
            body = body.with_hint("retry once another session has been destroyed");
        }
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    name: Option<String>,
}

async fn create_session(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<CreatedSession>), ApiError> {
    let name = body.and_then(|Json(b)| b.name).unwrap_or_default();
    tracing::debug!(request_id = %meta.request_id, "create session");
    let created = state.sessions.create(&name).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_sessions(State(state): State<AppState>) -> Result<Json<Vec<SessionView>>, ApiError> {
    Ok(Json(state.sessions.list().await?))
}

#[derive(Debug, Serialize)]
struct OkBody {
    ok: bool,
}

async fn destroy_session(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<OkBody>, ApiError> {
    state.sessions.destroy(&id).await?;
    Ok(Json(OkBody { ok: true }))
}

async fn remove_volume(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
) -> Result<Json<OkBody>, ApiError> {
    state.sessions.remove_volume(&name).await?;
    Ok(Json(OkBody { ok: true }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthzPool {
    start: u16,
    end: u16,
    capacity: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    profile: &'static str,
    url_mode: &'static str,
    runtime_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime_error: Option<String>,
    pool: HealthzPool,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthzResponse> {
    let runtime = state.sessions.ping().await;
    let pool = state.sessions.pool();
    Json(HealthzResponse {
        status: if runtime.is_ok() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        profile: state.sessions.profile().as_str(),
        url_mode: state.sessions.url_mode(),
        runtime_ok: runtime.is_ok(),
        runtime_error: runtime.err().map(|e| e.to_string()),
        pool: HealthzPool {
            start: pool.start,
            end: pool.end,
            capacity: pool.len(),
        },
    })
}
