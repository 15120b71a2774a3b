use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use fast_track_core::api::{
    DeleteSessionResponse, EmailQuery, SaveSessionResponse, SendLinksRequest, SendLinksResponse,
    SessionsByEmailResponse,
};
use fast_track_core::{is_valid_email, is_valid_session_id, validate_target_duration, Session};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::mail::{render_session_links, Mailer, OutgoingEmail, SESSION_LINKS_SUBJECT};
use crate::storage::{sessions_for_email, SessionStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub mailer: Arc<dyn Mailer>,
    pub public_base_url: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/sessions/by-email", get(sessions_by_email))
        .route(
            "/sessions/:id",
            get(get_session).post(save_session).delete(delete_session),
        )
        .route("/email/send-links", post(send_links))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

fn ensure_session_id(id: &str) -> Result<(), ApiError> {
    if is_valid_session_id(id) {
        Ok(())
    } else {
        Err(ApiError::BadRequest("Invalid session id".into()))
    }
}

fn ensure_email(email: Option<&str>, missing: &str) -> Result<String, ApiError> {
    let email = email.map(str::trim).filter(|e| !e.is_empty());
    match email {
        None => Err(ApiError::BadRequest(missing.into())),
        Some(email) if !is_valid_email(email) => {
            Err(ApiError::BadRequest("Invalid email format".into()))
        }
        Some(email) => Ok(email.to_string()),
    }
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Session> {
    ensure_session_id(&id)?;
    match state.store.get(&id).await {
        Ok(Some(session)) => Ok(Json(session)),
        Ok(None) => Err(ApiError::NotFound("Session not found")),
        Err(err) => Err(ApiError::internal("Failed to load session", err)),
    }
}

/// Replaces the whole record and restarts its expiry.
pub async fn save_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Session>, JsonRejection>,
) -> ApiResult<SaveSessionResponse> {
    ensure_session_id(&id)?;
    let Json(session) =
        payload.map_err(|err| ApiError::BadRequest(format!("Invalid session body: {err}")))?;
    if session.id != id {
        return Err(ApiError::BadRequest(
            "Session id does not match the URL".into(),
        ));
    }
    validate_target_duration(session.target_duration)
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    state
        .store
        .put(&session)
        .await
        .map_err(|err| ApiError::internal("Failed to save session", err))?;
    debug!(session_id = %id, revision = session.revision, "session saved");
    Ok(Json(SaveSessionResponse { success: true, id }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DeleteSessionResponse> {
    ensure_session_id(&id)?;
    state
        .store
        .delete(&id)
        .await
        .map_err(|err| ApiError::internal("Failed to delete session", err))?;
    debug!(session_id = %id, "session deleted");
    Ok(Json(DeleteSessionResponse { success: true }))
}

pub async fn sessions_by_email(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> ApiResult<SessionsByEmailResponse> {
    let email = ensure_email(query.email.as_deref(), "Email parameter is required")?;
    let sessions = sessions_for_email(state.store.as_ref(), &email)
        .await
        .map_err(|err| ApiError::internal("Failed to fetch sessions", err))?;
    if sessions.is_empty() {
        return Err(ApiError::NotFound("No sessions found for this email"));
    }
    Ok(Json(SessionsByEmailResponse { sessions }))
}

pub async fn send_links(
    State(state): State<AppState>,
    payload: Result<Json<SendLinksRequest>, JsonRejection>,
) -> ApiResult<SendLinksResponse> {
    let Json(request) =
        payload.map_err(|err| ApiError::BadRequest(format!("Invalid request body: {err}")))?;
    let email = ensure_email(request.email.as_deref(), "Email is required")?;

    let sessions = sessions_for_email(state.store.as_ref(), &email)
        .await
        .map_err(|err| ApiError::internal("Failed to send email", err))?;
    if sessions.is_empty() {
        return Err(ApiError::NotFound("No sessions found"));
    }

    let html = render_session_links(&sessions, &state.public_base_url)
        .map_err(|err| ApiError::internal("Failed to send email", err))?;
    state
        .mailer
        .send(OutgoingEmail {
            to: email.clone(),
            subject: SESSION_LINKS_SUBJECT.to_string(),
            html,
        })
        .await
        .map_err(|err| ApiError::internal("Failed to send email", err))?;

    let count = sessions.len();
    info!(session_count = count, "session links emailed");
    Ok(Json(SendLinksResponse {
        success: true,
        session_count: count,
        message: format!("Sent {count} session link(s) to {email}"),
    }))
}
