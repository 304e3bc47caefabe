use crate::credential::{is_valid_token_shape, CredentialStore};
use crate::service::ServiceStatus;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct DesktopState {
    pub project: String,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub credentials: Arc<CredentialStore>,
}

#[derive(Debug, Deserialize)]
pub struct SaveTokenRequest {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveTokenResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthCheckResponse {
    pub needs_auth: bool,
    pub is_desktop: bool,
}

/// Orchestration endpoints every embedded instance serves.
pub(crate) fn desktop_routes(state: DesktopState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/auth-check", get(auth_check))
        .route(
            "/save-token",
            post(save_token).fallback(save_token_method_not_allowed),
        )
        .with_state(state)
}

async fn status(State(state): State<DesktopState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        running: true,
        project_key: Some(state.project.clone()),
        port: state.port,
        has_project: !state.project.is_empty(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds().max(0) as u64,
    })
}

async fn auth_check(State(state): State<DesktopState>) -> Json<AuthCheckResponse> {
    let needs_auth = match state.credentials.get(&state.project) {
        Ok(token) => token.is_none(),
        Err(e) => {
            tracing::warn!("Credential lookup failed during auth check: {}", e);
            true
        }
    };
    Json(AuthCheckResponse {
        needs_auth,
        is_desktop: true,
    })
}

fn reply(status: StatusCode, success: bool, message: &str) -> (StatusCode, Json<SaveTokenResponse>) {
    (
        status,
        Json(SaveTokenResponse {
            success,
            message: message.to_string(),
        }),
    )
}

async fn save_token(
    State(state): State<DesktopState>,
    body: Result<Json<SaveTokenRequest>, JsonRejection>,
) -> (StatusCode, Json<SaveTokenResponse>) {
    let token = match body {
        Ok(Json(SaveTokenRequest { token: Some(token) })) if !token.is_empty() => token,
        Ok(_) => return reply(StatusCode::BAD_REQUEST, false, "Missing token"),
        Err(rejection) => {
            tracing::debug!("Rejected save-token body: {}", rejection);
            return reply(StatusCode::BAD_REQUEST, false, "Invalid request body");
        }
    };

    if !is_valid_token_shape(&token) {
        return reply(StatusCode::BAD_REQUEST, false, "Invalid token format");
    }
    if state.project.is_empty() {
        return reply(StatusCode::BAD_REQUEST, false, "No project loaded");
    }

    // Respond first; the write lands asynchronously
    let credentials = state.credentials.clone();
    let project = state.project.clone();
    tokio::spawn(async move {
        let result =
            tokio::task::spawn_blocking(move || credentials.set(&project, &token)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to persist token: {}", e),
            Err(e) => tracing::warn!("Token persistence task failed: {}", e),
        }
    });

    reply(StatusCode::OK, true, "Token saved")
}

async fn save_token_method_not_allowed() -> (StatusCode, Json<SaveTokenResponse>) {
    reply(StatusCode::METHOD_NOT_ALLOWED, false, "Method not allowed")
}
