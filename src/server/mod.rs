//! HTTP and WebSocket surface over [`AppState`].

mod routes;
mod ws;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::commands::AppState;
use crate::config::ServerConfig;
use crate::error::{AppError, ErrorKind, Result};

pub type SharedState = Arc<AppState>;

/// Body of every JSON response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AppError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        })
    }
}

/// An [`AppError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::External | ErrorKind::Persistence | ErrorKind::Config | ErrorKind::Io => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        } else {
            log::debug!("Request rejected: {}", self.0);
        }
        let body = ApiResponse::<()> {
            success: false,
            message: self.0.message(),
            data: None,
            error: Some(self.0),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

pub fn router(state: SharedState, api_prefix: &str) -> Router {
    let api = Router::new()
        .route("/deploy", post(routes::deploy))
        .route("/install-status/:id", get(routes::install_status))
        .route("/versions", get(routes::versions))
        .route("/services", get(routes::services))
        .route("/instances", get(routes::list_instances))
        .route("/instances/register", post(routes::register_instance))
        .route("/instances/stats", get(routes::instance_stats))
        .route("/instances/:id", delete(routes::delete_instance))
        .route("/instances/:id/start", post(routes::start_instance))
        .route("/instances/:id/stop", post(routes::stop_instance))
        .route("/instances/:id/restart", post(routes::restart_instance))
        .route("/system/health", get(routes::health))
        .route("/ws/:session_key", get(ws::session_socket))
        .with_state(state);

    let prefix = api_prefix.trim_end_matches('/');
    let app = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(prefix, api)
    };
    app.layer(CorsLayer::permissive())
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(state: SharedState, config: &ServerConfig, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| {
            AppError::config(format!(
                "Failed to bind {}:{}: {}",
                config.host, config.port, e
            ))
        })?;
    log::info!(
        "Listening on http://{}:{}{}",
        config.host,
        config.port,
        config.api_prefix
    );

    axum::serve(listener, router(state, &config.api_prefix))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::io(format!("Server error: {}", e)))
}
