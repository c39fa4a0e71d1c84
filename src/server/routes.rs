use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use super::{ApiError, ApiResponse, ApiResult, SharedState};
use crate::commands::InstanceSummary;
use crate::deploy::{DeploySpec, DeploymentSnapshot, ServiceOffering};
use crate::error::AppError;
use crate::process::{InstanceStats, StopOutcome};

#[derive(Debug, Serialize)]
pub(super) struct InstanceRef {
    instance_id: String,
}

#[derive(Debug, Serialize)]
pub(super) struct Started {
    instance_id: String,
    pid: u32,
}

#[derive(Debug, Serialize)]
pub(super) struct Health {
    status: &'static str,
    version: &'static str,
    instances: InstanceStats,
}

/// Undecodable bodies become `Validation` errors like any other bad field.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::validation("body", rejection.body_text()).into())
}

pub(super) async fn deploy(
    State(state): State<SharedState>,
    payload: Result<Json<DeploySpec>, JsonRejection>,
) -> ApiResult<InstanceRef> {
    let spec = body(payload)?;
    let instance_id = state.deploy(&spec)?;
    Ok(ApiResponse::ok(
        "Deployment started",
        InstanceRef { instance_id },
    ))
}

pub(super) async fn install_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<DeploymentSnapshot> {
    let snapshot = state.deployment_status(&id)?;
    Ok(ApiResponse::ok(snapshot.message.clone(), snapshot))
}

pub(super) async fn versions(State(state): State<SharedState>) -> ApiResult<Vec<String>> {
    let versions = state.available_versions().await;
    Ok(ApiResponse::ok(
        format!("{} versions available", versions.len()),
        versions,
    ))
}

pub(super) async fn services(State(state): State<SharedState>) -> ApiResult<Vec<ServiceOffering>> {
    Ok(ApiResponse::ok("Available services", state.available_services()))
}

pub(super) async fn register_instance(
    State(state): State<SharedState>,
    payload: Result<Json<DeploySpec>, JsonRejection>,
) -> ApiResult<InstanceRef> {
    let spec = body(payload)?;
    let instance_id = state.register_existing(&spec)?;
    Ok(ApiResponse::ok(
        format!("Instance {} registered", spec.name.trim()),
        InstanceRef { instance_id },
    ))
}

pub(super) async fn list_instances(
    State(state): State<SharedState>,
) -> ApiResult<Vec<InstanceSummary>> {
    let instances = state.list_instances()?;
    Ok(ApiResponse::ok(
        format!("{} instances", instances.len()),
        instances,
    ))
}

pub(super) async fn instance_stats(State(state): State<SharedState>) -> ApiResult<InstanceStats> {
    Ok(ApiResponse::ok("Instance statistics", state.instance_stats()?))
}

pub(super) async fn start_instance(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Started> {
    let pid = state.start_instance(&id).await?;
    Ok(ApiResponse::ok(
        format!("Instance {} started", id),
        Started {
            instance_id: id,
            pid,
        },
    ))
}

pub(super) async fn stop_instance(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<InstanceRef> {
    let message = match state.stop_instance(&id).await? {
        StopOutcome::AlreadyStopped => format!("Instance {} was not running", id),
        StopOutcome::Graceful => format!("Instance {} stopped", id),
        StopOutcome::Forced => format!("Instance {} killed after its grace period", id),
    };
    Ok(ApiResponse::ok(message, InstanceRef { instance_id: id }))
}

pub(super) async fn restart_instance(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Started> {
    let pid = state.restart_instance(&id).await?;
    Ok(ApiResponse::ok(
        format!("Instance {} restarted", id),
        Started {
            instance_id: id,
            pid,
        },
    ))
}

pub(super) async fn delete_instance(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<InstanceRef> {
    state.delete_instance(&id).await?;
    Ok(ApiResponse::ok(
        format!("Instance {} deleted", id),
        InstanceRef { instance_id: id },
    ))
}

pub(super) async fn health(State(state): State<SharedState>) -> ApiResult<Health> {
    Ok(ApiResponse::ok(
        "ok",
        Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            instances: state.instance_stats()?,
        },
    ))
}
