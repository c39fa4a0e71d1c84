use std::collections::HashSet;

use crate::deploy::{DeploySpec, ServiceSpec};
use crate::error::{AppError, Result};
use crate::identity::is_valid_instance_id;
use crate::process::MAIN_ROLE;

pub fn validate_instance_id(instance_id: &str) -> Result<()> {
    if !is_valid_instance_id(instance_id) {
        return Err(AppError::validation("instance_id", "Invalid instance id"));
    }
    Ok(())
}

/// Check a deploy or register request before anything touches disk or the store.
pub fn validate_deploy_spec(spec: &DeploySpec) -> Result<()> {
    validate_name("name", &spec.name)?;
    validate_version_tag(&spec.version)?;
    validate_path("install_path", &spec.install_path)?;
    validate_port("port", spec.port)?;

    let mut seen = HashSet::new();
    for service in &spec.services {
        validate_service_spec(service)?;
        if !seen.insert(service.name.trim()) {
            return Err(AppError::validation(
                "services",
                format!("Duplicate service name '{}'", service.name.trim()),
            ));
        }
    }
    Ok(())
}

fn validate_service_spec(service: &ServiceSpec) -> Result<()> {
    validate_name("services.name", &service.name)?;
    let name = service.name.trim();
    if name.contains('_') {
        return Err(AppError::validation(
            "services.name",
            format!("Service name '{}' must not contain '_'", name),
        ));
    }
    if name == MAIN_ROLE {
        return Err(AppError::validation(
            "services.name",
            format!("'{}' is reserved for the instance process", MAIN_ROLE),
        ));
    }
    validate_path("services.path", &service.path)?;
    validate_port("services.port", service.port)
}

fn validate_name(field: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AppError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn validate_path(field: &str, path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(AppError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn validate_port(field: &str, port: u32) -> Result<()> {
    if port == 0 || port > u32::from(u16::MAX) {
        return Err(AppError::validation(
            field,
            format!("port {} is outside 1-65535", port),
        ));
    }
    Ok(())
}

pub fn validate_version_tag(version: &str) -> Result<()> {
    let is_safe = !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+' | '/'));

    if !is_safe {
        return Err(AppError::validation(
            "version",
            format!("'{}' is not a valid version label", version),
        ));
    }
    Ok(())
}

/// Split a session key `{instance_id}_{role}` on its last underscore.
pub fn parse_session_key(key: &str) -> Result<(&str, &str)> {
    match key.rsplit_once('_') {
        Some((instance_id, role)) if !instance_id.is_empty() && !role.is_empty() => {
            Ok((instance_id, role))
        }
        _ => Err(AppError::validation(
            "session_key",
            format!("'{}' is not of the form <instance>_<role>", key),
        )),
    }
}
