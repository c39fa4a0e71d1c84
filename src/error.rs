//! Application error types.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Application error carrying a kind and a small key/value payload.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Name or state collision
    Conflict,
    /// Unknown instance, service, session or path
    NotFound,
    /// Malformed request
    Validation,
    /// Child process, acquisition source or provisioning command failed
    External,
    /// Store failure
    Persistence,
    /// Grace period exceeded
    Timeout,
    /// Configuration error
    Config,
    /// File system error
    Io,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::Conflict => 1001,
            Self::NotFound => 1002,
            Self::Validation => 1003,
            Self::External => 3001,
            Self::Persistence => 3002,
            Self::Timeout => 3003,
            Self::Config => 2001,
            Self::Io => 2002,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn instance_not_found(id: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            HashMap::from([("instance".to_string(), id.to_string())]),
        )
    }

    pub fn service_not_found(instance_id: &str, service: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            HashMap::from([
                ("instance".to_string(), instance_id.to_string()),
                ("service".to_string(), service.to_string()),
            ]),
        )
    }

    pub fn session_not_found(key: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            HashMap::from([("session".to_string(), key.to_string())]),
        )
    }

    pub fn path_not_found(path: &Path) -> Self {
        Self::new(
            ErrorKind::NotFound,
            HashMap::from([("path".to_string(), path.display().to_string())]),
        )
    }

    pub fn service_path_not_found(service: &str, path: &Path) -> Self {
        Self::new(
            ErrorKind::NotFound,
            HashMap::from([
                ("service".to_string(), service.to_string()),
                ("path".to_string(), path.display().to_string()),
            ]),
        )
    }

    pub fn name_conflict(name: &str, existing_id: &str) -> Self {
        Self::new(
            ErrorKind::Conflict,
            HashMap::from([
                ("name".to_string(), name.to_string()),
                ("existing_id".to_string(), existing_id.to_string()),
            ]),
        )
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Conflict, message)
    }

    pub fn port_occupied(port: u16) -> Self {
        Self::new(
            ErrorKind::Conflict,
            HashMap::from([
                ("port".to_string(), port.to_string()),
                ("detail".to_string(), "port is already in use".to_string()),
            ]),
        )
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Validation,
            HashMap::from([
                ("field".to_string(), field.to_string()),
                ("detail".to_string(), message.into()),
            ]),
        )
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::External, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Persistence, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Timeout, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn payload(&self) -> &HashMap<String, String> {
        &self.payload
    }

    /// Human-readable message suitable for the `message` field of a response.
    pub fn message(&self) -> String {
        let label = match self.kind {
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not found",
            ErrorKind::Validation => "invalid request",
            ErrorKind::External => "external failure",
            ErrorKind::Persistence => "persistence failure",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Config => "configuration error",
            ErrorKind::Io => "i/o error",
        };
        if self.payload.is_empty() {
            return label.to_string();
        }
        let mut pairs: Vec<String> = self
            .payload
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        pairs.sort();
        format!("{}: {}", label, pairs.join(", "))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 4)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("kind", &self.kind)?;
        s.serialize_field("message", &self.message())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::external(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::external(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation("body", err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
