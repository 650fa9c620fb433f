use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::router::version::Version;

/// Engine-side failures. Flag evaluation itself never surfaces these (it
/// always degrades to a result object); they cover the fallible edges:
/// config loading, request parsing, remote fetches.
#[derive(Error, Debug)]
pub enum FlagError {
    #[error("failed to parse request: {0}")]
    RequestParsingError(#[from] serde_json::Error),
    #[error("No user_id in request")]
    MissingUserId,
    #[error("failed to read flags config file: {0}")]
    ConfigFileUnreadable(String),
    #[error("failed to parse flags config: {0}")]
    ConfigParsingError(#[from] serde_yaml::Error),
    #[error("remote config unavailable: {0}")]
    RemoteConfigUnavailable(String),
}

impl FlagError {
    /// (error_code, status_code) in one place so codes and statuses cannot
    /// drift apart as variants are added.
    fn error_metadata(&self) -> (&'static str, StatusCode) {
        match self {
            FlagError::RequestParsingError(_) => {
                ("request_parsing_error", StatusCode::BAD_REQUEST)
            }
            FlagError::MissingUserId => ("missing_user_id", StatusCode::BAD_REQUEST),
            FlagError::ConfigFileUnreadable(_) => {
                ("config_file_unreadable", StatusCode::INTERNAL_SERVER_ERROR)
            }
            FlagError::ConfigParsingError(_) => {
                ("config_parsing_error", StatusCode::INTERNAL_SERVER_ERROR)
            }
            FlagError::RemoteConfigUnavailable(_) => {
                ("remote_config_unavailable", StatusCode::SERVICE_UNAVAILABLE)
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        self.error_metadata().0
    }

    pub fn status_code(&self) -> StatusCode {
        self.error_metadata().1
    }
}

impl IntoResponse for FlagError {
    fn into_response(self) -> Response {
        let (code, status) = self.error_metadata();
        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Failures inside the version routing pipeline. These never escape
/// `VersionRouter::route` as errors: the router's error handler converts
/// every one of them into a structured response.
#[derive(Error, Debug)]
pub enum RouterError {
    /// Thrown deliberately by handlers and validators, carries its own
    /// status and optionally the version that produced it.
    #[error("{message}")]
    Version {
        message: String,
        status: u16,
        version: Option<Version>,
    },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("handler timed out: {0}")]
    Timeout(String),
    #[error("no handler registered for version {0}")]
    HandlerNotRegistered(Version),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    fn error_metadata(&self) -> (&'static str, u16) {
        match self {
            RouterError::Version { status, .. } => ("version_error", *status),
            RouterError::Validation(_) => ("validation_error", 400),
            RouterError::Timeout(_) => ("timeout", 504),
            RouterError::HandlerNotRegistered(_) => ("handler_not_registered", 500),
            RouterError::Internal(_) => ("internal_error", 500),
        }
    }

    pub fn error_code(&self) -> &'static str {
        self.error_metadata().0
    }

    pub fn status_code(&self) -> u16 {
        self.error_metadata().1
    }

    /// The version to stamp on the error response, when the error knows it.
    pub fn version_hint(&self) -> Option<Version> {
        match self {
            RouterError::Version { version, .. } => *version,
            _ => None,
        }
    }
}
