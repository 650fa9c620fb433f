use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::router::version::Version;

/// The header both detection and tagging use.
pub const VERSION_HEADER: &str = "x-flcm-version";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RequestUser {
    pub id: String,
    #[serde(default)]
    pub preferred_version: Option<Version>,
}

/// A request as handed over by the HTTP-layer collaborator.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VersionRequest {
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub user: Option<RequestUser>,
}

impl VersionRequest {
    pub fn new(method: &str, path: &str) -> Self {
        VersionRequest {
            path: path.to_string(),
            method: method.to_string(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_user(mut self, id: &str, preferred_version: Option<Version>) -> Self {
        self.user = Some(RequestUser {
            id: id.to_string(),
            preferred_version,
        });
        self
    }

    /// Case-insensitive header lookup, since collaborators disagree on
    /// header-name casing.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_string(), value.to_string());
    }
}

/// What comes back out of the routing pipeline, whatever happened inside.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VersionResponse {
    pub status: u16,
    pub body: serde_json::Value,
    pub version: Version,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
}

impl VersionResponse {
    pub fn ok(body: serde_json::Value, version: Version) -> Self {
        VersionResponse {
            status: 200,
            body,
            version,
            processing_time: None,
        }
    }
}
