use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The two system generations a request can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Version {
    #[serde(rename = "1.0")]
    V1,
    #[serde(rename = "2.0")]
    V2,
}

impl Default for Version {
    fn default() -> Self {
        Version::V1
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Version::V1 => write!(f, "1.0"),
            Version::V2 => write!(f, "2.0"),
        }
    }
}

impl FromStr for Version {
    type Err = String;

    /// Strict: only the exact literals route; anything else is rejected so
    /// malformed headers fall through to the next detection rule.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" => Ok(Version::V1),
            "2.0" => Ok(Version::V2),
            other => Err(format!("unknown version: {other}")),
        }
    }
}
