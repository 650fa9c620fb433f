use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::flags::flag_models::EvaluationResult;

/// Body of a `POST /flags` request: one user context, optionally narrowed
/// to specific flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlagsRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub flag_keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagDecision {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub reason: String,
}

impl From<EvaluationResult> for FlagDecision {
    fn from(result: EvaluationResult) -> Self {
        FlagDecision {
            enabled: result.enabled,
            variant: result.variant,
            reason: result.reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagsResponse {
    pub flags: HashMap<String, FlagDecision>,
}
