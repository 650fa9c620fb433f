pub mod detector;
pub mod middleware;
pub mod models;
pub mod version;
pub mod version_router;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::router::version::Version;

/// Routing policy, loaded by the embedding application's config layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub default_version: Version,
    /// Honor `user.preferred_version` on requests.
    #[serde(default = "default_true")]
    pub user_overrides_enabled: bool,
    /// Static flag switches consulted for flag-gated path segments.
    #[serde(default)]
    pub feature_flags: HashMap<String, bool>,
    /// Include original error messages in error responses. Off in
    /// production, where responses must not leak internals.
    #[serde(default)]
    pub expose_error_messages: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_version: Version::V1,
            user_overrides_enabled: true,
            feature_flags: HashMap::new(),
            expose_error_messages: false,
        }
    }
}
