use std::net::SocketAddr;
use std::ops::Deref;
use std::str::FromStr;

use envconfig::Envconfig;

use crate::router::version::Version;
use crate::router::RouterConfig;

/// Lenient boolean parsing for env vars set by humans and templating
/// systems alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:3001")]
    pub address: SocketAddr,

    /// Local YAML flag definitions merged into the flag map at startup.
    /// Empty disables the local file.
    #[envconfig(from = "FLAGS_CONFIG_PATH", default = "")]
    pub flags_config_path: String,

    /// Remote flag definition endpoint, polled on an interval. Empty
    /// disables polling.
    #[envconfig(from = "REMOTE_CONFIG_URL", default = "")]
    pub remote_config_url: String,

    #[envconfig(from = "REMOTE_CONFIG_POLL_INTERVAL_SECS", default = "30")]
    pub remote_config_poll_interval_secs: u64,

    #[envconfig(from = "EVALUATION_CACHE_TTL_SECS", default = "60")]
    pub evaluation_cache_ttl_secs: u64,

    #[envconfig(default = "1000")]
    pub max_concurrency: usize,

    #[envconfig(from = "DEFAULT_VERSION", default = "1.0")]
    pub default_version: Version,

    #[envconfig(from = "USER_OVERRIDES_ENABLED", default = "true")]
    pub user_overrides_enabled: FlexBool,

    #[envconfig(default = "false")]
    pub debug: FlexBool,
}

impl Config {
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            default_version: self.default_version,
            user_overrides_enabled: *self.user_overrides_enabled,
            feature_flags: Default::default(),
            expose_error_messages: *self.debug,
        }
    }

    pub fn default_test_config() -> Self {
        Config {
            address: SocketAddr::from_str("127.0.0.1:0").unwrap(),
            flags_config_path: "".to_string(),
            remote_config_url: "".to_string(),
            remote_config_poll_interval_secs: 30,
            evaluation_cache_ttl_secs: 60,
            max_concurrency: 1000,
            default_version: Version::V1,
            user_overrides_enabled: FlexBool(true),
            debug: FlexBool(false),
        }
    }
}
