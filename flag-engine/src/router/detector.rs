use tracing::debug;

use crate::router::models::{VersionRequest, VERSION_HEADER};
use crate::router::version::Version;
use crate::router::RouterConfig;

/// Path substrings that mark a request as belonging to the new system.
/// Checked before the legacy list, so ambiguous paths lean toward v2.
const V2_PATH_PATTERNS: &[&str] = &[
    "/v2/",
    "/mentor/",
    "/creator/",
    "/publisher/",
    "/framework/",
    "/obsidian/",
];

/// Path substrings that mark a request as legacy.
const V1_PATH_PATTERNS: &[&str] = &["/collector/", "/scholar/", "/agent/", "/v1/", "/legacy/"];

/// Path segments whose v2 treatment is gated on a router-config flag.
const FLAG_GATED_SEGMENTS: &[(&str, &str)] = &[
    ("mentor", "v2_mentor"),
    ("creator", "v2_creator"),
    ("publisher", "v2_publisher"),
    ("framework", "v2_framework"),
];

/// Decides which system generation should handle a request. The decision
/// list runs in strict priority order and the first match wins.
pub struct VersionDetector {
    config: RouterConfig,
}

impl VersionDetector {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn detect_version(&self, request: &VersionRequest) -> Version {
        // 1. Explicit header, only the exact literals count
        if let Some(header) = request.header(VERSION_HEADER) {
            if let Ok(version) = header.parse::<Version>() {
                debug!(%version, "version from header");
                return version;
            }
        }

        // 2. User preference, when the deployment allows overrides
        if self.config.user_overrides_enabled {
            if let Some(version) = request.user.as_ref().and_then(|user| user.preferred_version) {
                debug!(%version, "version from user preference");
                return version;
            }
        }

        // 3. Path patterns, v2 list first
        if V2_PATH_PATTERNS
            .iter()
            .any(|pattern| request.path.contains(pattern))
        {
            debug!(path = %request.path, "version from v2 path pattern");
            return Version::V2;
        }
        if V1_PATH_PATTERNS
            .iter()
            .any(|pattern| request.path.contains(pattern))
        {
            debug!(path = %request.path, "version from v1 path pattern");
            return Version::V1;
        }

        // 4. Flag-gated segments
        for (segment, flag) in FLAG_GATED_SEGMENTS {
            if request.path.contains(segment)
                && self.config.feature_flags.get(*flag).copied().unwrap_or(false)
            {
                debug!(path = %request.path, flag = *flag, "version from gated segment");
                return Version::V2;
            }
        }

        // 5. Configured default
        self.config.default_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn detector_with(config: RouterConfig) -> VersionDetector {
        VersionDetector::new(config)
    }

    fn default_detector() -> VersionDetector {
        detector_with(RouterConfig::default())
    }

    #[test]
    fn test_header_wins_over_everything() {
        let detector = default_detector();
        // A v1 path with an explicit v2 header routes to v2
        let request = VersionRequest::new("GET", "/collector/items")
            .with_header(VERSION_HEADER, "2.0")
            .with_user("u1", Some(Version::V1));
        assert_eq!(detector.detect_version(&request), Version::V2);
    }

    #[test]
    fn test_malformed_header_falls_through() {
        let detector = default_detector();
        let request = VersionRequest::new("GET", "/collector/items")
            .with_header(VERSION_HEADER, "latest");
        assert_eq!(detector.detect_version(&request), Version::V1);
    }

    #[test]
    fn test_user_preference_honored_when_enabled() {
        let detector = default_detector();
        let request =
            VersionRequest::new("GET", "/collector/items").with_user("u1", Some(Version::V2));
        assert_eq!(detector.detect_version(&request), Version::V2);
    }

    #[test]
    fn test_user_preference_ignored_when_disabled() {
        let detector = detector_with(RouterConfig {
            user_overrides_enabled: false,
            ..Default::default()
        });
        let request =
            VersionRequest::new("GET", "/collector/items").with_user("u1", Some(Version::V2));
        assert_eq!(detector.detect_version(&request), Version::V1);
    }

    #[test]
    fn test_path_patterns() {
        let detector = default_detector();
        assert_eq!(
            detector.detect_version(&VersionRequest::new("GET", "/mentor/advice")),
            Version::V2
        );
        assert_eq!(
            detector.detect_version(&VersionRequest::new("GET", "/scholar/papers")),
            Version::V1
        );
        assert_eq!(
            detector.detect_version(&VersionRequest::new("GET", "/obsidian/sync")),
            Version::V2
        );
    }

    #[test]
    fn test_ambiguous_path_leans_v2() {
        let detector = default_detector();
        // Matches both lists; the v2 list is checked first
        let request = VersionRequest::new("GET", "/v1/mentor/advice");
        assert_eq!(detector.detect_version(&request), Version::V2);
    }

    #[test]
    fn test_flag_gated_segment() {
        // "mentor" without surrounding slashes doesn't hit the pattern
        // lists, but the gate flag promotes it
        let mut feature_flags = HashMap::new();
        feature_flags.insert("v2_mentor".to_string(), true);
        let detector = detector_with(RouterConfig {
            feature_flags,
            ..Default::default()
        });
        assert_eq!(
            detector.detect_version(&VersionRequest::new("GET", "/api/mentor")),
            Version::V2
        );

        let ungated = default_detector();
        assert_eq!(
            ungated.detect_version(&VersionRequest::new("GET", "/api/mentor")),
            Version::V1
        );
    }

    #[test]
    fn test_default_version_fallback() {
        let detector = detector_with(RouterConfig {
            default_version: Version::V2,
            ..Default::default()
        });
        assert_eq!(
            detector.detect_version(&VersionRequest::new("GET", "/unmatched")),
            Version::V2
        );
    }
}
