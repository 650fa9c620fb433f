use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::circuit_breaker::ErrorThreshold;
use crate::properties::property_models::FlagCondition;

/// Cohort targeting for a rollout, in declaration order. Declaration order
/// is load-bearing: the first matching cohort mapped to `true` wins, so the
/// entries cannot live in an unordered map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CohortRollouts(pub Vec<(String, bool)>);

impl CohortRollouts {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, bool)> {
        self.0.iter()
    }
}

impl Serialize for CohortRollouts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (cohort, enabled) in &self.0 {
            map.serialize_entry(cohort, enabled)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CohortRollouts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CohortRolloutsVisitor;

        impl<'de> Visitor<'de> for CohortRolloutsVisitor {
            type Value = CohortRollouts;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a map of cohort name to boolean")
            }

            // The deserializer streams entries in document order, which is
            // exactly the order we must preserve.
            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((cohort, enabled)) = access.next_entry::<String, bool>()? {
                    entries.push((cohort, enabled));
                }
                Ok(CohortRollouts(entries))
            }
        }

        deserializer.deserialize_map(CohortRolloutsVisitor)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RolloutConfig {
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub cohorts: Option<CohortRollouts>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Variant {
    pub name: String,
    /// Relative weight; weights across a flag's variants need not sum to 100.
    pub weight: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FeatureFlag {
    /// Filled from the map key when loaded from a config document.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Static fallback when no rollout rule decides the flag.
    #[serde(default, rename = "default")]
    pub default_enabled: bool,
    /// Flags that must independently evaluate enabled before this one can be.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Attribute predicates, ANDed.
    #[serde(default)]
    pub conditions: Vec<FlagCondition>,
    #[serde(default)]
    pub rollout: Option<RolloutConfig>,
    #[serde(default)]
    pub variants: Option<Vec<Variant>>,
    #[serde(default)]
    pub error_threshold: Option<ErrorThreshold>,
}

impl FeatureFlag {
    pub fn named(name: &str) -> Self {
        FeatureFlag {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Partial flag update, merged over an existing definition by `update_flag`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FlagPatch {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "default")]
    pub default_enabled: Option<bool>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub conditions: Option<Vec<FlagCondition>>,
    #[serde(default)]
    pub rollout: Option<RolloutConfig>,
    #[serde(default)]
    pub variants: Option<Vec<Variant>>,
    #[serde(default)]
    pub error_threshold: Option<ErrorThreshold>,
}

/// Wire shape shared by the local YAML config file and remote config
/// payloads: `{ flags: { <name>: <definition> } }`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FlagsSnapshot {
    #[serde(default)]
    pub flags: HashMap<String, FeatureFlag>,
}

impl FlagsSnapshot {
    /// Flag definitions in config documents carry their name as the map key;
    /// stamp it into each definition before use.
    pub fn into_named_flags(self) -> Vec<FeatureFlag> {
        self.flags
            .into_iter()
            .map(|(name, mut flag)| {
                flag.name = name;
                flag
            })
            .collect()
    }
}

/// Input to a flag evaluation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluationContext {
    pub user_id: String,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl EvaluationContext {
    pub fn for_user(user_id: &str) -> Self {
        EvaluationContext {
            user_id: user_id.to_string(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }
}

/// Output of a flag evaluation. `evaluate` always produces one of these,
/// whatever happens internally.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluationResult {
    pub flag_name: String,
    pub user_id: String,
    pub enabled: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub timestamp: DateTime<Utc>,
}
