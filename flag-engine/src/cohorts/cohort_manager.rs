use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tracing::{info, warn};

use crate::cohorts::cohort_models::{Cohort, CohortDefinition, CohortExport, CohortRecord};
use crate::metrics::consts::{COHORT_CACHE_HIT_COUNTER, COHORT_CACHE_MISS_COUNTER};
use crate::properties::property_matching::match_operator;
use crate::properties::property_models::{CohortRule, OperatorType};
use crate::utils::hash::is_in_rollout_percentage;

/// Maintains named user segments and answers membership queries.
///
/// Membership results are cached per user in a plain map rather than a TTL
/// cache: the invalidation rule is "any cohort mutation clears the entire
/// cache, synchronously", and a mutation must never leave a stale entry
/// visible to the next evaluation. Correctness over performance, acceptable
/// because cohorts change rarely while membership is queried on every flag
/// evaluation.
pub struct CohortManager {
    cohorts: RwLock<HashMap<String, Cohort>>,
    membership_cache: RwLock<HashMap<String, Vec<String>>>,
}

impl CohortManager {
    pub fn new() -> Self {
        let manager = Self::empty();
        for definition in Self::default_cohorts() {
            manager.create_cohort(definition);
        }
        manager
    }

    /// A manager with no seeded cohorts, for callers that import their own.
    pub fn empty() -> Self {
        Self {
            cohorts: RwLock::new(HashMap::new()),
            membership_cache: RwLock::new(HashMap::new()),
        }
    }

    fn default_cohorts() -> Vec<CohortDefinition> {
        vec![
            CohortDefinition {
                name: "beta_testers".to_string(),
                description: "Users who opted into beta features".to_string(),
                ..Default::default()
            },
            CohortDefinition {
                name: "internal_users".to_string(),
                description: "Employees, matched by email domain".to_string(),
                rules: vec![CohortRule {
                    attribute: "email".to_string(),
                    operator: OperatorType::Contains,
                    value: serde_json::json!("@internal"),
                }],
                ..Default::default()
            },
            CohortDefinition {
                name: "early_adopters".to_string(),
                description: "Manually curated early adopter program".to_string(),
                ..Default::default()
            },
            CohortDefinition {
                name: "premium_users".to_string(),
                description: "Users on a paid plan".to_string(),
                rules: vec![CohortRule {
                    attribute: "plan".to_string(),
                    operator: OperatorType::In,
                    value: serde_json::json!(["pro", "enterprise"]),
                }],
                ..Default::default()
            },
            CohortDefinition {
                name: "developers".to_string(),
                description: "Users with the developer role".to_string(),
                rules: vec![CohortRule {
                    attribute: "role".to_string(),
                    operator: OperatorType::Equals,
                    value: serde_json::json!("developer"),
                }],
                ..Default::default()
            },
        ]
    }

    /// Registers a cohort, overwriting any existing cohort with the same name.
    pub fn create_cohort(&self, definition: CohortDefinition) {
        let now = Utc::now();
        let cohort = Cohort {
            name: definition.name.clone(),
            description: definition.description,
            members: definition.members.into_iter().collect(),
            rules: definition.rules,
            created_at: now,
            updated_at: now,
        };

        let mut cohorts = self.cohorts.write().expect("poisoned cohort lock");
        info!(cohort = %cohort.name, "cohort registered");
        cohorts.insert(cohort.name.clone(), cohort);
        drop(cohorts);

        self.membership_cache
            .write()
            .expect("poisoned membership cache lock")
            .clear();
    }

    /// Replaces a cohort's definition, keeping its creation time.
    /// Returns false if the cohort doesn't exist.
    pub fn update_cohort(&self, definition: CohortDefinition) -> bool {
        let mut cohorts = self.cohorts.write().expect("poisoned cohort lock");
        let Some(existing) = cohorts.get_mut(&definition.name) else {
            return false;
        };
        existing.description = definition.description;
        existing.members = definition.members.into_iter().collect();
        existing.rules = definition.rules;
        existing.updated_at = Utc::now();
        drop(cohorts);

        self.membership_cache
            .write()
            .expect("poisoned membership cache lock")
            .clear();
        true
    }

    pub fn delete_cohort(&self, cohort_name: &str) -> bool {
        let removed = self
            .cohorts
            .write()
            .expect("poisoned cohort lock")
            .remove(cohort_name)
            .is_some();
        if removed {
            info!(cohort = cohort_name, "cohort deleted");
            self.membership_cache
                .write()
                .expect("poisoned membership cache lock")
                .clear();
        }
        removed
    }

    /// Adds a user as an explicit member. Returns false if the cohort is
    /// missing; only that user's cached membership is invalidated otherwise.
    pub fn add_user_to_cohort(&self, user_id: &str, cohort_name: &str) -> bool {
        let mut cohorts = self.cohorts.write().expect("poisoned cohort lock");
        let Some(cohort) = cohorts.get_mut(cohort_name) else {
            return false;
        };
        cohort.members.insert(user_id.to_string());
        cohort.updated_at = Utc::now();
        drop(cohorts);

        self.membership_cache
            .write()
            .expect("poisoned membership cache lock")
            .remove(user_id);
        true
    }

    pub fn remove_user_from_cohort(&self, user_id: &str, cohort_name: &str) -> bool {
        let mut cohorts = self.cohorts.write().expect("poisoned cohort lock");
        let Some(cohort) = cohorts.get_mut(cohort_name) else {
            return false;
        };
        cohort.members.remove(user_id);
        cohort.updated_at = Utc::now();
        drop(cohorts);

        self.membership_cache
            .write()
            .expect("poisoned membership cache lock")
            .remove(user_id);
        true
    }

    /// Returns the names of every cohort the user belongs to, sorted for
    /// stable output. Explicit membership is checked first (cheap), then
    /// rule-based membership against the supplied attributes, all rules
    /// ANDed. Results are cached per user until the next mutation.
    pub fn get_user_cohorts(
        &self,
        user_id: &str,
        attributes: Option<&HashMap<String, serde_json::Value>>,
    ) -> Vec<String> {
        if let Some(cached) = self
            .membership_cache
            .read()
            .expect("poisoned membership cache lock")
            .get(user_id)
        {
            metrics::counter!(COHORT_CACHE_HIT_COUNTER).increment(1);
            return cached.clone();
        }
        metrics::counter!(COHORT_CACHE_MISS_COUNTER).increment(1);

        let cohorts = self.cohorts.read().expect("poisoned cohort lock");
        let mut memberships: Vec<String> = cohorts
            .values()
            .filter(|cohort| {
                cohort.members.contains(user_id) || Self::rules_match(cohort, attributes)
            })
            .map(|cohort| cohort.name.clone())
            .collect();
        drop(cohorts);

        memberships.sort();
        self.membership_cache
            .write()
            .expect("poisoned membership cache lock")
            .insert(user_id.to_string(), memberships.clone());
        memberships
    }

    fn rules_match(
        cohort: &Cohort,
        attributes: Option<&HashMap<String, serde_json::Value>>,
    ) -> bool {
        if cohort.rules.is_empty() {
            return false;
        }
        let Some(attributes) = attributes else {
            return false;
        };

        cohort.rules.iter().all(|rule| {
            match match_operator(rule.operator, &rule.value, attributes.get(&rule.attribute)) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(cohort = %cohort.name, rule = %rule.attribute, "bad cohort rule: {e}");
                    false
                }
            }
        })
    }

    pub fn is_user_in_cohort(
        &self,
        user_id: &str,
        cohort_name: &str,
        attributes: Option<&HashMap<String, serde_json::Value>>,
    ) -> bool {
        self.get_user_cohorts(user_id, attributes)
            .iter()
            .any(|name| name == cohort_name)
    }

    /// The canonical consistent-hash bucketing primitive; see
    /// `utils::hash` for the scheme's stability contract.
    pub fn is_in_rollout_group(&self, user_id: &str, percentage: f64) -> bool {
        is_in_rollout_percentage(user_id, percentage)
    }

    pub fn get_cohort(&self, cohort_name: &str) -> Option<Cohort> {
        self.cohorts
            .read()
            .expect("poisoned cohort lock")
            .get(cohort_name)
            .cloned()
    }

    pub fn list_cohorts(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .cohorts
            .read()
            .expect("poisoned cohort lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn export_cohorts(&self) -> CohortExport {
        let cohorts = self.cohorts.read().expect("poisoned cohort lock");
        CohortExport {
            cohorts: cohorts
                .values()
                .map(|cohort| (cohort.name.clone(), CohortRecord::from(cohort)))
                .collect(),
        }
    }

    /// Imports cohorts from an export document, overwriting same-named
    /// cohorts and preserving the exported timestamps.
    pub fn import_cohorts(&self, export: CohortExport) -> usize {
        let count = export.cohorts.len();
        let mut cohorts = self.cohorts.write().expect("poisoned cohort lock");
        for (name, record) in export.cohorts {
            cohorts.insert(
                name.clone(),
                Cohort {
                    name,
                    description: record.description,
                    members: record.members.into_iter().collect(),
                    rules: record.rules,
                    created_at: record.created_at,
                    updated_at: record.updated_at,
                },
            );
        }
        drop(cohorts);

        self.membership_cache
            .write()
            .expect("poisoned membership cache lock")
            .clear();
        info!(count, "cohorts imported");
        count
    }
}

impl Default for CohortManager {
    fn default() -> Self {
        Self::new()
    }
}
