use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::properties::property_models::CohortRule;

/// A named user segment. A user belongs to a cohort when they are an
/// explicit member, or when every rule matches their context attributes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Cohort {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: HashSet<String>,
    #[serde(default)]
    pub rules: Vec<CohortRule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input shape for creating or replacing a cohort; the manager stamps the
/// timestamps.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CohortDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub rules: Vec<CohortRule>,
}

impl CohortDefinition {
    pub fn named(name: &str) -> Self {
        CohortDefinition {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Wire shape for cohort import/export:
/// `{ cohorts: { <name>: { description, members, rules, created_at, updated_at } } }`.
/// A BTreeMap keeps exports deterministic.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CohortExport {
    pub cohorts: BTreeMap<String, CohortRecord>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CohortRecord {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub rules: Vec<CohortRule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Cohort> for CohortRecord {
    fn from(cohort: &Cohort) -> Self {
        let mut members: Vec<String> = cohort.members.iter().cloned().collect();
        members.sort();
        CohortRecord {
            description: cohort.description.clone(),
            members,
            rules: cohort.rules.clone(),
            created_at: cohort.created_at,
            updated_at: cohort.updated_at,
        }
    }
}
