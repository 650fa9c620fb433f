use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum OperatorType {
    #[serde(rename = "equals")]
    Equals,
    #[serde(rename = "not_equals")]
    NotEquals,
    #[serde(rename = "greater_than")]
    GreaterThan,
    #[serde(rename = "less_than")]
    LessThan,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "regex")]
    Regex,
}

/// A predicate a flag attaches to a context attribute. All of a flag's
/// conditions must hold for the flag to stay eligible (AND semantics);
/// `negate` inverts this condition's own verdict only.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlagCondition {
    pub attribute: String,
    pub operator: OperatorType,
    pub value: serde_json::Value,
    #[serde(default)]
    pub negate: bool,
}

/// A rule a cohort uses to admit users by attribute. Rules are ANDed:
/// a user matches a cohort's rules only when every rule matches.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CohortRule {
    pub attribute: String,
    pub operator: OperatorType,
    pub value: serde_json::Value,
}
