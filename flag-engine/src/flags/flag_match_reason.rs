/// Why an evaluation resolved the way it did. Rendered into the
/// human-readable `reason` field of every `EvaluationResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagMatchReason {
    FlagNotFound,
    CircuitBreakerOpen,
    DependencyNotEnabled(String),
    ConditionsNotMet,
    InCohort(String),
    InRolloutGroup,
    DefaultValue,
    EvaluationError,
}

impl std::fmt::Display for FlagMatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagMatchReason::FlagNotFound => write!(f, "Flag not found"),
            FlagMatchReason::CircuitBreakerOpen => write!(f, "Circuit breaker open"),
            FlagMatchReason::DependencyNotEnabled(dep) => {
                write!(f, "Dependency {dep} not enabled")
            }
            FlagMatchReason::ConditionsNotMet => write!(f, "Conditions not met"),
            FlagMatchReason::InCohort(cohort) => write!(f, "In cohort: {cohort}"),
            FlagMatchReason::InRolloutGroup => write!(f, "In rollout group"),
            FlagMatchReason::DefaultValue => write!(f, "Default value"),
            FlagMatchReason::EvaluationError => write!(f, "Error during evaluation"),
        }
    }
}
