use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use moka::sync::Cache;
use tracing::{error, info};

use crate::circuit_breaker::CircuitBreaker;
use crate::cohorts::cohort_manager::CohortManager;
use crate::flags::flag_match_reason::FlagMatchReason;
use crate::flags::flag_matching::{conditions_match, select_variant};
use crate::flags::flag_models::{
    CohortRollouts, EvaluationContext, EvaluationResult, FeatureFlag, FlagPatch, FlagsSnapshot,
    RolloutConfig,
};
use crate::metrics::collector::MetricsCollector;
use crate::metrics::consts::FLAG_CACHE_HIT_COUNTER;
use crate::utils::hash::is_in_rollout_percentage;

pub const DEFAULT_EVALUATION_CACHE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_EVALUATION_CACHE_ENTRIES: u64 = 100_000;

/// Cache keys carry a generation counter. Flag mutations bump the
/// generation instead of sweeping the cache, which makes invalidation
/// synchronous: stale entries can never match again and age out via TTL.
type EvalCacheKey = (u64, String, String);

/// The central evaluator: resolves a flag's enabled state and variant for a
/// user context, applying circuit-breaker state, dependency checks,
/// conditions, cohort and percentage rollout, and variant selection, in
/// that order. `evaluate` always returns a result object; nothing that
/// happens during evaluation propagates to the caller as an error.
pub struct FeatureFlagManager {
    flags: RwLock<HashMap<String, FeatureFlag>>,
    cohorts: Arc<CohortManager>,
    breaker: Arc<CircuitBreaker>,
    collector: Arc<MetricsCollector>,
    evaluation_cache: Cache<EvalCacheKey, EvaluationResult>,
    cache_generation: AtomicU64,
}

impl FeatureFlagManager {
    pub fn new(
        cohorts: Arc<CohortManager>,
        breaker: Arc<CircuitBreaker>,
        collector: Arc<MetricsCollector>,
    ) -> Self {
        Self::with_cache_ttl(cohorts, breaker, collector, DEFAULT_EVALUATION_CACHE_TTL)
    }

    pub fn with_cache_ttl(
        cohorts: Arc<CohortManager>,
        breaker: Arc<CircuitBreaker>,
        collector: Arc<MetricsCollector>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            flags: RwLock::new(HashMap::new()),
            cohorts,
            breaker,
            collector,
            evaluation_cache: Cache::builder()
                .max_capacity(DEFAULT_EVALUATION_CACHE_ENTRIES)
                .time_to_live(cache_ttl)
                .build(),
            cache_generation: AtomicU64::new(0),
        }
    }

    /// A manager seeded with the built-in platform flags: the v2 subsystem
    /// rollouts gated on each other, dark until cohort or percentage
    /// targeting opens them up.
    pub fn with_default_flags(
        cohorts: Arc<CohortManager>,
        breaker: Arc<CircuitBreaker>,
        collector: Arc<MetricsCollector>,
    ) -> Self {
        let manager = Self::new(cohorts, breaker, collector);
        manager.seed_default_flags();
        manager
    }

    /// Merges the built-in flags into an already-constructed manager.
    pub fn seed_default_flags(&self) {
        self.merge_flags(Self::default_flags());
    }

    /// Loads `{ flags: { ... } }` from a local YAML file and merges it over
    /// the current flag map.
    pub fn load_local_config(&self, path: &str) -> Result<usize, crate::api::errors::FlagError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| crate::api::errors::FlagError::ConfigFileUnreadable(e.to_string()))?;
        let snapshot: FlagsSnapshot = serde_yaml::from_str(&raw)?;
        let count = snapshot.flags.len();
        self.merge_flags(snapshot);
        Ok(count)
    }

    fn default_flags() -> FlagsSnapshot {
        // The v2 chain: pipeline is the root, each layer depends on the one
        // below it so a rollback at the root darkens the whole stack.
        let yaml = r#"
flags:
  v2_pipeline:
    description: Core v2 processing pipeline
    default: false
    rollout:
      percentage: 0
      cohorts:
        internal_users: true
    error_threshold:
      rate: 0.5
      window: 60
      min_samples: 10
  v2_mentor:
    description: v2 mentor layer
    default: false
    dependencies: [v2_pipeline]
    rollout:
      percentage: 0
      cohorts:
        beta_testers: true
        internal_users: true
  v2_creator:
    description: v2 creator layer
    default: false
    dependencies: [v2_mentor]
  v2_publisher:
    description: v2 publisher layer
    default: false
    dependencies: [v2_creator]
  v2_framework:
    description: v2 framework selection
    default: false
    dependencies: [v2_pipeline]
"#;
        serde_yaml::from_str(yaml).expect("built-in flag definitions must parse")
    }

    /// Sugar over `evaluate` for callers that only care about the decision.
    pub fn is_enabled(&self, flag_name: &str, context: &EvaluationContext) -> bool {
        self.evaluate(flag_name, context).enabled
    }

    pub fn evaluate(&self, flag_name: &str, context: &EvaluationContext) -> EvaluationResult {
        let mut visiting = Vec::new();
        self.evaluate_guarded(flag_name, context, &mut visiting)
    }

    /// Evaluates every known flag for one context.
    pub fn evaluate_all(&self, context: &EvaluationContext) -> HashMap<String, EvaluationResult> {
        let names = self.list_flags();
        names
            .into_iter()
            .map(|name| {
                let result = self.evaluate(&name, context);
                (name, result)
            })
            .collect()
    }

    /// Full evaluation for one flag, with the dependency chain currently
    /// being evaluated threaded through for cycle detection.
    fn evaluate_guarded(
        &self,
        flag_name: &str,
        context: &EvaluationContext,
        visiting: &mut Vec<String>,
    ) -> EvaluationResult {
        let started = Instant::now();

        let generation = self.cache_generation.load(Ordering::Acquire);
        let cache_key = (
            generation,
            flag_name.to_string(),
            context.user_id.clone(),
        );
        if let Some(cached) = self.evaluation_cache.get(&cache_key) {
            metrics::counter!(FLAG_CACHE_HIT_COUNTER, "flag" => flag_name.to_string())
                .increment(1);
            return cached;
        }

        let (enabled, reason, variant) = self.resolve(flag_name, context, visiting);

        let result = EvaluationResult {
            flag_name: flag_name.to_string(),
            user_id: context.user_id.clone(),
            enabled,
            reason: reason.to_string(),
            variant,
            timestamp: Utc::now(),
        };

        match reason {
            // Not cached by design: registering the flag later must take
            // effect immediately instead of serving a stale miss.
            FlagMatchReason::FlagNotFound => {
                self.collector.record_usage(flag_name, false);
            }
            FlagMatchReason::CircuitBreakerOpen => {
                self.collector.record_usage(flag_name, false);
                self.evaluation_cache.insert(cache_key, result.clone());
            }
            FlagMatchReason::EvaluationError => {
                self.collector.record_error(flag_name);
                self.breaker.record_error(flag_name);
                self.evaluation_cache.insert(cache_key, result.clone());
            }
            _ => {
                self.collector.record_usage(flag_name, enabled);
                self.collector
                    .record_evaluation_time(flag_name, started.elapsed());
                self.breaker.record_success(flag_name);
                self.evaluation_cache.insert(cache_key, result.clone());
            }
        }

        result
    }

    /// The decision ladder. Strict order, first decisive rule wins.
    fn resolve(
        &self,
        flag_name: &str,
        context: &EvaluationContext,
        visiting: &mut Vec<String>,
    ) -> (bool, FlagMatchReason, Option<String>) {
        let flag = {
            let flags = self.flags.read().expect("poisoned flag lock");
            match flags.get(flag_name) {
                Some(flag) => flag.clone(),
                None => return (false, FlagMatchReason::FlagNotFound, None),
            }
        };

        if self.breaker.is_open(flag_name) {
            return (false, FlagMatchReason::CircuitBreakerOpen, None);
        }

        // Dependencies must independently evaluate enabled. A dependency
        // already on the evaluation stack is a cycle and counts as unmet.
        visiting.push(flag_name.to_string());
        for dependency in &flag.dependencies {
            let dependency_met = if visiting.iter().any(|name| name == dependency) {
                error!(
                    flag = flag_name,
                    dependency = %dependency,
                    "dependency cycle detected, treating as not enabled"
                );
                false
            } else {
                self.evaluate_guarded(dependency, context, visiting).enabled
            };
            if !dependency_met {
                visiting.pop();
                return (
                    false,
                    FlagMatchReason::DependencyNotEnabled(dependency.clone()),
                    None,
                );
            }
        }
        visiting.pop();

        match conditions_match(&flag.conditions, &context.attributes) {
            Ok(true) => {}
            Ok(false) => return (false, FlagMatchReason::ConditionsNotMet, None),
            Err(e) => {
                error!(flag = flag_name, "evaluation failed: {e}");
                return (flag.default_enabled, FlagMatchReason::EvaluationError, None);
            }
        }

        if let Some(rollout) = &flag.rollout {
            // Cohort targeting bypasses the percentage entirely: the first
            // cohort mapped to true that contains the user wins.
            if let Some(cohorts) = &rollout.cohorts {
                let memberships = self
                    .cohorts
                    .get_user_cohorts(&context.user_id, Some(&context.attributes));
                for (cohort_name, cohort_enabled) in cohorts.iter() {
                    if *cohort_enabled && memberships.iter().any(|name| name == cohort_name) {
                        let variant = flag
                            .variants
                            .as_deref()
                            .and_then(|variants| select_variant(&context.user_id, variants))
                            .map(str::to_string);
                        return (
                            true,
                            FlagMatchReason::InCohort(cohort_name.clone()),
                            variant,
                        );
                    }
                }
            }

            if let Some(percentage) = rollout.percentage {
                let in_rollout = is_in_rollout_percentage(&context.user_id, percentage);
                let enabled = in_rollout || flag.default_enabled;
                let reason = if in_rollout {
                    FlagMatchReason::InRolloutGroup
                } else {
                    FlagMatchReason::DefaultValue
                };
                let variant = if enabled {
                    flag.variants
                        .as_deref()
                        .and_then(|variants| select_variant(&context.user_id, variants))
                        .map(str::to_string)
                } else {
                    None
                };
                return (enabled, reason, variant);
            }
        }

        (flag.default_enabled, FlagMatchReason::DefaultValue, None)
    }

    /// Merges a partial update into a flag, creating it when absent. The
    /// whole evaluation cache is invalidated, not just the affected flag:
    /// other flags may depend on it.
    pub fn update_flag(&self, flag_name: &str, patch: FlagPatch) {
        let mut flags = self.flags.write().expect("poisoned flag lock");
        let flag = flags
            .entry(flag_name.to_string())
            .or_insert_with(|| FeatureFlag::named(flag_name));

        if let Some(description) = patch.description {
            flag.description = description;
        }
        if let Some(default_enabled) = patch.default_enabled {
            flag.default_enabled = default_enabled;
        }
        if let Some(dependencies) = patch.dependencies {
            flag.dependencies = dependencies;
        }
        if let Some(conditions) = patch.conditions {
            flag.conditions = conditions;
        }
        if let Some(rollout) = patch.rollout {
            flag.rollout = Some(rollout);
        }
        if let Some(variants) = patch.variants {
            flag.variants = Some(variants);
        }
        if let Some(threshold) = patch.error_threshold {
            flag.error_threshold = Some(threshold);
            self.breaker.configure(flag_name, threshold);
        }
        drop(flags);

        info!(flag = flag_name, "flag updated");
        self.invalidate_evaluation_cache();
    }

    /// Atomically swaps the whole flag map for a remote snapshot.
    pub fn update_flags(&self, snapshot: FlagsSnapshot) {
        let named = snapshot.into_named_flags();
        let count = named.len();
        for flag in &named {
            if let Some(threshold) = flag.error_threshold {
                self.breaker.configure(&flag.name, threshold);
            }
        }

        let mut flags = self.flags.write().expect("poisoned flag lock");
        *flags = named.into_iter().map(|flag| (flag.name.clone(), flag)).collect();
        drop(flags);

        info!(count, "flag definitions replaced");
        self.invalidate_evaluation_cache();
    }

    /// Merges a snapshot over the current flag map (startup config load).
    pub fn merge_flags(&self, snapshot: FlagsSnapshot) {
        let named = snapshot.into_named_flags();
        let count = named.len();
        let mut flags = self.flags.write().expect("poisoned flag lock");
        for flag in named {
            if let Some(threshold) = flag.error_threshold {
                self.breaker.configure(&flag.name, threshold);
            }
            flags.insert(flag.name.clone(), flag);
        }
        drop(flags);

        info!(count, "flag definitions merged");
        self.invalidate_evaluation_cache();
    }

    /// Kill switch: forces the flag dark (static default off, 0% rollout,
    /// no cohort targeting) and resets its circuit breaker so evaluation
    /// resumes from a clean slate. Returns false for an unknown flag.
    pub fn rollback(&self, flag_name: &str) -> bool {
        let mut flags = self.flags.write().expect("poisoned flag lock");
        let Some(flag) = flags.get_mut(flag_name) else {
            return false;
        };
        flag.default_enabled = false;
        flag.rollout = Some(RolloutConfig {
            percentage: Some(0.0),
            cohorts: Some(CohortRollouts::default()),
        });
        drop(flags);

        self.breaker.reset(flag_name);
        info!(flag = flag_name, "flag rolled back");
        self.invalidate_evaluation_cache();
        true
    }

    pub fn get_flag(&self, flag_name: &str) -> Option<FeatureFlag> {
        self.flags
            .read()
            .expect("poisoned flag lock")
            .get(flag_name)
            .cloned()
    }

    pub fn list_flags(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .flags
            .read()
            .expect("poisoned flag lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn invalidate_evaluation_cache(&self) {
        self.cache_generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohorts::cohort_models::CohortDefinition;
    use crate::flags::flag_models::Variant;
    use crate::properties::property_models::{FlagCondition, OperatorType};
    use serde_json::json;

    struct TestHarness {
        cohorts: Arc<CohortManager>,
        breaker: Arc<CircuitBreaker>,
        collector: Arc<MetricsCollector>,
        manager: FeatureFlagManager,
    }

    fn harness() -> TestHarness {
        harness_with_ttl(DEFAULT_EVALUATION_CACHE_TTL)
    }

    fn harness_with_ttl(ttl: Duration) -> TestHarness {
        let cohorts = Arc::new(CohortManager::new());
        let breaker = Arc::new(CircuitBreaker::new());
        let collector = Arc::new(MetricsCollector::new());
        let manager = FeatureFlagManager::with_cache_ttl(
            cohorts.clone(),
            breaker.clone(),
            collector.clone(),
            ttl,
        );
        TestHarness {
            cohorts,
            breaker,
            collector,
            manager,
        }
    }

    fn flag(yaml: &str) -> FlagsSnapshot {
        serde_yaml::from_str(yaml).expect("test flag yaml must parse")
    }

    #[test]
    fn test_unknown_flag_resolves_disabled() {
        let h = harness();
        let result = h.manager.evaluate("missing", &EvaluationContext::for_user("u1"));
        assert!(!result.enabled);
        assert_eq!(result.reason, "Flag not found");
        assert_eq!(result.flag_name, "missing");
        assert_eq!(result.user_id, "u1");
    }

    #[test]
    fn test_registering_a_flag_takes_effect_immediately() {
        let h = harness();
        let ctx = EvaluationContext::for_user("u1");
        assert!(!h.manager.is_enabled("late_flag", &ctx));

        h.manager.merge_flags(flag("flags:\n  late_flag:\n    default: true\n"));
        let result = h.manager.evaluate("late_flag", &ctx);
        assert!(result.enabled);
        assert_eq!(result.reason, "Default value");
    }

    #[test]
    fn test_default_value_fallback() {
        let h = harness();
        h.manager.merge_flags(flag("flags:\n  plain:\n    default: true\n"));
        let result = h.manager.evaluate("plain", &EvaluationContext::for_user("u1"));
        assert!(result.enabled);
        assert_eq!(result.reason, "Default value");
        assert_eq!(result.variant, None);
    }

    #[test]
    fn test_dependency_short_circuit() {
        let h = harness();
        // B is dark; A would be fully rolled out on its own
        h.manager.merge_flags(flag(
            "flags:\n  flag_b:\n    default: false\n  flag_a:\n    dependencies: [flag_b]\n    rollout:\n      percentage: 100\n",
        ));

        let result = h.manager.evaluate("flag_a", &EvaluationContext::for_user("u1"));
        assert!(!result.enabled);
        assert_eq!(result.reason, "Dependency flag_b not enabled");
    }

    #[test]
    fn test_dependency_met_falls_through_to_rollout() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  flag_b:\n    default: true\n  flag_a:\n    dependencies: [flag_b]\n    rollout:\n      percentage: 100\n",
        ));

        let result = h.manager.evaluate("flag_a", &EvaluationContext::for_user("u1"));
        assert!(result.enabled);
        assert_eq!(result.reason, "In rollout group");
    }

    #[test]
    fn test_missing_dependency_is_unmet() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  flag_a:\n    default: true\n    dependencies: [never_defined]\n",
        ));
        let result = h.manager.evaluate("flag_a", &EvaluationContext::for_user("u1"));
        assert!(!result.enabled);
        assert_eq!(result.reason, "Dependency never_defined not enabled");
    }

    #[test]
    fn test_dependency_cycle_resolves_disabled() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  flag_a:\n    default: true\n    dependencies: [flag_b]\n  flag_b:\n    default: true\n    dependencies: [flag_a]\n",
        ));
        let result = h.manager.evaluate("flag_a", &EvaluationContext::for_user("u1"));
        assert!(!result.enabled);
        assert_eq!(result.reason, "Dependency flag_b not enabled");
    }

    #[test]
    fn test_conditions_gate_the_flag() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  pro_only:\n    conditions:\n      - attribute: plan\n        operator: equals\n        value: pro\n    rollout:\n      percentage: 100\n",
        ));

        let pro = EvaluationContext::for_user("u1").with_attribute("plan", json!("pro"));
        assert!(h.manager.is_enabled("pro_only", &pro));

        let free = EvaluationContext::for_user("u2").with_attribute("plan", json!("free"));
        let result = h.manager.evaluate("pro_only", &free);
        assert!(!result.enabled);
        assert_eq!(result.reason, "Conditions not met");
    }

    #[test]
    fn test_cohort_bypasses_percentage_rollout() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  gated:\n    rollout:\n      percentage: 0\n      cohorts:\n        beta_testers: true\n",
        ));
        h.cohorts.add_user_to_cohort("u1", "beta_testers");

        let result = h.manager.evaluate("gated", &EvaluationContext::for_user("u1"));
        assert!(result.enabled);
        assert_eq!(result.reason, "In cohort: beta_testers");

        // Anyone outside the cohort is held by the 0% rollout
        let outsider = h.manager.evaluate("gated", &EvaluationContext::for_user("u2"));
        assert!(!outsider.enabled);
        assert_eq!(outsider.reason, "Default value");
    }

    #[test]
    fn test_cohort_rollout_first_match_wins_in_declaration_order() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  gated:\n    rollout:\n      percentage: 0\n      cohorts:\n        early_adopters: true\n        beta_testers: true\n",
        ));
        h.cohorts.add_user_to_cohort("u1", "beta_testers");
        h.cohorts.add_user_to_cohort("u1", "early_adopters");

        let result = h.manager.evaluate("gated", &EvaluationContext::for_user("u1"));
        assert_eq!(result.reason, "In cohort: early_adopters");
    }

    #[test]
    fn test_cohort_mapped_false_does_not_enable() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  gated:\n    rollout:\n      percentage: 0\n      cohorts:\n        beta_testers: false\n",
        ));
        h.cohorts.add_user_to_cohort("u1", "beta_testers");

        let result = h.manager.evaluate("gated", &EvaluationContext::for_user("u1"));
        assert!(!result.enabled);
        assert_eq!(result.reason, "Default value");
    }

    #[test]
    fn test_percentage_rollout_buckets() {
        let h = harness();
        // bucket("bob") == 20
        h.manager.merge_flags(flag(
            "flags:\n  narrow:\n    rollout:\n      percentage: 20\n  wide:\n    rollout:\n      percentage: 21\n",
        ));

        let ctx = EvaluationContext::for_user("bob");
        assert!(!h.manager.is_enabled("narrow", &ctx));
        assert!(h.manager.is_enabled("wide", &ctx));
        assert_eq!(h.manager.evaluate("wide", &ctx).reason, "In rollout group");
    }

    #[test]
    fn test_default_true_overrides_missed_rollout() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  safe:\n    default: true\n    rollout:\n      percentage: 0\n",
        ));
        let result = h.manager.evaluate("safe", &EvaluationContext::for_user("u1"));
        assert!(result.enabled);
        assert_eq!(result.reason, "Default value");
    }

    #[test]
    fn test_variant_selection_in_rollout() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  experiment:\n    rollout:\n      percentage: 100\n    variants:\n      - name: control\n        weight: 50\n      - name: beta\n        weight: 30\n      - name: experimental\n        weight: 20\n",
        ));

        // Pinned consistent-hash selections
        let result = h
            .manager
            .evaluate("experiment", &EvaluationContext::for_user("user123"));
        assert!(result.enabled);
        assert_eq!(result.variant.as_deref(), Some("experimental"));

        let alice = h
            .manager
            .evaluate("experiment", &EvaluationContext::for_user("alice"));
        assert_eq!(alice.variant.as_deref(), Some("control"));
    }

    #[test]
    fn test_variant_selected_on_cohort_match() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  experiment:\n    rollout:\n      percentage: 0\n      cohorts:\n        beta_testers: true\n    variants:\n      - name: control\n        weight: 50\n      - name: test\n        weight: 50\n",
        ));
        h.cohorts.add_user_to_cohort("user123", "beta_testers");

        let result = h
            .manager
            .evaluate("experiment", &EvaluationContext::for_user("user123"));
        assert!(result.enabled);
        assert!(result.variant.is_some());
    }

    #[test]
    fn test_circuit_breaker_suppresses_enabled_flag() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  risky:\n    rollout:\n      percentage: 100\n    error_threshold:\n      rate: 0.4\n      window: 60\n      min_samples: 2\n",
        ));

        assert!(h.manager.is_enabled("risky", &EvaluationContext::for_user("u1")));

        h.breaker.record_error("risky");
        h.breaker.record_error("risky");
        assert!(h.breaker.is_open("risky"));

        // A fresh user sees the suppression immediately
        let result = h.manager.evaluate("risky", &EvaluationContext::for_user("u2"));
        assert!(!result.enabled);
        assert_eq!(result.reason, "Circuit breaker open");

        // After reset, normal evaluation resumes
        h.breaker.reset("risky");
        assert!(h.manager.is_enabled("risky", &EvaluationContext::for_user("u3")));
    }

    #[test]
    fn test_rollback_is_a_kill_switch() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  runaway:\n    default: true\n    rollout:\n      percentage: 100\n      cohorts:\n        beta_testers: true\n",
        ));
        h.cohorts.add_user_to_cohort("u1", "beta_testers");
        assert!(h.manager.is_enabled("runaway", &EvaluationContext::for_user("u1")));

        assert!(h.manager.rollback("runaway"));

        // Even the cohort member is dark now, without waiting for the cache
        let result = h.manager.evaluate("runaway", &EvaluationContext::for_user("u1"));
        assert!(!result.enabled);
        assert_eq!(result.reason, "Default value");

        assert!(!h.manager.rollback("never_defined"));
    }

    #[test]
    fn test_cached_result_is_returned_verbatim() {
        let h = harness();
        h.manager.merge_flags(flag("flags:\n  plain:\n    default: true\n"));

        let ctx = EvaluationContext::for_user("u1");
        let first = h.manager.evaluate("plain", &ctx);
        let second = h.manager.evaluate("plain", &ctx);
        assert_eq!(first.timestamp, second.timestamp);
        assert_eq!(first.reason, second.reason);
    }

    #[test]
    fn test_cache_expires_after_ttl() {
        let h = harness_with_ttl(Duration::from_millis(100));
        h.manager.merge_flags(flag(
            "flags:\n  gated:\n    rollout:\n      percentage: 0\n      cohorts:\n        beta_testers: true\n",
        ));

        let ctx = EvaluationContext::for_user("u1");
        assert!(!h.manager.is_enabled("gated", &ctx));

        // Cohort membership changed, but the cached decision still serves
        h.cohorts.add_user_to_cohort("u1", "beta_testers");
        assert!(!h.manager.is_enabled("gated", &ctx));

        std::thread::sleep(Duration::from_millis(150));
        assert!(h.manager.is_enabled("gated", &ctx));
    }

    #[test]
    fn test_update_flag_takes_effect_immediately() {
        let h = harness();
        h.manager.merge_flags(flag("flags:\n  plain:\n    default: false\n"));

        let ctx = EvaluationContext::for_user("u1");
        assert!(!h.manager.is_enabled("plain", &ctx));

        h.manager.update_flag(
            "plain",
            FlagPatch {
                default_enabled: Some(true),
                ..Default::default()
            },
        );
        assert!(h.manager.is_enabled("plain", &ctx));
    }

    #[test]
    fn test_update_flag_merges_partially() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  plain:\n    description: original\n    default: true\n",
        ));

        h.manager.update_flag(
            "plain",
            FlagPatch {
                rollout: Some(RolloutConfig {
                    percentage: Some(50.0),
                    cohorts: None,
                }),
                ..Default::default()
            },
        );

        let flag = h.manager.get_flag("plain").unwrap();
        assert_eq!(flag.description, "original");
        assert!(flag.default_enabled);
        assert_eq!(flag.rollout.unwrap().percentage, Some(50.0));
    }

    #[test]
    fn test_evaluation_error_degrades_to_default() {
        let h = harness();
        // `in` with a non-array value is a configuration error
        let mut bad_flag = FeatureFlag::named("broken");
        bad_flag.default_enabled = true;
        bad_flag.conditions = vec![FlagCondition {
            attribute: "plan".to_string(),
            operator: OperatorType::In,
            value: json!("pro"),
            negate: false,
        }];
        let mut flags = HashMap::new();
        flags.insert("broken".to_string(), bad_flag);
        h.manager.merge_flags(FlagsSnapshot { flags });

        let ctx = EvaluationContext::for_user("u1").with_attribute("plan", json!("pro"));
        let result = h.manager.evaluate("broken", &ctx);
        assert!(result.enabled);
        assert_eq!(result.reason, "Error during evaluation");
        assert_eq!(h.collector.flag_metrics("broken").error_count, 1);
    }

    #[test]
    fn test_update_flags_swaps_the_whole_map() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  old_one:\n    default: true\n  old_two:\n    default: true\n",
        ));
        assert_eq!(h.manager.list_flags().len(), 2);

        h.manager
            .update_flags(flag("flags:\n  fresh:\n    default: true\n"));
        assert_eq!(h.manager.list_flags(), vec!["fresh".to_string()]);
        assert!(!h.manager.is_enabled("old_one", &EvaluationContext::for_user("u1")));
    }

    #[test]
    fn test_evaluate_all_covers_every_flag() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  one:\n    default: true\n  two:\n    default: false\n",
        ));

        let results = h.manager.evaluate_all(&EvaluationContext::for_user("u1"));
        assert_eq!(results.len(), 2);
        assert!(results.get("one").unwrap().enabled);
        assert!(!results.get("two").unwrap().enabled);
    }

    #[test]
    fn test_default_flags_ship_dark() {
        let h = {
            let cohorts = Arc::new(CohortManager::new());
            let breaker = Arc::new(CircuitBreaker::new());
            let collector = Arc::new(MetricsCollector::new());
            FeatureFlagManager::with_default_flags(cohorts, breaker, collector)
        };
        assert_eq!(h.list_flags().len(), 5);
        for name in h.list_flags() {
            assert!(
                !h.is_enabled(&name, &EvaluationContext::for_user("stranger")),
                "default flag {name} must be dark for unknown users"
            );
        }
    }

    #[test]
    fn test_usage_metrics_recorded() {
        let h = harness();
        h.manager.merge_flags(flag("flags:\n  plain:\n    default: true\n"));

        h.manager.evaluate("plain", &EvaluationContext::for_user("u1"));
        h.manager.evaluate("plain", &EvaluationContext::for_user("u2"));
        // Cache hit: no double counting
        h.manager.evaluate("plain", &EvaluationContext::for_user("u1"));

        let metrics = h.collector.flag_metrics("plain");
        assert_eq!(metrics.enabled_count, 2);
        assert_eq!(metrics.evaluation_count, 2);
    }

    #[test]
    fn test_cohort_context_attributes_flow_through() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  staff_only:\n    rollout:\n      percentage: 0\n      cohorts:\n        internal_users: true\n",
        ));

        let internal =
            EvaluationContext::for_user("u1").with_attribute("email", json!("dev@internal.example"));
        let result = h.manager.evaluate("staff_only", &internal);
        assert!(result.enabled);
        assert_eq!(result.reason, "In cohort: internal_users");
    }

    #[test]
    fn test_unused_variant_weight_helper() {
        // Variants only attach when the flag is enabled
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  dark:\n    rollout:\n      percentage: 0\n    variants:\n      - name: control\n        weight: 100\n",
        ));
        let result = h.manager.evaluate("dark", &EvaluationContext::for_user("u1"));
        assert!(!result.enabled);
        assert_eq!(result.variant, None);
    }

    #[test]
    fn test_is_in_rollout_determinism_via_manager() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  half:\n    rollout:\n      percentage: 50\n",
        ));
        let first = h.manager.is_enabled("half", &EvaluationContext::for_user("user123"));
        for i in 0..50 {
            // Interleave other users to shuffle evaluation order
            let _ = h
                .manager
                .is_enabled("half", &EvaluationContext::for_user(&format!("user_{i}")));
            assert_eq!(
                h.manager.is_enabled("half", &EvaluationContext::for_user("user123")),
                first
            );
        }
    }

    #[test]
    fn test_variant_patch_via_update_flag() {
        let h = harness();
        h.manager.merge_flags(flag(
            "flags:\n  experiment:\n    rollout:\n      percentage: 100\n",
        ));
        assert_eq!(
            h.manager
                .evaluate("experiment", &EvaluationContext::for_user("user123"))
                .variant,
            None
        );

        h.manager.update_flag(
            "experiment",
            FlagPatch {
                variants: Some(vec![Variant {
                    name: "only".to_string(),
                    weight: 1,
                }]),
                ..Default::default()
            },
        );
        assert_eq!(
            h.manager
                .evaluate("experiment", &EvaluationContext::for_user("user123"))
                .variant
                .as_deref(),
            Some("only")
        );
    }

    #[test]
    fn test_cohort_definition_helper_used() {
        // Exercise the ergonomic constructor alongside manager wiring
        let h = harness();
        h.cohorts.create_cohort(CohortDefinition::named("vip"));
        h.cohorts.add_user_to_cohort("u1", "vip");
        h.manager.merge_flags(flag(
            "flags:\n  vip_flag:\n    rollout:\n      percentage: 0\n      cohorts:\n        vip: true\n",
        ));
        assert!(h.manager.is_enabled("vip_flag", &EvaluationContext::for_user("u1")));
    }
}
