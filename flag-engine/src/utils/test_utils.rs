use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::circuit_breaker::CircuitBreaker;
use crate::cohorts::cohort_manager::CohortManager;
use crate::flags::flag_manager::FeatureFlagManager;
use crate::flags::flag_models::FlagsSnapshot;
use crate::metrics::collector::MetricsCollector;

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// A fully wired engine with seeded cohorts and no flags, for tests.
pub struct TestEngine {
    pub cohorts: Arc<CohortManager>,
    pub breaker: Arc<CircuitBreaker>,
    pub collector: Arc<MetricsCollector>,
    pub manager: Arc<FeatureFlagManager>,
}

pub fn setup_engine() -> TestEngine {
    setup_engine_with_ttl(Duration::from_secs(60))
}

pub fn setup_engine_with_ttl(cache_ttl: Duration) -> TestEngine {
    let cohorts = Arc::new(CohortManager::new());
    let breaker = Arc::new(CircuitBreaker::new());
    let collector = Arc::new(MetricsCollector::new());
    let manager = Arc::new(FeatureFlagManager::with_cache_ttl(
        cohorts.clone(),
        breaker.clone(),
        collector.clone(),
        cache_ttl,
    ));
    TestEngine {
        cohorts,
        breaker,
        collector,
        manager,
    }
}

pub fn snapshot_from_yaml(yaml: &str) -> FlagsSnapshot {
    serde_yaml::from_str(yaml).expect("test flag yaml must parse")
}
