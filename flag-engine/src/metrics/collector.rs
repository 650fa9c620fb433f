use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::Serialize;

use crate::metrics::consts::{
    FLAG_EVALUATION_COUNTER, FLAG_EVALUATION_ERRORS_COUNTER, FLAG_EVALUATION_TIME,
};

/// Per-flag counters kept queryable in-process.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FlagMetrics {
    pub enabled_count: u64,
    pub disabled_count: u64,
    pub error_count: u64,
    pub evaluation_count: u64,
    /// Total evaluation time in microseconds, for average latency queries.
    pub total_evaluation_micros: u64,
}

/// Records usage, error, and timing outcomes per flag. Counters are kept in
/// process for the introspection endpoint and forwarded to the `metrics`
/// recorder for export.
#[derive(Default)]
pub struct MetricsCollector {
    per_flag: RwLock<HashMap<String, FlagMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_usage(&self, flag_name: &str, enabled: bool) {
        let mut per_flag = self.per_flag.write().expect("poisoned metrics lock");
        let entry = per_flag.entry(flag_name.to_string()).or_default();
        if enabled {
            entry.enabled_count += 1;
        } else {
            entry.disabled_count += 1;
        }

        metrics::counter!(
            FLAG_EVALUATION_COUNTER,
            "flag" => flag_name.to_string(),
            "enabled" => enabled.to_string()
        )
        .increment(1);
    }

    pub fn record_error(&self, flag_name: &str) {
        let mut per_flag = self.per_flag.write().expect("poisoned metrics lock");
        per_flag.entry(flag_name.to_string()).or_default().error_count += 1;

        metrics::counter!(FLAG_EVALUATION_ERRORS_COUNTER, "flag" => flag_name.to_string())
            .increment(1);
    }

    pub fn record_evaluation_time(&self, flag_name: &str, elapsed: Duration) {
        let mut per_flag = self.per_flag.write().expect("poisoned metrics lock");
        let entry = per_flag.entry(flag_name.to_string()).or_default();
        entry.evaluation_count += 1;
        entry.total_evaluation_micros += elapsed.as_micros() as u64;

        metrics::histogram!(FLAG_EVALUATION_TIME, "flag" => flag_name.to_string())
            .record(elapsed.as_secs_f64());
    }

    pub fn flag_metrics(&self, flag_name: &str) -> FlagMetrics {
        self.per_flag
            .read()
            .expect("poisoned metrics lock")
            .get(flag_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<String, FlagMetrics> {
        self.per_flag
            .read()
            .expect("poisoned metrics lock")
            .clone()
    }
}
