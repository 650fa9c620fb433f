use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::metrics::consts::{CIRCUIT_OPENED_COUNTER, CIRCUIT_RESET_COUNTER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, the flag evaluates as configured.
    Closed,
    /// Error threshold breached, the flag is suppressed until reset.
    Open,
}

/// Error-rate policy a flag opts into via its `error_threshold` field.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ErrorThreshold {
    /// Error rate (0.0..=1.0) above which the circuit opens.
    pub rate: f64,
    /// Rolling window in seconds over which outcomes are counted.
    pub window: u64,
    /// Minimum samples inside the window before the rate is trusted.
    pub min_samples: usize,
}

impl Default for ErrorThreshold {
    fn default() -> Self {
        Self {
            rate: 0.5,
            window: 60,
            min_samples: 10,
        }
    }
}

#[derive(Debug)]
struct FlagWindow {
    /// Timestamped outcomes, true = success. Pruned to the threshold window
    /// on every record.
    samples: VecDeque<(Instant, bool)>,
    state: CircuitState,
}

impl FlagWindow {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            state: CircuitState::Closed,
        }
    }
}

/// Per-flag error-rate tracking. The circuit opens when the error rate over
/// the configured rolling window breaches the flag's threshold with enough
/// samples, and only closes again through an explicit `reset` (the flag
/// manager calls it on `rollback`). While open, the manager suppresses the
/// flag without touching cohorts or rollout logic.
pub struct CircuitBreaker {
    thresholds: RwLock<HashMap<String, ErrorThreshold>>,
    default_threshold: ErrorThreshold,
    windows: Mutex<HashMap<String, FlagWindow>>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_default_threshold(ErrorThreshold::default())
    }

    pub fn with_default_threshold(default_threshold: ErrorThreshold) -> Self {
        Self {
            thresholds: RwLock::new(HashMap::new()),
            default_threshold,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a flag-specific threshold. Called by the manager whenever
    /// flag definitions load or change.
    pub fn configure(&self, flag_name: &str, threshold: ErrorThreshold) {
        self.thresholds
            .write()
            .expect("poisoned threshold lock")
            .insert(flag_name.to_string(), threshold);
    }

    fn threshold_for(&self, flag_name: &str) -> ErrorThreshold {
        self.thresholds
            .read()
            .expect("poisoned threshold lock")
            .get(flag_name)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn is_open(&self, flag_name: &str) -> bool {
        self.get_state(flag_name) == CircuitState::Open
    }

    pub fn get_state(&self, flag_name: &str) -> CircuitState {
        self.windows
            .lock()
            .expect("poisoned window lock")
            .get(flag_name)
            .map(|window| window.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn record_success(&self, flag_name: &str) {
        self.record(flag_name, true);
    }

    pub fn record_error(&self, flag_name: &str) {
        self.record(flag_name, false);
    }

    fn record(&self, flag_name: &str, success: bool) {
        let threshold = self.threshold_for(flag_name);
        let now = Instant::now();

        let mut windows = self.windows.lock().expect("poisoned window lock");
        let window = windows
            .entry(flag_name.to_string())
            .or_insert_with(FlagWindow::new);

        window.samples.push_back((now, success));
        let horizon = Duration::from_secs(threshold.window);
        while let Some((at, _)) = window.samples.front() {
            if now.duration_since(*at) > horizon {
                window.samples.pop_front();
            } else {
                break;
            }
        }

        // Open transitions happen here; the only way back is reset()
        if window.state == CircuitState::Closed {
            let total = window.samples.len();
            if total >= threshold.min_samples {
                let errors = window.samples.iter().filter(|(_, ok)| !ok).count();
                let error_rate = errors as f64 / total as f64;
                if error_rate > threshold.rate {
                    window.state = CircuitState::Open;
                    warn!(
                        flag = flag_name,
                        error_rate, total, "circuit breaker opened"
                    );
                    metrics::counter!(CIRCUIT_OPENED_COUNTER, "flag" => flag_name.to_string())
                        .increment(1);
                }
            }
        }
    }

    /// Closes the circuit and discards the window. Used by operators and by
    /// `rollback`, which needs evaluation to resume from a clean slate.
    pub fn reset(&self, flag_name: &str) {
        let mut windows = self.windows.lock().expect("poisoned window lock");
        if let Some(window) = windows.get_mut(flag_name) {
            if window.state == CircuitState::Open {
                info!(flag = flag_name, "circuit breaker reset");
                metrics::counter!(CIRCUIT_RESET_COUNTER, "flag" => flag_name.to_string())
                    .increment(1);
            }
            window.samples.clear();
            window.state = CircuitState::Closed;
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
