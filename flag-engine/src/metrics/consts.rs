pub const FLAG_EVALUATION_COUNTER: &str = "flag_engine_evaluations_total";
pub const FLAG_EVALUATION_ERRORS_COUNTER: &str = "flag_engine_evaluation_errors_total";
pub const FLAG_EVALUATION_TIME: &str = "flag_engine_evaluation_seconds";
pub const FLAG_CACHE_HIT_COUNTER: &str = "flag_engine_eval_cache_hits_total";

pub const CIRCUIT_OPENED_COUNTER: &str = "flag_engine_circuit_opened_total";
pub const CIRCUIT_RESET_COUNTER: &str = "flag_engine_circuit_reset_total";

pub const COHORT_CACHE_HIT_COUNTER: &str = "flag_engine_cohort_cache_hits_total";
pub const COHORT_CACHE_MISS_COUNTER: &str = "flag_engine_cohort_cache_misses_total";

pub const REMOTE_CONFIG_POLLS_COUNTER: &str = "flag_engine_remote_config_polls_total";
pub const REMOTE_CONFIG_ERRORS_COUNTER: &str = "flag_engine_remote_config_errors_total";

pub const ROUTER_REQUESTS_COUNTER: &str = "flag_engine_router_requests_total";
pub const ROUTER_ERRORS_COUNTER: &str = "flag_engine_router_errors_total";
pub const ROUTER_REQUEST_TIME: &str = "flag_engine_router_request_seconds";
