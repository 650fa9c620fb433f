use std::future::{ready, Future};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use health::{HealthHandle, HealthRegistry};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::endpoint;
use crate::circuit_breaker::CircuitBreaker;
use crate::cohorts::cohort_manager::CohortManager;
use crate::config::Config;
use crate::flags::flag_manager::FeatureFlagManager;
use crate::metrics::collector::MetricsCollector;
use crate::remote_config::{subscribe_manager, HttpConfigSource, RemoteConfigPoller};

#[derive(Clone)]
pub struct AppState {
    pub flag_manager: Arc<FeatureFlagManager>,
    pub cohort_manager: Arc<CohortManager>,
    pub collector: Arc<MetricsCollector>,
    pub config: Config,
}

pub fn router(state: AppState, liveness: HealthRegistry) -> Router {
    // Permissive CORS: SDK clients and reverse proxies send funky headers
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::mirror_request());

    let status_router = Router::new()
        .route("/", get(endpoint::index))
        .route("/_readiness", get(|| ready("ready")))
        .route("/_liveness", get(move || ready(liveness.get_status())));

    let flags_router = Router::new()
        .route("/flags", post(endpoint::flags))
        .route("/flags/", post(endpoint::flags))
        .route("/flags/:flag_name/metrics", get(endpoint::flag_metrics))
        .layer(ConcurrencyLimitLayer::new(state.config.max_concurrency));

    Router::new()
        .merge(status_router)
        .merge(flags_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let cohort_manager = Arc::new(CohortManager::new());
    let breaker = Arc::new(CircuitBreaker::new());
    let collector = Arc::new(MetricsCollector::new());
    let flag_manager = Arc::new(FeatureFlagManager::with_cache_ttl(
        cohort_manager.clone(),
        breaker,
        collector.clone(),
        Duration::from_secs(config.evaluation_cache_ttl_secs),
    ));
    flag_manager.seed_default_flags();

    if !config.flags_config_path.is_empty() {
        match flag_manager.load_local_config(&config.flags_config_path) {
            Ok(count) => {
                tracing::info!(count, path = %config.flags_config_path, "local flags loaded")
            }
            Err(e) => {
                tracing::error!(path = %config.flags_config_path, "failed to load local flags: {e}")
            }
        }
    }

    let liveness = HealthRegistry::new("liveness");

    let simple_loop = liveness
        .register("simple_loop".to_string(), Duration::from_secs(30))
        .await;
    tokio::spawn(liveness_loop(simple_loop));

    let poller = if config.remote_config_url.is_empty() {
        None
    } else {
        let poll_interval = Duration::from_secs(config.remote_config_poll_interval_secs);
        let poller_health = liveness
            .register("remote_config".to_string(), poll_interval * 3)
            .await;
        let source = Arc::new(HttpConfigSource::new(config.remote_config_url.clone()));
        let (updates_tx, updates_rx) = mpsc::channel(8);
        // The subscription task detaches; it exits when the poller drops the
        // sender side.
        let _subscription = subscribe_manager(flag_manager.clone(), updates_rx);
        Some(RemoteConfigPoller::start(
            source,
            poll_interval,
            updates_tx,
            Some(poller_health),
        ))
    };

    let state = AppState {
        flag_manager,
        cohort_manager,
        collector,
        config,
    };
    let app = router(state, liveness);

    tracing::info!("listening on {:?}", listener.local_addr().unwrap());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap();

    if let Some(poller) = poller {
        poller.stop_polling();
    }
}

async fn liveness_loop(handle: HealthHandle) {
    loop {
        handle.report_healthy().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
}
