use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::errors::FlagError;
use crate::flags::flag_manager::FeatureFlagManager;
use crate::flags::flag_models::FlagsSnapshot;
use crate::metrics::consts::{REMOTE_CONFIG_ERRORS_COUNTER, REMOTE_CONFIG_POLLS_COUNTER};

/// Where flag definitions come from. The network lives behind this trait so
/// the poller can be driven by an in-memory source in tests.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self) -> Result<FlagsSnapshot, FlagError>;
}

/// Fetches `{ flags: { ... } }` documents from an HTTP endpoint.
pub struct HttpConfigSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpConfigSource {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    async fn fetch(&self) -> Result<FlagsSnapshot, FlagError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| FlagError::RemoteConfigUnavailable(e.to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|e| FlagError::RemoteConfigUnavailable(e.to_string()))?;

        response
            .json::<FlagsSnapshot>()
            .await
            .map_err(|e| FlagError::RemoteConfigUnavailable(e.to_string()))
    }
}

/// Polls a config source on an interval and publishes each fetched snapshot
/// on a channel. Poll failures are logged and counted; the loop never dies
/// on them. `stop_polling` shuts the loop down for graceful exit.
pub struct RemoteConfigPoller {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RemoteConfigPoller {
    pub fn start(
        source: Arc<dyn ConfigSource>,
        interval: Duration,
        updates: mpsc::Sender<FlagsSnapshot>,
        liveness: Option<HealthHandle>,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        metrics::counter!(REMOTE_CONFIG_POLLS_COUNTER).increment(1);
                        match source.fetch().await {
                            Ok(snapshot) => {
                                if let Some(handle) = &liveness {
                                    handle.report_healthy().await;
                                }
                                if updates.send(snapshot).await.is_err() {
                                    // Receiver gone, nobody left to update
                                    break;
                                }
                            }
                            Err(e) => {
                                metrics::counter!(REMOTE_CONFIG_ERRORS_COUNTER).increment(1);
                                warn!("remote config poll failed: {e}");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("remote config poller stopping");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown: shutdown_tx,
            handle,
        }
    }

    pub fn stop_polling(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Subscribes a manager to a snapshot channel: each published snapshot
/// atomically replaces the manager's flag map.
pub fn subscribe_manager(
    manager: Arc<FeatureFlagManager>,
    mut updates: mpsc::Receiver<FlagsSnapshot>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(snapshot) = updates.recv().await {
            manager.update_flags(snapshot);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::cohorts::cohort_manager::CohortManager;
    use crate::flags::flag_models::EvaluationContext;
    use crate::metrics::collector::MetricsCollector;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct StaticSource {
        snapshot: FlagsSnapshot,
        polls: AtomicU32,
    }

    #[async_trait]
    impl ConfigSource for StaticSource {
        async fn fetch(&self) -> Result<FlagsSnapshot, FlagError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshot.clone())
        }
    }

    struct FailingSource {
        failed: AtomicBool,
    }

    #[async_trait]
    impl ConfigSource for FailingSource {
        async fn fetch(&self) -> Result<FlagsSnapshot, FlagError> {
            self.failed.store(true, Ordering::SeqCst);
            Err(FlagError::RemoteConfigUnavailable("boom".to_string()))
        }
    }

    fn manager() -> Arc<FeatureFlagManager> {
        Arc::new(FeatureFlagManager::new(
            Arc::new(CohortManager::new()),
            Arc::new(CircuitBreaker::new()),
            Arc::new(MetricsCollector::new()),
        ))
    }

    #[tokio::test]
    async fn test_poller_delivers_snapshots_to_manager() {
        let snapshot: FlagsSnapshot =
            serde_yaml::from_str("flags:\n  remote_flag:\n    default: true\n").unwrap();
        let source = Arc::new(StaticSource {
            snapshot,
            polls: AtomicU32::new(0),
        });

        let manager = manager();
        let (tx, rx) = mpsc::channel(4);
        let _subscription = subscribe_manager(manager.clone(), rx);
        let poller =
            RemoteConfigPoller::start(source.clone(), Duration::from_millis(10), tx, None);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !manager.is_enabled("remote_flag", &EvaluationContext::for_user("u1")) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "snapshot never reached the manager"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(source.polls.load(Ordering::SeqCst) >= 1);

        poller.stop_polling();
    }

    #[tokio::test]
    async fn test_poll_failures_do_not_kill_the_loop() {
        let source = Arc::new(FailingSource {
            failed: AtomicBool::new(false),
        });
        let (tx, mut rx) = mpsc::channel(4);
        let poller = RemoteConfigPoller::start(source.clone(), Duration::from_millis(5), tx, None);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(source.failed.load(Ordering::SeqCst));
        assert!(!poller.is_finished());
        assert!(rx.try_recv().is_err());

        poller.stop_polling();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !poller.is_finished() {
            assert!(tokio::time::Instant::now() < deadline, "poller never stopped");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
