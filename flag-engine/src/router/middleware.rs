use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::api::errors::RouterError;
use crate::metrics::consts::{ROUTER_REQUESTS_COUNTER, ROUTER_REQUEST_TIME};
use crate::router::detector::VersionDetector;
use crate::router::models::{VersionRequest, VersionResponse, VERSION_HEADER};
use crate::router::version::Version;

/// A version-specific backend, registered with the router by the embedding
/// application.
#[async_trait]
pub trait VersionHandler: Send + Sync {
    async fn handle(&self, request: VersionRequest) -> Result<VersionResponse, RouterError>;
    async fn health_check(&self) -> Result<(), RouterError>;
}

/// A cross-cutting step in the routing pipeline. Call `next.run(request)`
/// to continue, or return a response to short-circuit the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        request: VersionRequest,
        next: Next<'_>,
    ) -> Result<VersionResponse, RouterError>;
}

/// The remainder of the chain. The terminal step invokes the
/// version-appropriate handler.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    handler: &'a dyn VersionHandler,
}

impl Next<'_> {
    pub async fn run(mut self, request: VersionRequest) -> Result<VersionResponse, RouterError> {
        if let Some((middleware, rest)) = self.rest.split_first() {
            self.rest = rest;
            middleware.handle(request, self).await
        } else {
            self.handler.handle(request).await
        }
    }
}

/// Onion composition over an ordered middleware list: middlewares run in
/// registration order on the way in, reverse order on the way out.
pub struct VersionPipeline {
    detector: VersionDetector,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl VersionPipeline {
    pub fn new(detector: VersionDetector) -> Self {
        Self {
            detector,
            middlewares: Vec::new(),
        }
    }

    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Detects the version, tags the request with it, runs the chain, and
    /// stamps the response with the version and total processing time.
    pub async fn process(
        &self,
        mut request: VersionRequest,
        v1_handler: &dyn VersionHandler,
        v2_handler: &dyn VersionHandler,
    ) -> Result<VersionResponse, RouterError> {
        let started = Instant::now();

        let version = self.detector.detect_version(&request);
        request.set_header(VERSION_HEADER, &version.to_string());

        let handler = match version {
            Version::V1 => v1_handler,
            Version::V2 => v2_handler,
        };

        let next = Next {
            rest: &self.middlewares,
            handler,
        };
        let mut response = next.run(request).await?;

        response.version = version;
        response.processing_time = Some(started.elapsed().as_millis() as u64);
        Ok(response)
    }
}

/// Rejects structurally invalid requests before they reach any handler.
pub struct ValidationMiddleware;

#[async_trait]
impl Middleware for ValidationMiddleware {
    async fn handle(
        &self,
        request: VersionRequest,
        next: Next<'_>,
    ) -> Result<VersionResponse, RouterError> {
        if request.path.is_empty() {
            return Err(RouterError::Validation("request path is empty".to_string()));
        }
        if request.method.is_empty() {
            return Err(RouterError::Validation(
                "request method is empty".to_string(),
            ));
        }
        next.run(request).await
    }
}

/// Counts routed requests and records per-version timing.
pub struct MetricsMiddleware;

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn handle(
        &self,
        request: VersionRequest,
        next: Next<'_>,
    ) -> Result<VersionResponse, RouterError> {
        let version = request
            .header(VERSION_HEADER)
            .unwrap_or("unknown")
            .to_string();
        metrics::counter!(ROUTER_REQUESTS_COUNTER, "version" => version.clone()).increment(1);

        let started = Instant::now();
        let result = next.run(request).await;
        metrics::histogram!(ROUTER_REQUEST_TIME, "version" => version)
            .record(started.elapsed().as_secs_f64());
        result
    }
}
