use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::api::errors::RouterError;
use crate::metrics::consts::ROUTER_ERRORS_COUNTER;
use crate::router::detector::VersionDetector;
use crate::router::middleware::{
    MetricsMiddleware, Middleware, ValidationMiddleware, VersionHandler, VersionPipeline,
};
use crate::router::models::{VersionRequest, VersionResponse};
use crate::router::version::Version;
use crate::router::RouterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandlerHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterHealth {
    pub overall: OverallHealth,
    pub v1: HandlerHealth,
    pub v2: HandlerHealth,
}

/// Top-level façade: detector + middleware pipeline + the two registered
/// version handlers, with a single error funnel.
///
/// The reliability contract: `route` never returns an error to the caller.
/// Every failure mode, including calling `route` before both handlers are
/// registered, comes back as a structured `VersionResponse`.
pub struct VersionRouter {
    pipeline: VersionPipeline,
    config: RouterConfig,
    v1_handler: Option<Arc<dyn VersionHandler>>,
    v2_handler: Option<Arc<dyn VersionHandler>>,
}

impl VersionRouter {
    pub fn new(config: RouterConfig) -> Self {
        let mut pipeline = VersionPipeline::new(VersionDetector::new(config.clone()));
        pipeline.use_middleware(Arc::new(ValidationMiddleware));
        pipeline.use_middleware(Arc::new(MetricsMiddleware));
        Self {
            pipeline,
            config,
            v1_handler: None,
            v2_handler: None,
        }
    }

    pub fn register_handler(&mut self, version: Version, handler: Arc<dyn VersionHandler>) {
        match version {
            Version::V1 => self.v1_handler = Some(handler),
            Version::V2 => self.v2_handler = Some(handler),
        }
    }

    /// Appends a middleware after the built-in validation and metrics steps.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.pipeline.use_middleware(middleware);
    }

    pub async fn route(&self, request: VersionRequest) -> VersionResponse {
        match self.try_route(request).await {
            Ok(response) => response,
            Err(error) => self.error_response(error),
        }
    }

    async fn try_route(&self, request: VersionRequest) -> Result<VersionResponse, RouterError> {
        let (Some(v1), Some(v2)) = (&self.v1_handler, &self.v2_handler) else {
            // Funneled through the error handler like any other failure,
            // keeping the never-throw contract airtight.
            let missing = if self.v1_handler.is_none() {
                Version::V1
            } else {
                Version::V2
            };
            return Err(RouterError::HandlerNotRegistered(missing));
        };
        self.pipeline.process(request, v1.as_ref(), v2.as_ref()).await
    }

    fn error_response(&self, error: RouterError) -> VersionResponse {
        let code = error.error_code();
        metrics::counter!(ROUTER_ERRORS_COUNTER, "code" => code).increment(1);
        warn!(code, "routing failed: {error}");

        let message = if self.config.expose_error_messages {
            error.to_string()
        } else {
            match &error {
                RouterError::Validation(_) => "Invalid request".to_string(),
                RouterError::Timeout(_) => "Request timed out".to_string(),
                RouterError::Version { .. } => "Request failed".to_string(),
                RouterError::HandlerNotRegistered(_) | RouterError::Internal(_) => {
                    "Internal server error".to_string()
                }
            }
        };

        VersionResponse {
            status: error.status_code(),
            body: json!({
                "error": code,
                "message": message,
                "timestamp": Utc::now().to_rfc3339(),
            }),
            // Safe fallback: an undecided request is served by legacy
            version: error.version_hint().unwrap_or(Version::V1),
            processing_time: None,
        }
    }

    /// Queries both handlers and aggregates: healthy when both report
    /// healthy, unhealthy when both fail, degraded on any single failure.
    pub async fn health_check(&self) -> RouterHealth {
        let v1 = Self::handler_health(self.v1_handler.as_deref()).await;
        let v2 = Self::handler_health(self.v2_handler.as_deref()).await;

        let overall = match (v1.healthy, v2.healthy) {
            (true, true) => OverallHealth::Healthy,
            (false, false) => OverallHealth::Unhealthy,
            _ => OverallHealth::Degraded,
        };

        RouterHealth { overall, v1, v2 }
    }

    async fn handler_health(handler: Option<&dyn VersionHandler>) -> HandlerHealth {
        match handler {
            None => HandlerHealth {
                healthy: false,
                detail: Some("not registered".to_string()),
            },
            Some(handler) => match handler.health_check().await {
                Ok(()) => HandlerHealth {
                    healthy: true,
                    detail: None,
                },
                Err(error) => HandlerHealth {
                    healthy: false,
                    detail: Some(error.to_string()),
                },
            },
        }
    }
}
