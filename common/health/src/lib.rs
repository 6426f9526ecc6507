use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, warn};

mod server;

pub use server::{router, HealthServer};

/// Readiness of a short-lived process, derived from its dependencies.
///
/// Each dependency registers once and then flips its own status. The process
/// is ready only when at least one dependency is registered and every one of
/// them reported `Healthy`. Statuses never expire on their own.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    /// Per-dependency status, echoed in the response body
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// 200 when ready, 500 otherwise, with the component map as the body.
    fn into_response(self) -> Response {
        let code = if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (code, format!("{self:?}")).into_response()
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered, nothing reported yet
    Starting,
    Healthy,
    Unhealthy,
}

#[derive(Error, Debug)]
pub enum HealthServerError {
    #[error("failed to bind health check server: {0}")]
    Bind(std::io::Error),
    #[error("health check server failed: {0}")]
    Serve(std::io::Error),
    #[error("health check server task did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("health registry lock poisoned while reporting {component}")]
    Poisoned { component: String },
}

type ComponentMap = Arc<RwLock<HashMap<String, ComponentStatus>>>;

/// Reporting side of one registered component.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    components: ComponentMap,
}

impl HealthHandle {
    pub fn report_healthy(&self) -> Result<(), HealthServerError> {
        self.report_status(ComponentStatus::Healthy)
    }

    pub fn report_unhealthy(&self) -> Result<(), HealthServerError> {
        self.report_status(ComponentStatus::Unhealthy)
    }

    /// Synchronously replace the component status. Readers see it on their next check.
    pub fn report_status(&self, status: ComponentStatus) -> Result<(), HealthServerError> {
        let mut map = self
            .components
            .write()
            .map_err(|_| HealthServerError::Poisoned {
                component: self.component.clone(),
            })?;
        debug!(component = %self.component, ?status, "health status reported");
        _ = map.insert(self.component.clone(), status);
        Ok(())
    }

    pub fn component(&self) -> &str {
        &self.component
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: ComponentMap,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a new component in the registry, in the Starting status. The returned
    /// handle should be passed to the component owner, to flip its health status.
    pub fn register(&self, component: &str) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            components: self.components.clone(),
        };
        if let Err(err) = handle.report_status(ComponentStatus::Starting) {
            warn!("failed to register {} in {}: {}", component, self.name, err);
        }
        handle
    }

    /// Combine the current component statuses into one readiness verdict.
    pub fn get_status(&self) -> HealthStatus {
        let components = match self.components.read() {
            Ok(components) => components,
            Err(_) => {
                // Poisoned lock: report unhealthy, the orchestrator will restart us
                warn!("poisoned HealthRegistry lock for {}", self.name);
                return HealthStatus::default();
            }
        };

        let status = HealthStatus {
            healthy: !components.is_empty()
                && components
                    .values()
                    .all(|component| *component == ComponentStatus::Healthy),
            components: components.clone(),
        };

        match status.healthy {
            true => debug!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, status.components),
        }
        status
    }
}
