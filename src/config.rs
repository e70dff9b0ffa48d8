//! Orchestrator configuration

use serde::Deserialize;
use std::time::Duration;

/// Settings used when starting and enlisting in actions
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Client identity reported to the coordinator on start
    pub client_id: String,
    /// Action time limit; zero means no limit
    pub timeout: Duration,
    /// Base URL under which this service serves participant callbacks
    pub base_url: String,
    /// Recovery URL prefix passed along on join, if the deployment has one
    pub recovery_url: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            client_id: "icanact-saga-lra".to_string(),
            timeout: Duration::ZERO,
            base_url: "http://localhost:8080".to_string(),
            recovery_url: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_recovery_url(mut self, recovery_url: impl Into<String>) -> Self {
        self.recovery_url = Some(recovery_url.into());
        self
    }
}
