use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde::Serialize;

use crate::error::StoreError;
use crate::store::gateway::SessionId;
use crate::store::rest::{http_client, REQUEST_TIMEOUT};

/// Asks the external service to compute sleep metrics for a finished session.
#[async_trait]
pub trait MetricsTrigger: Send + Sync {
    async fn request_metrics(&self, session_id: SessionId) -> Result<(), StoreError>;
}

#[derive(Debug, Serialize)]
struct ComputeRequest {
    sleep_record_id: SessionId,
}

#[derive(Debug, Clone)]
pub struct HttpMetricsTrigger {
    client: Client,
    endpoint: String,
}

impl HttpMetricsTrigger {
    pub fn new(endpoint: &str) -> Result<Self, StoreError> {
        Ok(HttpMetricsTrigger { client: http_client(REQUEST_TIMEOUT)?, endpoint: endpoint.to_string() })
    }
}

#[async_trait]
impl MetricsTrigger for HttpMetricsTrigger {
    async fn request_metrics(&self, session_id: SessionId) -> Result<(), StoreError> {
        let response = self.client
            .post(&self.endpoint)
            .json(&ComputeRequest { sleep_record_id: session_id })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status { status: status.as_u16(), body });
        }

        info!("Requested metrics computation for session {}", session_id);
        Ok(())
    }
}

/// Used when no metrics endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct DisabledMetrics;

#[async_trait]
impl MetricsTrigger for DisabledMetrics {
    async fn request_metrics(&self, session_id: SessionId) -> Result<(), StoreError> {
        warn!("No metrics endpoint configured; not computing metrics for session {}", session_id);
        Ok(())
    }
}
