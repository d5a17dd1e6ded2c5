//! Webhook alert delivery.

use reqwest::Client;
use std::time::Duration;

use crate::alerts::marker::FailureReport;
use crate::config::schema::AlertConfig;

/// Sends failure reports to an optional webhook.
#[derive(Debug, Clone)]
pub struct AlertEmitter {
    client: Client,
    webhook_url: Option<String>,
    timeout: Duration,
}

impl AlertEmitter {
    pub fn new(client: Client, webhook_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            webhook_url: webhook_url.filter(|u| !u.trim().is_empty()),
            timeout,
        }
    }

    pub fn from_config(client: Client, config: &AlertConfig) -> Self {
        Self::new(
            client,
            config.webhook_url.clone(),
            Duration::from_secs(config.webhook_timeout_secs),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// POST `report` as JSON. Delivery failures are logged, never returned.
    /// Returns whether the webhook accepted the report.
    pub async fn emit(&self, report: &FailureReport) -> bool {
        let Some(url) = &self.webhook_url else {
            tracing::debug!(incident_id = %report.incident_id, "No alert webhook configured");
            return false;
        };

        let result = self
            .client
            .post(url.as_str())
            .timeout(self.timeout)
            .json(report)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(response) => {
                tracing::info!(
                    incident_id = %report.incident_id,
                    status = %response.status(),
                    "Alert delivered"
                );
                true
            }
            Err(e) => {
                tracing::error!(incident_id = %report.incident_id, error = %e, "Failed to deliver alert");
                false
            }
        }
    }
}
