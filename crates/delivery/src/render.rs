//! Template service client — renders a template code plus variables into
//! subject/body content over HTTP.

use std::time::Duration;

use async_trait::async_trait;

use courier_common::config::AppConfig;
use courier_common::types::{NotificationJob, RenderedContent};

use crate::error::DeliveryError;

/// Rendering seam for the consumer pipeline.
#[async_trait]
pub trait Render: Send + Sync {
    async fn render(
        &self,
        job: &NotificationJob,
        correlation_id: Option<&str>,
    ) -> Result<RenderedContent, DeliveryError>;
}

/// HTTP client for the external template service.
pub struct TemplateClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl TemplateClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.render_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.template_service_url.trim_end_matches('/').to_string(),
            token: config.template_service_token.clone(),
        })
    }
}

#[async_trait]
impl Render for TemplateClient {
    /// Any transport error, timeout, or non-2xx response is a transient
    /// dependency failure.
    async fn render(
        &self,
        job: &NotificationJob,
        correlation_id: Option<&str>,
    ) -> Result<RenderedContent, DeliveryError> {
        let body = serde_json::json!({
            "template_code": job.template_code,
            "variables": job.variables,
            "metadata": job.metadata,
            "locale": job.metadata.locale,
        });

        let mut request = self
            .http
            .post(format!("{}/api/v1/templates/render", self.base_url))
            .bearer_auth(&self.token)
            .json(&body);
        if let Some(correlation_id) = correlation_id {
            request = request.header("X-Correlation-Id", correlation_id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(format!("render request failed: {e}")))?
            .error_for_status()
            .map_err(|e| DeliveryError::Transient(format!("render rejected: {e}")))?;

        response
            .json::<RenderedContent>()
            .await
            .map_err(|e| DeliveryError::Transient(format!("render response invalid: {e}")))
    }
}
