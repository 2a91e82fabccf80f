use std::time::Duration;

use axum::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{prompt, InferenceError, InferenceJob, InferenceProvider, JobHandle};
use crate::config::ProviderConfig;

/// Background jobs on the OpenAI Responses API.
#[derive(Clone)]
pub struct OpenAiResponses {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiResponses {
    pub fn new(cfg: &ProviderConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("shudo/0.1")
            .build()?;
        Ok(Self::with_client(http, cfg))
    }

    pub fn with_client(http: Client, cfg: &ProviderConfig) -> Self {
        Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.inference_model.clone(),
        }
    }

    async fn read_json(res: reqwest::Response) -> Result<Value, InferenceError> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(InferenceError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(res.json::<Value>().await?)
    }
}

#[async_trait]
impl InferenceProvider for OpenAiResponses {
    #[instrument(skip(self, job), fields(entry_id = %job.entry_id, attempt = job.attempt.as_str()))]
    async fn dispatch(&self, job: &InferenceJob) -> Result<JobHandle, InferenceError> {
        let body = prompt::request_body(&self.model, job);
        let res = self
            .http
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let value = Self::read_json(res).await?;
        let handle: JobHandle = serde_json::from_value(value)
            .map_err(|e| InferenceError::Parse(format!("job handle: {e}")))?;
        debug!(job_id = %handle.id, status = ?handle.status, "inference job accepted");
        Ok(handle)
    }

    #[instrument(skip(self))]
    async fn retrieve(&self, job_id: &str) -> Result<Value, InferenceError> {
        let res = self
            .http
            .get(format!("{}/responses/{job_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::read_json(res).await
    }
}
