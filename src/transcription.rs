//! Speech to text for voice notes, called synchronously during intake.

use std::time::Duration;

use anyhow::{bail, Context};
use axum::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::ProviderConfig;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// `file_name` carries the extension the provider uses to detect the codec.
    async fn transcribe(
        &self,
        audio: Bytes,
        content_type: &str,
        file_name: &str,
    ) -> anyhow::Result<String>;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Clone)]
pub struct OpenAiTranscriber {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(cfg: &ProviderConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent("shudo/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.transcription_model.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    #[instrument(skip(self, audio), fields(bytes = audio.len()))]
    async fn transcribe(
        &self,
        audio: Bytes,
        content_type: &str,
        file_name: &str,
    ) -> anyhow::Result<String> {
        let file = multipart::Part::stream(audio)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .context("audio content type")?;
        let form = multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", file);

        let res = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("transcription request")?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            bail!("transcription failed with {status}: {body}");
        }
        let parsed: TranscriptionResponse =
            res.json().await.context("decode transcription response")?;
        debug!(chars = parsed.text.len(), "audio transcribed");
        Ok(parsed.text.trim().to_string())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Returns a fixed transcript, or fails when `transcript` is `None`.
    pub struct FixedTranscriber {
        pub transcript: Option<String>,
    }

    impl FixedTranscriber {
        pub fn new(transcript: &str) -> Self {
            Self {
                transcript: Some(transcript.to_string()),
            }
        }

        pub fn failing() -> Self {
            Self { transcript: None }
        }
    }

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _a: Bytes, _ct: &str, _f: &str) -> anyhow::Result<String> {
            match &self.transcript {
                Some(t) => Ok(t.clone()),
                None => bail!("transcription provider unavailable"),
            }
        }
    }
}
