//! HTTP client for the entry endpoints, used by the poller and by callers
//! that submit entries.

use std::sync::Arc;
use std::time::Duration;

use axum::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use super::EntryStatusSource;
use crate::entries::dto::{CreatedEntryResponse, EntryDetails};
use crate::entries::EntryStatusView;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("no access token: {0}")]
    Token(String),
}

/// Supplies a current bearer token; implementations refresh as needed.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> anyhow::Result<String>;
}

pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub body: Bytes,
    pub content_type: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub text: Option<String>,
    pub timezone: String,
    pub image: Option<FileUpload>,
    pub audio: Option<FileUpload>,
}

#[derive(Clone)]
pub struct HttpEntryClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpEntryClient {
    /// `base_url` includes the API prefix, e.g. `https://host/api/v1`.
    pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("shudo-client/0.1")
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    async fn authorized(&self, req: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| ClientError::Token(format!("{e:#}")))?;
        Ok(req.bearer_auth(token))
    }

    async fn json<T: DeserializeOwned>(res: Response) -> Result<T, ClientError> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(res.json::<T>().await?)
    }

    fn file_part(upload: FileUpload) -> Result<multipart::Part, ClientError> {
        Ok(multipart::Part::bytes(upload.body.to_vec())
            .file_name(upload.file_name)
            .mime_str(&upload.content_type)?)
    }

    /// POST /entries
    #[instrument(skip(self, submission))]
    pub async fn submit(&self, submission: Submission) -> Result<CreatedEntryResponse, ClientError> {
        let mut form = multipart::Form::new().text("timezone", submission.timezone);
        if let Some(text) = submission.text {
            form = form.text("text", text);
        }
        if let Some(audio) = submission.audio {
            form = form.part("audio", Self::file_part(audio)?);
        }
        if let Some(image) = submission.image {
            form = form.part("image", Self::file_part(image)?);
        }

        let req = self
            .authorized(self.http.post(format!("{}/entries", self.base_url)))
            .await?;
        Self::json(req.multipart(form).send().await?).await
    }
}

#[async_trait]
impl EntryStatusSource for HttpEntryClient {
    async fn fetch_status(&self, entry_id: Uuid) -> Result<EntryStatusView, ClientError> {
        let req = self
            .authorized(
                self.http
                    .get(format!("{}/entries/{entry_id}/status", self.base_url)),
            )
            .await?;
        Self::json(req.send().await?).await
    }

    async fn fetch_entry(&self, entry_id: Uuid) -> Result<EntryDetails, ClientError> {
        let req = self
            .authorized(self.http.get(format!("{}/entries/{entry_id}", self.base_url)))
            .await?;
        Self::json(req.send().await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::EntryStatus;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpEntryClient {
        HttpEntryClient::new(
            &format!("{}/api/v1", server.uri()),
            Arc::new(StaticToken("tok".into())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fetches_status_with_bearer_token() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/entries/{id}/status")))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id,
                "status": "complete",
                "protein_g": 12.0,
                "carbs_g": 30.0,
                "fat_g": 4.0,
                "calories_kcal": 204.0,
                "raw_text": "oatmeal"
            })))
            .mount(&server)
            .await;

        let view = client(&server).fetch_status(id).await.unwrap();
        assert_eq!(view.status, EntryStatus::Complete);
        assert_eq!(view.calories_kcal, Some(204.0));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/entries/{id}/status")))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({ "error": "entry not found" })),
            )
            .mount(&server)
            .await;

        match client(&server).fetch_status(id).await {
            Err(ClientError::Status { status, body }) => {
                assert_eq!(status, 404);
                assert!(body.contains("entry not found"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn submit_posts_multipart_form() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/api/v1/entries"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entry_id": id,
                "image_path": "user/u/entry/e/image_1.jpg",
                "audio_path": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server)
            .submit(Submission {
                text: Some("toast".into()),
                timezone: "UTC".into(),
                image: Some(FileUpload {
                    body: Bytes::from_static(b"jpeg"),
                    content_type: "image/jpeg".into(),
                    file_name: "meal.jpg".into(),
                }),
                audio: None,
            })
            .await
            .unwrap();
        assert_eq!(created.entry_id, id);
        assert!(created.audio_path.is_none());

        let requests = server.received_requests().await.unwrap();
        let content_type = requests[0]
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("multipart/form-data"));
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"image\""));
        assert!(body.contains("name=\"text\""));
    }
}
