use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::retry::{Backoff, is_rate_limited, retry_after};
use super::{LanguagesResponse, ProviderFuture, TranslateRequest, TranslateResponse, TranslationProvider};
use crate::ocr::{OcrEngine, OcrFuture, OcrSession, RawRecognition, RawWord};
use crate::server::encode_image_payload;
use crate::server::models::{ErrorResponse, OcrRequest};

/// Client for a boundary server. It stands in for both the OCR engine and
/// the translation provider on the unprivileged side.
#[derive(Debug, Clone)]
pub struct RemoteBoundary {
    base_url: String,
    client: reqwest::Client,
}

/// A checked connection to the boundary's OCR endpoint.
#[derive(Debug, Clone)]
pub struct RemoteSession {
    boundary: RemoteBoundary,
}

impl RemoteBoundary {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to reach boundary at {}", self.base_url))?;
        if !response.status().is_success() {
            return Err(anyhow!("boundary health check failed ({})", response.status()));
        }
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.call(path, None::<&()>).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.call(path, Some(body)).await
    }

    async fn call<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = Backoff::new("boundary");
        loop {
            let can_retry = backoff.record_attempt();
            let request = match body {
                Some(body) => self.client.post(&url).json(body),
                None => self.client.get(&url),
            };
            let response = request
                .send()
                .await
                .with_context(|| format!("failed to reach boundary at {}", url))?;
            let status = response.status();
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            debug!(%url, %status, "boundary call finished");
            if status.is_success() {
                return serde_json::from_str(&text)
                    .with_context(|| format!("failed to parse boundary response from {}", url));
            }
            if status != StatusCode::BAD_REQUEST && is_rate_limited(status, &text) && can_retry {
                backoff.wait(retry_after).await;
                continue;
            }
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            return Err(anyhow!("boundary error ({}): {}", status, message));
        }
    }
}

/// The `/ocr` envelope as read by the client. Words stay raw so that a word
/// without a box is dropped by the OCR adapter instead of failing the call.
#[derive(Debug, Deserialize)]
struct OcrReply {
    success: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    words: Option<Vec<RawWord>>,
    #[serde(default)]
    error: Option<String>,
}

impl OcrReply {
    fn into_recognition(self) -> Result<RawRecognition> {
        if !self.success {
            return Err(anyhow!(
                "{}",
                self.error.unwrap_or_else(|| "remote ocr failed".to_string())
            ));
        }
        Ok(RawRecognition {
            text: self.text.unwrap_or_default(),
            words: self.words.unwrap_or_default(),
        })
    }
}

impl TranslationProvider for RemoteBoundary {
    fn translate(&self, request: TranslateRequest) -> ProviderFuture<'_, TranslateResponse> {
        Box::pin(async move { self.post("/translate", &request).await })
    }

    fn list_languages(&self) -> ProviderFuture<'_, LanguagesResponse> {
        Box::pin(async move { self.get("/languages").await })
    }
}

impl OcrEngine for RemoteBoundary {
    type Session = RemoteSession;

    fn start(&self) -> OcrFuture<'_, RemoteSession> {
        Box::pin(async move {
            self.health().await?;
            Ok(RemoteSession {
                boundary: self.clone(),
            })
        })
    }
}

impl OcrSession for RemoteSession {
    fn recognize<'a>(&'a self, image_bytes: &'a [u8]) -> OcrFuture<'a, RawRecognition> {
        Box::pin(async move {
            let request = OcrRequest {
                image: encode_image_payload(image_bytes),
            };
            let reply: OcrReply = self.boundary.post("/ocr", &request).await?;
            reply.into_recognition()
        })
    }

    fn terminate(&self) -> OcrFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
