use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

mod openai;
mod remote;
mod retry;

pub use openai::{CHANNEL as OPENAI_CHANNEL, OpenAI, TOOL_NAME};
pub use remote::{RemoteBoundary, RemoteSession};

/// Single-shot translation request for a whole recognized block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    pub text: String,
    pub target_language_code: String,
    pub channel: String,
}

/// `success: false` is an ordinary outcome, not a transport error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranslateResponse {
    pub fn translated(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: Some(text.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            text: None,
            error: Some(error.into()),
        }
    }
}

/// A selectable target language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageItem {
    pub code: String,
    pub display_name_local: String,
    pub display_name_english: String,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_language_code: Option<String>,
}

impl LanguageItem {
    /// Code sent as `targetLanguageCode`: the channel's own code when it has one.
    pub fn target_code(&self) -> &str {
        self.channel_language_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
            .unwrap_or(&self.code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguagesResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<LanguageItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LanguagesResponse {
    pub fn listed(languages: Vec<LanguageItem>) -> Self {
        Self {
            success: true,
            languages: Some(languages),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            languages: None,
            error: Some(error.into()),
        }
    }
}

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A translation backend. An `Err` means the backend was unreachable; a
/// reachable backend that refuses reports `success: false` instead.
pub trait TranslationProvider: Send + Sync {
    fn translate(&self, request: TranslateRequest) -> ProviderFuture<'_, TranslateResponse>;
    fn list_languages(&self) -> ProviderFuture<'_, LanguagesResponse>;
}

impl<T: TranslationProvider + ?Sized> TranslationProvider for Arc<T> {
    fn translate(&self, request: TranslateRequest) -> ProviderFuture<'_, TranslateResponse> {
        (**self).translate(request)
    }

    fn list_languages(&self) -> ProviderFuture<'_, LanguagesResponse> {
        (**self).list_languages()
    }
}

#[derive(Debug, Clone)]
pub enum ProviderImpl {
    OpenAI(OpenAI),
    Remote(RemoteBoundary),
}

impl TranslationProvider for ProviderImpl {
    fn translate(&self, request: TranslateRequest) -> ProviderFuture<'_, TranslateResponse> {
        match self {
            ProviderImpl::OpenAI(provider) => provider.translate(request),
            ProviderImpl::Remote(provider) => provider.translate(request),
        }
    }

    fn list_languages(&self) -> ProviderFuture<'_, LanguagesResponse> {
        match self {
            ProviderImpl::OpenAI(provider) => provider.list_languages(),
            ProviderImpl::Remote(provider) => provider.list_languages(),
        }
    }
}

pub fn resolve_key(override_key: Option<&str>) -> Result<String> {
    if let Some(key) = override_key.filter(|key| !key.trim().is_empty()) {
        return Ok(key.to_string());
    }
    get_env("OPENAI_API_KEY")
        .ok_or_else(|| anyhow!("API key not found (set OPENAI_API_KEY or pass --key)"))
}

pub(crate) fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
