use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};

use super::retry::{Backoff, is_rate_limited, retry_after};
use super::{
    LanguageItem, LanguagesResponse, ProviderFuture, TranslateRequest, TranslateResponse,
    TranslationProvider, get_env,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const TOOL_NAME: &str = "deliver_translation";
/// The only channel this backend serves.
pub const CHANNEL: &str = "gpt";

/// Chat-completions backend for the `gpt` channel. Its language list comes
/// from configuration rather than the API.
#[derive(Debug, Clone)]
pub struct OpenAI {
    key: String,
    model: String,
    base_url: String,
    languages: Vec<LanguageItem>,
    client: reqwest::Client,
}

impl OpenAI {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: get_env("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            languages: Vec::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_languages(mut self, languages: Vec<LanguageItem>) -> Self {
        self.languages = languages;
        self
    }

    async fn call(&self, request: &TranslateRequest) -> Result<TranslateResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = request_body(&self.model, request);

        let mut backoff = Backoff::new("OpenAI");
        loop {
            let can_retry = backoff.record_attempt();
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.key)
                .json(&body)
                .send()
                .await
                .with_context(|| "failed to reach OpenAI")?;

            let status = response.status();
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            if status.is_success() {
                return match extract_translation(&text) {
                    Ok(translation) => Ok(TranslateResponse::translated(translation)),
                    Err(err) => Ok(TranslateResponse::failed(format!("{:#}", err))),
                };
            }
            if is_rate_limited(status, &text) && can_retry {
                backoff.wait(retry_after).await;
                continue;
            }
            return Ok(TranslateResponse::failed(format!(
                "OpenAI API error ({}): {}",
                status,
                extract_openai_error(&text).unwrap_or(text)
            )));
        }
    }
}

impl TranslationProvider for OpenAI {
    fn translate(&self, request: TranslateRequest) -> ProviderFuture<'_, TranslateResponse> {
        Box::pin(async move {
            if !request.channel.trim().eq_ignore_ascii_case(CHANNEL) {
                return Ok(TranslateResponse::failed(format!(
                    "channel '{}' is not served by OpenAI",
                    request.channel
                )));
            }
            if request.text.trim().is_empty() {
                return Ok(TranslateResponse::failed("nothing to translate"));
            }
            self.call(&request).await
        })
    }

    fn list_languages(&self) -> ProviderFuture<'_, LanguagesResponse> {
        Box::pin(async move {
            if self.languages.is_empty() {
                return Ok(LanguagesResponse::failed("no languages configured"));
            }
            Ok(LanguagesResponse::listed(self.languages.clone()))
        })
    }
}

fn system_prompt(target_language: &str) -> String {
    format!(
        "You translate text captured from a screenshot by OCR. The text may contain \
         recognition noise and line breaks in odd places. Translate it into the language \
         with code \"{target}\", keep the meaning and tone, and do not add explanations. \
         Reply only by calling the {tool} tool.",
        target = target_language,
        tool = TOOL_NAME
    )
}

fn request_body(model: &str, request: &TranslateRequest) -> Value {
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system_prompt(&request.target_language_code)},
            {"role": "user", "content": request.text}
        ],
        "tools": [
            {
                "type": "function",
                "function": {
                    "name": TOOL_NAME,
                    "description": "Return the translated text.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "translation": {"type": "string"}
                        },
                        "required": ["translation"]
                    }
                }
            }
        ],
        "tool_choice": {"type": "function", "function": {"name": TOOL_NAME}}
    })
}

fn extract_translation(text: &str) -> Result<String> {
    let payload: ChatResponse =
        serde_json::from_str(text).with_context(|| "failed to parse OpenAI response JSON")?;
    let tool_call = payload
        .choices
        .first()
        .and_then(|choice| choice.message.tool_calls.first())
        .ok_or_else(|| anyhow!("no tool call returned from OpenAI"))?;
    if tool_call.function.name != TOOL_NAME {
        return Err(anyhow!(
            "unexpected tool name '{}' from OpenAI",
            tool_call.function.name
        ));
    }
    let args: ToolArgs = serde_json::from_str(&tool_call.function.arguments)
        .with_context(|| "failed to parse OpenAI tool arguments")?;
    let translation = args.translation.trim();
    if translation.is_empty() {
        return Err(anyhow!("OpenAI returned an empty translation"));
    }
    Ok(translation.to_string())
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    let error = serde_json::from_str::<ErrorBody>(body).ok()?.error?;
    let parts: Vec<String> = [
        error.message,
        error.kind.map(|kind| format!("type: {}", kind)),
        error.code.map(|code| format!("code: {}", code)),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.trim().is_empty())
    .collect();
    if parts.is_empty() {
        Some("unknown error".to_string())
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ToolArgs {
    translation: String,
}
