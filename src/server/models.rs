use serde::{Deserialize, Serialize};

use crate::ocr::Word;

/// `image` is a `data:image/...;base64,` URL or bare base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrRequest {
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Word>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OcrResponse {
    pub fn recognized(text: String, words: Vec<Word>) -> Self {
        Self {
            success: true,
            text: Some(text),
            words: Some(words),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
