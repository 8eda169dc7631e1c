use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Decodes an image sent as a data URL or as bare base64.
pub(crate) fn decode_image_payload(payload: &str) -> Result<Vec<u8>> {
    let trimmed = payload.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| anyhow!("data URL has no payload"))?;
            if !meta.ends_with(";base64") {
                return Err(anyhow!("data URL must be base64 encoded"));
            }
            data
        }
        None => trimmed,
    };
    let compact: String = encoded.chars().filter(|ch| !ch.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(anyhow!("image is empty"));
    }
    BASE64
        .decode(compact.as_bytes())
        .with_context(|| "image is not valid base64")
}

pub(crate) fn encode_image_payload(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(png))
}
