use anyhow::{Context, Result, anyhow};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

use super::parse::parse_tsv;
use super::preprocess::prepare_for_ocr;
use crate::ocr::{OcrEngine, OcrFuture, OcrSession, RawRecognition};

pub const DEFAULT_OCR_LANGUAGES: &str = "chi_sim+eng";
pub const DEFAULT_PSM: u32 = 3;

/// Drives the `tesseract` command line tool.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: String,
    languages: String,
    psm: u32,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            languages: DEFAULT_OCR_LANGUAGES.to_string(),
            psm: DEFAULT_PSM,
        }
    }
}

impl TesseractEngine {
    pub fn new(languages: impl Into<String>) -> Self {
        Self {
            languages: languages.into(),
            ..Self::default()
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        let binary = binary.into();
        if !binary.trim().is_empty() {
            self.binary = binary;
        }
        self
    }

    pub fn with_psm(mut self, psm: u32) -> Self {
        self.psm = psm;
        self
    }
}

/// Languages resolved against the installed traineddata. The CLI keeps no
/// process alive between calls, so terminating only drops this handle.
#[derive(Debug, Clone)]
pub struct TesseractSession {
    binary: String,
    languages: String,
    psm: u32,
}

impl TesseractSession {
    fn recognize_blocking(&self, image_bytes: &[u8]) -> Result<RawRecognition> {
        let image = image::load_from_memory(image_bytes)
            .with_context(|| "failed to decode image for OCR")?;
        let (prepared, scale) = prepare_for_ocr(&image);

        let mut tmp = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .with_context(|| "failed to create temp file for OCR")?;
        prepared
            .write_to(&mut tmp, image::ImageFormat::Png)
            .with_context(|| "failed to write temp image for OCR")?;
        tmp.flush().ok();

        let tsv = run_tesseract_tsv(&self.binary, tmp.path(), &self.languages, self.psm)?;
        let mut recognition = parse_tsv(&tsv);
        if scale > 1 {
            for word in &mut recognition.words {
                word.bbox = word.bbox.map(|bbox| bbox.scaled_down(scale as f32));
            }
        }
        Ok(recognition)
    }
}

impl OcrEngine for TesseractEngine {
    type Session = TesseractSession;

    fn start(&self) -> OcrFuture<'_, TesseractSession> {
        let engine = self.clone();
        Box::pin(async move {
            let binary = engine.binary.clone();
            let requested = engine.languages.clone();
            let languages =
                tokio::task::spawn_blocking(move || normalize_ocr_languages(&binary, &requested))
                    .await
                    .with_context(|| "tesseract startup task failed")??;
            debug!(languages = %languages, psm = engine.psm, "tesseract ready");
            Ok(TesseractSession {
                binary: engine.binary,
                languages,
                psm: engine.psm,
            })
        })
    }
}

impl OcrSession for TesseractSession {
    fn recognize<'a>(&'a self, image_bytes: &'a [u8]) -> OcrFuture<'a, RawRecognition> {
        let session = self.clone();
        let bytes = image_bytes.to_vec();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || session.recognize_blocking(&bytes))
                .await
                .with_context(|| "tesseract task failed")?
        })
    }

    fn terminate(&self) -> OcrFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

pub fn list_tesseract_languages(binary: &str) -> Result<Vec<String>> {
    let output = Command::new(binary)
        .arg("--list-langs")
        .output()
        .with_context(|| format!("failed to run {} --list-langs (is it installed?)", binary))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract --list-langs failed: {}", stderr.trim()));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_language_list(&stdout))
}

fn parse_language_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_ocr_languages(binary: &str, requested: &str) -> Result<String> {
    let available = list_tesseract_languages(binary)?;
    select_languages(requested, &available)
}

fn select_languages(requested: &str, available: &[String]) -> Result<String> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("ocr languages is empty"));
    }

    let mut chosen = Vec::new();
    let mut missing = Vec::new();
    for raw in trimmed.split(['+', ',', ' ']) {
        let lang = raw.trim();
        if lang.is_empty() {
            continue;
        }
        if available.iter().any(|value| value == lang) {
            chosen.push(lang.to_string());
        } else {
            missing.push(lang.to_string());
        }
    }

    if chosen.is_empty() {
        return Err(anyhow!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }

    Ok(chosen.join("+"))
}

fn run_tesseract_tsv(binary: &str, path: &Path, languages: &str, psm: u32) -> Result<String> {
    let output = Command::new(binary)
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--psm")
        .arg(psm.to_string())
        .arg("-c")
        .arg("preserve_interword_spaces=1")
        .arg("tsv")
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn langs(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn list_output_skips_header() {
        let stdout = "List of available languages in \"/usr/share/tessdata/\" (3):\neng\nchi_sim\n\nosd\n";
        assert_eq!(parse_language_list(stdout), langs(&["eng", "chi_sim", "osd"]));
    }

    #[test]
    fn narrows_to_installed_languages() {
        let available = langs(&["eng", "osd"]);
        assert_eq!(select_languages("chi_sim+eng", &available).unwrap(), "eng");
        assert_eq!(
            select_languages("eng, osd", &available).unwrap(),
            "eng+osd"
        );
    }

    #[test]
    fn fails_when_nothing_is_installed() {
        let err = select_languages("chi_sim", &langs(&["eng"])).unwrap_err();
        assert!(err.to_string().contains("chi_sim"));
        assert!(select_languages("  ", &langs(&["eng"])).is_err());
    }

    #[tokio::test]
    async fn missing_binary_fails_start() {
        let engine = TesseractEngine::default().with_binary("tesseract-binary-that-does-not-exist");
        assert!(engine.start().await.is_err());
    }
}
