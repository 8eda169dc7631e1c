use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ocr::{DEFAULT_OCR_LANGUAGES, DEFAULT_PSM};
use crate::providers::LanguageItem;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
const SETTINGS_DIR: &str = ".screenshot-translator-rust";
pub const DEFAULT_CHANNEL: &str = crate::providers::OPENAI_CHANNEL;
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8787";

#[derive(Debug, Clone)]
pub struct Settings {
    pub ocr_languages: String,
    pub ocr_psm: u32,
    pub tesseract: String,
    pub overlay_font_path: Option<String>,
    pub overlay_font_family: Option<String>,
    pub channel: String,
    pub model: Option<String>,
    pub languages: Vec<LanguageItem>,
    pub server_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ocr_languages: DEFAULT_OCR_LANGUAGES.to_string(),
            ocr_psm: DEFAULT_PSM,
            tesseract: "tesseract".to_string(),
            overlay_font_path: None,
            overlay_font_family: None,
            channel: DEFAULT_CHANNEL.to_string(),
            model: None,
            languages: Vec::new(),
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    ocr: Option<OcrSettings>,
    overlay: Option<OverlaySettings>,
    translate: Option<TranslateSettings>,
    server: Option<ServerSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    languages: Option<String>,
    psm: Option<u32>,
    tesseract: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OverlaySettings {
    font_path: Option<String>,
    font_family: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslateSettings {
    channel: Option<String>,
    model: Option<String>,
    languages: Option<Vec<LanguageEntry>>,
}

#[derive(Debug, Deserialize)]
struct LanguageEntry {
    code: String,
    display_name_local: Option<String>,
    display_name_english: Option<String>,
    channel: Option<String>,
    channel_language_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSettings {
    addr: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings.merge_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge_str(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed);
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(ocr) = incoming.ocr {
            if let Some(languages) = non_blank(ocr.languages) {
                self.ocr_languages = languages;
            }
            if let Some(psm) = ocr.psm {
                self.ocr_psm = psm;
            }
            if let Some(binary) = non_blank(ocr.tesseract) {
                self.tesseract = binary;
            }
        }
        if let Some(overlay) = incoming.overlay {
            if let Some(path) = non_blank(overlay.font_path) {
                self.overlay_font_path = Some(path);
            }
            if let Some(family) = non_blank(overlay.font_family) {
                self.overlay_font_family = Some(family);
            }
        }
        if let Some(translate) = incoming.translate {
            if let Some(channel) = non_blank(translate.channel) {
                self.channel = channel;
            }
            if let Some(model) = non_blank(translate.model) {
                self.model = Some(model);
            }
            // a later file's list replaces the earlier one wholesale
            if let Some(entries) = translate.languages {
                self.languages = entries
                    .into_iter()
                    .filter(|entry| !entry.code.trim().is_empty())
                    .map(|entry| self.language_item(entry))
                    .collect();
            }
        }
        if let Some(server) = incoming.server {
            if let Some(addr) = non_blank(server.addr) {
                self.server_addr = addr;
            }
        }
    }

    fn language_item(&self, entry: LanguageEntry) -> LanguageItem {
        let code = entry.code.trim().to_string();
        let english = non_blank(entry.display_name_english).unwrap_or_else(|| code.clone());
        LanguageItem {
            display_name_local: non_blank(entry.display_name_local).unwrap_or_else(|| english.clone()),
            display_name_english: english,
            channel: non_blank(entry.channel).unwrap_or_else(|| self.channel.clone()),
            channel_language_code: non_blank(entry.channel_language_code),
            code,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(SETTINGS_DIR))
        }
    })
}
