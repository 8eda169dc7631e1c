use anyhow::{Context, Result, anyhow};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub mod logging;
pub mod ocr;
pub mod overlay;
pub mod providers;
pub mod server;
pub mod settings;
mod translator;

#[cfg(test)]
mod test_util;

pub use ocr::{OcrEngine, OcrService, TesseractEngine};
pub use overlay::{
    Compositor, EditHistory, MemoryHistory, PipelineError, Region, RunOutcome, TextPainter,
    VisualLayer,
};
pub use providers::{OpenAI, ProviderImpl, RemoteBoundary, TranslationProvider};
pub use translator::{LanguageMenu, Translator};

use settings::Settings;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub image: Option<String>,
    pub region: Option<String>,
    pub display_size: Option<String>,
    pub lang: Option<String>,
    pub out: Option<String>,
    pub serve: Option<String>,
    pub remote: Option<String>,
    pub show_languages: bool,
    pub model: Option<String>,
    pub key: Option<String>,
    pub settings_path: Option<String>,
    pub verbose: bool,
}

pub async fn run(config: Config) -> Result<String> {
    let settings_path = config.settings_path.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;

    if let Some(addr) = config.serve.as_deref() {
        let addr = if addr.trim().is_empty() {
            settings.server_addr.as_str()
        } else {
            addr.trim()
        };
        let provider = openai_provider(&config, &settings)?;
        let state = server::ServerState::new(tesseract_engine(&settings), provider);
        server::run_server(state, addr).await?;
        return Ok(String::new());
    }

    let remote = config.remote.as_deref().map(RemoteBoundary::new);

    if config.show_languages {
        let menu = match &remote {
            Some(boundary) => LanguageMenu::load(boundary).await?,
            None => LanguageMenu::new(settings.languages.clone()),
        };
        return Ok(menu.render());
    }

    let image_path = config
        .image
        .as_deref()
        .ok_or_else(|| anyhow!("--image is required (or use --serve / --show-languages)"))?;
    let region = config
        .region
        .as_deref()
        .ok_or_else(|| anyhow!("--region is required with --image"))?;
    let region = parse_region(region)?;

    let source = image::open(image_path)
        .with_context(|| format!("failed to open image: {}", image_path))?
        .to_rgba8();
    let region = match config.display_size.as_deref() {
        Some(value) => region.with_display_size(source.dimensions(), parse_display_size(value)?),
        None => region,
    };
    let painter = TextPainter::new(
        settings.overlay_font_path.as_deref().map(Path::new),
        settings.overlay_font_family.as_deref(),
    )?;

    let (outcome, layers) = match remote {
        Some(boundary) => {
            let provider = ProviderImpl::Remote(boundary.clone());
            translate_once(boundary, provider, painter, &config, &source, &region).await?
        }
        None => {
            let provider = openai_provider(&config, &settings)?;
            let engine = tesseract_engine(&settings);
            translate_once(engine, provider, painter, &config, &source, &region).await?
        }
    };

    let out = output_path(image_path, config.out.as_deref());
    let summary = match outcome {
        RunOutcome::Committed {
            translation, lines, ..
        } => {
            let mut composed = source;
            let scale = (region.scale_x, region.scale_y);
            for layer in &layers {
                layer.composite_into(&mut composed, scale);
            }
            composed
                .save(&out)
                .with_context(|| format!("failed to write image: {}", out.display()))?;
            info!(path = %out.display(), lines = lines.len(), "translated screenshot written");
            format!(
                "{}\n{}\nwritten to {}",
                translation.original_full_text,
                translation.translated_full_text,
                out.display()
            )
        }
        RunOutcome::NothingRecognized => "no text recognized in region".to_string(),
        RunOutcome::Superseded => "translation superseded".to_string(),
    };
    Ok(summary)
}

async fn translate_once<E: OcrEngine>(
    engine: E,
    provider: ProviderImpl,
    painter: TextPainter,
    config: &Config,
    source: &RgbaImage,
    region: &Region,
) -> Result<(RunOutcome, Vec<VisualLayer>)> {
    let ocr = Arc::new(OcrService::new(engine));
    let history = Arc::new(MemoryHistory::default());
    let compositor = Compositor::new(ocr.clone(), provider, history.clone(), painter);
    let mut translator = Translator::initialize(compositor).await?;
    if let Some(code) = config.lang.as_deref() {
        translator.menu_mut().select(code)?;
    }
    let outcome = translator.translate(source, region).await;
    ocr.dispose().await;
    let outcome = outcome.map_err(anyhow::Error::new)?;
    Ok((outcome, history.layers()))
}

fn openai_provider(config: &Config, settings: &Settings) -> Result<ProviderImpl> {
    let key = providers::resolve_key(config.key.as_deref())?;
    let mut provider = OpenAI::new(key).with_languages(settings.languages.clone());
    if let Some(model) = config.model.as_deref().or(settings.model.as_deref()) {
        provider = provider.with_model(model);
    }
    Ok(ProviderImpl::OpenAI(provider))
}

fn tesseract_engine(settings: &Settings) -> TesseractEngine {
    TesseractEngine::new(settings.ocr_languages.clone())
        .with_binary(settings.tesseract.clone())
        .with_psm(settings.ocr_psm)
}

fn output_path(image_path: &str, out: Option<&str>) -> PathBuf {
    if let Some(out) = out.filter(|out| !out.trim().is_empty()) {
        return PathBuf::from(out);
    }
    let path = Path::new(image_path);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "screenshot".to_string());
    path.with_file_name(format!("{}.translated.png", stem))
}

/// Parses `x,y,w,h` in display coordinates.
pub fn parse_region(value: &str) -> Result<Region> {
    let parts = value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("invalid region component '{}'", part.trim()))
        })
        .collect::<Result<Vec<_>>>()?;
    let [x, y, width, height] = parts[..] else {
        return Err(anyhow!("region must be x,y,w,h (got '{}')", value));
    };
    if !(width > 0.0 && height > 0.0) {
        return Err(anyhow!("region must have a positive size (got '{}')", value));
    }
    Ok(Region::new(x, y, width, height))
}

/// Parses `WxH`, the size the screenshot is displayed at.
pub fn parse_display_size(value: &str) -> Result<(f32, f32)> {
    let (width, height) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("display size must be WxH (got '{}')", value))?;
    let width: f32 = width
        .trim()
        .parse()
        .with_context(|| format!("invalid display width '{}'", width))?;
    let height: f32 = height
        .trim()
        .parse()
        .with_context(|| format!("invalid display height '{}'", height))?;
    if !(width > 0.0 && height > 0.0) {
        return Err(anyhow!("display size must be positive (got '{}')", value));
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_region() {
        let region = parse_region("10, 20,300.5,40").expect("region");
        assert_eq!(region.placement.x, 10.0);
        assert_eq!(region.placement.width, 300.5);
        assert_eq!(region.scale_x, 1.0);
    }

    #[test]
    fn rejects_bad_regions() {
        assert!(parse_region("1,2,3").is_err());
        assert!(parse_region("1,2,0,4").is_err());
        assert!(parse_region("a,2,3,4").is_err());
    }

    #[test]
    fn parses_display_size() {
        assert_eq!(parse_display_size("800x600").unwrap(), (800.0, 600.0));
        assert_eq!(parse_display_size(" 1280X720 ").unwrap(), (1280.0, 720.0));
        assert!(parse_display_size("800").is_err());
        assert!(parse_display_size("0x600").is_err());
    }

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            output_path("/tmp/shots/capture.png", None),
            PathBuf::from("/tmp/shots/capture.translated.png")
        );
        assert_eq!(output_path("a.png", Some("b.png")), PathBuf::from("b.png"));
    }
}
