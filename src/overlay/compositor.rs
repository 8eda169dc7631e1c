use anyhow::{Context, anyhow};
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbaImage};
use serde::Serialize;
use std::fmt;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::distribute::distribute_translation;
use super::group::group_words_into_lines;
use super::render::{TextPainter, pixmap_from_rgba, rgba_from_pixmap};
use super::{RenderedLine, TranslationResult};
use crate::ocr::{BBox, OcrEngine, OcrError, OcrService};
use crate::providers::{LanguageItem, TranslateRequest, TranslationProvider};

pub const LAYER_NAME: &str = "Translation";

/// A rectangle in the editor's display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// The user's capture rectangle in display space, plus the natural/display
/// ratios that map it onto source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Region {
    pub placement: Placement,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl Region {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            placement: Placement {
                x,
                y,
                width,
                height,
            },
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    /// Derives the scale from the source image's natural size and the size it
    /// is displayed at.
    pub fn with_display_size(mut self, natural: (u32, u32), display: (f32, f32)) -> Self {
        if display.0 > 0.0 && display.1 > 0.0 {
            self.scale_x = natural.0 as f32 / display.0;
            self.scale_y = natural.1 as f32 / display.1;
        }
        self
    }

    /// `(left, top, width, height)` in source-image pixels.
    pub fn device_rect(&self) -> (i64, i64, u32, u32) {
        let p = &self.placement;
        let to_len = |value: f32| {
            let value = value.round();
            if value.is_finite() && value > 0.0 {
                value as u32
            } else {
                0
            }
        };
        (
            (p.x * self.scale_x).round() as i64,
            (p.y * self.scale_y).round() as i64,
            to_len(p.width * self.scale_x),
            to_len(p.height * self.scale_y),
        )
    }
}

/// Copies the region out of `source` at device resolution. Parts of the
/// region outside the source stay transparent.
pub fn extract_region(source: &RgbaImage, region: &Region) -> anyhow::Result<RgbaImage> {
    let (left, top, width, height) = region.device_rect();
    if width == 0 || height == 0 {
        return Err(anyhow!("capture region is empty ({}x{})", width, height));
    }
    let mut surface = RgbaImage::new(width, height);
    imageops::replace(&mut surface, source, -left, -top);
    Ok(surface)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineStage {
    Idle,
    ExtractingRegion,
    Recognizing,
    Translating,
    Distributing,
    Rendering,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::ExtractingRegion => "extracting region",
            PipelineStage::Recognizing => "recognizing",
            PipelineStage::Translating => "translating",
            PipelineStage::Distributing => "distributing",
            PipelineStage::Rendering => "rendering",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineErrorKind {
    #[error("ocr engine failed to initialize: {0:#}")]
    Initialization(anyhow::Error),
    #[error("ocr recognition failed: {0:#}")]
    Recognition(anyhow::Error),
    #[error("no target language selected")]
    NoLanguageSelected,
    #[error("translation failed: {0}")]
    Translation(String),
    #[error("failed to extract region: {0:#}")]
    Extraction(anyhow::Error),
    #[error("failed to render overlay: {0:#}")]
    Rendering(anyhow::Error),
}

impl From<OcrError> for PipelineErrorKind {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::Initialization(err) => PipelineErrorKind::Initialization(err),
            OcrError::Recognition(err) => PipelineErrorKind::Recognition(err),
        }
    }
}

/// A run that ended in `Failed`; `stage` is where it stopped.
#[derive(Debug, Error)]
#[error("translate run failed while {stage}: {kind}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub kind: PipelineErrorKind,
}

impl PipelineError {
    fn new(stage: PipelineStage, kind: impl Into<PipelineErrorKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Committed {
        run_id: u64,
        translation: TranslationResult,
        lines: Vec<RenderedLine>,
    },
    /// OCR found nothing usable; the image and history are untouched.
    NothingRecognized,
    /// A newer run (or `cancel`) took over before this one finished.
    Superseded,
}

/// Hands out monotonically increasing run ids; only the newest is current.
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    latest: Arc<AtomicU64>,
}

impl RunTracker {
    pub fn begin(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn supersede(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_current(&self, run_id: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == run_id
    }
}

/// Rendered replacement image plus where the editor should draw it.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualLayer {
    pub name: String,
    pub image: RgbaImage,
    pub placement: Placement,
}

impl VisualLayer {
    pub fn new(image: RgbaImage, placement: Placement) -> Self {
        Self {
            name: LAYER_NAME.to_string(),
            image,
            placement,
        }
    }

    pub fn png(&self) -> anyhow::Result<Vec<u8>> {
        encode_png(&self.image)
    }

    /// Draws the layer onto `target`, an image whose pixels relate to display
    /// coordinates by `scale`.
    pub fn composite_into(&self, target: &mut RgbaImage, scale: (f32, f32)) {
        let p = &self.placement;
        let width = (p.width * scale.0).round().max(1.0) as u32;
        let height = (p.height * scale.1).round().max(1.0) as u32;
        let x = (p.x * scale.0).round() as i64;
        let y = (p.y * scale.1).round() as i64;
        if (width, height) == self.image.dimensions() {
            imageops::overlay(target, &self.image, x, y);
        } else {
            let resized = imageops::resize(&self.image, width, height, FilterType::Lanczos3);
            imageops::overlay(target, &resized, x, y);
        }
    }
}

/// The editor's append-only history.
pub trait EditHistory: Send + Sync {
    fn push(&self, layer: VisualLayer);
}

#[derive(Debug, Default)]
pub struct MemoryHistory {
    layers: Mutex<Vec<VisualLayer>>,
}

impl MemoryHistory {
    pub fn layers(&self) -> Vec<VisualLayer> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<VisualLayer>> {
        self.layers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EditHistory for MemoryHistory {
    fn push(&self, layer: VisualLayer) {
        self.lock().push(layer);
    }
}

impl<H: EditHistory + ?Sized> EditHistory for Arc<H> {
    fn push(&self, layer: VisualLayer) {
        (**self).push(layer);
    }
}

/// Drives one translate action from capture region to committed layer.
pub struct Compositor<E: OcrEngine, P: TranslationProvider, H: EditHistory> {
    ocr: Arc<OcrService<E>>,
    translator: P,
    history: H,
    painter: Arc<TextPainter>,
    runs: RunTracker,
}

impl<E, P, H> Compositor<E, P, H>
where
    E: OcrEngine,
    P: TranslationProvider,
    H: EditHistory,
{
    pub fn new(ocr: Arc<OcrService<E>>, translator: P, history: H, painter: TextPainter) -> Self {
        Self {
            ocr,
            translator,
            history,
            painter: Arc::new(painter),
            runs: RunTracker::default(),
        }
    }

    pub fn translator(&self) -> &P {
        &self.translator
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    /// Abandons any in-flight run; it finishes as `Superseded`.
    pub fn cancel(&self) {
        self.runs.supersede();
    }

    pub async fn translate_region(
        &self,
        source: &RgbaImage,
        region: &Region,
        language: Option<&LanguageItem>,
    ) -> Result<RunOutcome, PipelineError> {
        let run_id = self.runs.begin();
        let result = self.run(run_id, source, region, language).await;
        match &result {
            Ok(RunOutcome::Committed { lines, .. }) => {
                info!(run_id, lines = lines.len(), "translation layer committed");
            }
            Ok(RunOutcome::NothingRecognized) => info!(run_id, "no text recognized"),
            Ok(RunOutcome::Superseded) => debug!(run_id, "run superseded"),
            Err(err) => warn!(run_id, stage = %err.stage, "{}", err),
        }
        result
    }

    async fn run(
        &self,
        run_id: u64,
        source: &RgbaImage,
        region: &Region,
        language: Option<&LanguageItem>,
    ) -> Result<RunOutcome, PipelineError> {
        use PipelineStage::*;

        let language =
            language.ok_or_else(|| PipelineError::new(Idle, PipelineErrorKind::NoLanguageSelected))?;

        debug!(run_id, stage = %ExtractingRegion, "stage entered");
        let (source, device_region) = (source.clone(), *region);
        let (surface, png) = offload(move || {
            let surface = extract_region(&source, &device_region)?;
            let png = encode_png(&surface)?;
            Ok((surface, png))
        })
        .await
        .map_err(|err| PipelineError::new(ExtractingRegion, PipelineErrorKind::Extraction(err)))?;
        if !self.runs.is_current(run_id) {
            return Ok(RunOutcome::Superseded);
        }

        debug!(run_id, stage = %Recognizing, bytes = png.len(), "stage entered");
        let recognition = self
            .ocr
            .recognize(&png)
            .await
            .map_err(|err| PipelineError::new(Recognizing, err))?;
        if !self.runs.is_current(run_id) {
            return Ok(RunOutcome::Superseded);
        }
        let lines = group_words_into_lines(&recognition.words);
        if lines.is_empty() {
            return Ok(RunOutcome::NothingRecognized);
        }
        let original = lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        debug!(
            run_id,
            stage = %Translating,
            lines = lines.len(),
            target = language.target_code(),
            "stage entered"
        );
        let request = TranslateRequest {
            text: original.clone(),
            target_language_code: language.target_code().to_string(),
            channel: language.channel.clone(),
        };
        let response = self
            .translator
            .translate(request)
            .await
            .map_err(|err| {
                PipelineError::new(Translating, PipelineErrorKind::Translation(format!("{:#}", err)))
            })?;
        if !self.runs.is_current(run_id) {
            return Ok(RunOutcome::Superseded);
        }
        let translated = match response.text {
            Some(text) if response.success && !text.trim().is_empty() => text,
            _ => {
                let reason = response
                    .error
                    .unwrap_or_else(|| "translator returned no text".to_string());
                return Err(PipelineError::new(
                    Translating,
                    PipelineErrorKind::Translation(reason),
                ));
            }
        };

        debug!(run_id, stage = %Distributing, "stage entered");
        let parts = distribute_translation(&translated, &lines);

        debug!(run_id, stage = %Rendering, "stage entered");
        let painter = self.painter.clone();
        let boxes: Vec<BBox> = lines.iter().map(|line| line.bbox).collect();
        let (image, rendered) = offload(move || {
            let mut pixmap = pixmap_from_rgba(&surface)?;
            let mut rendered = Vec::with_capacity(boxes.len());
            for (bbox, text) in boxes.iter().zip(&parts) {
                if let Some(done) = painter.render_line(&mut pixmap, bbox, text)? {
                    rendered.push(done);
                }
            }
            Ok((rgba_from_pixmap(&pixmap)?, rendered))
        })
        .await
        .map_err(|err| PipelineError::new(Rendering, PipelineErrorKind::Rendering(err)))?;

        if !self.runs.is_current(run_id) {
            return Ok(RunOutcome::Superseded);
        }
        self.history
            .push(VisualLayer::new(image, region.placement));
        debug!(run_id, stage = %Done, "stage entered");
        Ok(RunOutcome::Committed {
            run_id,
            translation: TranslationResult {
                original_full_text: original,
                translated_full_text: translated,
            },
            lines: rendered,
        })
    }
}

/// Runs CPU-heavy raster work on the blocking pool.
async fn offload<T, F>(work: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("raster task failed")?
}

pub(crate) fn encode_png(image: &RgbaImage) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .with_context(|| "failed to encode PNG")?;
    Ok(bytes)
}
