//! Translated-text overlay: line grouping, translation distribution, and
//! per-line rendering onto a raster surface.

mod compositor;
mod distribute;
mod font;
mod group;
mod render;

use serde::Serialize;

use crate::ocr::{BBox, Word};

pub use compositor::{
    Compositor, EditHistory, MemoryHistory, PipelineError, PipelineErrorKind, PipelineStage,
    Placement, Region, RunOutcome, RunTracker, VisualLayer, extract_region, LAYER_NAME,
};
pub use distribute::{distribute_by_lengths, distribute_translation, join_tokens, tokenize};
pub use font::{FALLBACK_FONT_FAMILIES, FontMetrics, OverlayFont, measure_text_width_px};
pub use group::{LINE_CENTER_TOLERANCE, group_words_into_lines};
pub use render::{
    DEFAULT_LUMINANCE, MIN_FONT_SIZE_PX, TextPainter, background_luminance, choose_contrast,
    fit_font_size, paint_line, plan_line, sample_luminance,
};

/// Words sharing one printed line, left to right.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Line {
    pub words: Vec<Word>,
    pub text: String,
    pub bbox: BBox,
}

/// One request/response pair covering the whole recognized block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub original_full_text: String,
    pub translated_full_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContrastPair {
    pub text: Rgb,
    pub background: Rgb,
}

/// Final draw instruction for one line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedLine {
    pub bbox: BBox,
    pub translated_text: String,
    pub font_size_px: f32,
    pub text_color: Rgb,
    pub background_color: Rgb,
}
