use anyhow::{Context, Result, anyhow};
use image::RgbaImage;
use resvg::render;
use std::path::Path;
use std::sync::Arc;
use tiny_skia::{ColorU8, IntSize, Paint, Pixmap, Rect, Transform};
use tracing::debug;
use usvg::{Options, Tree, fontdb};

use super::font::OverlayFont;
use super::{ContrastPair, RenderedLine, Rgb};
use crate::ocr::BBox;

/// Assumed background luminance when the surface cannot be sampled.
pub const DEFAULT_LUMINANCE: f32 = 128.0;
pub const MIN_FONT_SIZE_PX: f32 = 8.0;
const FONT_HEIGHT_RATIO: f32 = 0.85;
const MAX_SAMPLE_HALF_SIDE: i64 = 10;

/// Rasterizes overlay text with one font database shared by every line.
pub struct TextPainter {
    fontdb: Arc<fontdb::Database>,
    font: OverlayFont,
}

impl TextPainter {
    /// Loads system fonts plus `font_path`, and resolves the overlay font.
    pub fn new(font_path: Option<&Path>, font_family: Option<&str>) -> Result<Self> {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        if let Some(path) = font_path {
            db.load_font_file(path)
                .with_context(|| format!("failed to load font: {}", path.display()))?;
        }
        let font = OverlayFont::resolve(&db, font_path, font_family)?;
        debug!(family = %font.family, measured = font.metrics.is_some(), "overlay font ready");
        Ok(Self::with_database(db, font))
    }

    pub fn with_database(db: fontdb::Database, font: OverlayFont) -> Self {
        Self {
            fontdb: Arc::new(db),
            font,
        }
    }

    /// Samples, fills and draws one line. Blank text leaves the surface untouched.
    pub fn render_line(
        &self,
        surface: &mut Pixmap,
        bbox: &BBox,
        text: &str,
    ) -> Result<Option<RenderedLine>> {
        let Some(line) = plan_line(surface, bbox, text, &self.font) else {
            return Ok(None);
        };
        paint_line(surface, &line, self)?;
        Ok(Some(line))
    }

    fn draw_text(&self, surface: &mut Pixmap, line: &RenderedLine) -> Result<()> {
        let baseline = self
            .font
            .centered_baseline(line.bbox.center_y(), line.font_size_px);
        let svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><text x="{x}" y="{y}" font-size="{size}" fill="{fill}" font-family="{family}" xml:space="preserve">{text}</text></svg>"#,
            w = surface.width(),
            h = surface.height(),
            x = line.bbox.x0,
            y = baseline,
            size = line.font_size_px,
            fill = line.text_color.to_hex(),
            family = escape_xml(&self.font.family),
            text = escape_xml(&line.translated_text),
        );
        let options = Options {
            fontdb: self.fontdb.clone(),
            ..Options::default()
        };
        let tree = Tree::from_str(&svg, &options).with_context(|| "failed to parse line SVG")?;
        render(&tree, Transform::identity(), &mut surface.as_mut());
        Ok(())
    }
}

/// Computes the draw instruction for one line, or `None` for blank text.
pub fn plan_line(
    surface: &Pixmap,
    bbox: &BBox,
    text: &str,
    font: &OverlayFont,
) -> Option<RenderedLine> {
    if text.trim().is_empty() {
        return None;
    }
    let contrast = choose_contrast(background_luminance(surface, bbox));
    Some(RenderedLine {
        bbox: *bbox,
        translated_text: text.to_string(),
        font_size_px: fit_font_size(text, bbox, font),
        text_color: contrast.text,
        background_color: contrast.background,
    })
}

/// Replaces the line's rectangle with its background color, then draws its text.
pub fn paint_line(surface: &mut Pixmap, line: &RenderedLine, painter: &TextPainter) -> Result<()> {
    let rect = Rect::from_ltrb(line.bbox.x0, line.bbox.y0, line.bbox.x1, line.bbox.y1)
        .ok_or_else(|| anyhow!("invalid line rectangle"))?;
    let Rgb { r, g, b } = line.background_color;
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, 255);
    paint.anti_alias = false;
    surface.fill_rect(rect, &paint, Transform::identity(), None);
    painter.draw_text(surface, line)
}

/// Average perceptual luminance of a square window centered on the box.
/// `None` when no pixel of the window lies on the surface.
pub fn sample_luminance(surface: &Pixmap, bbox: &BBox) -> Option<f32> {
    let half = MAX_SAMPLE_HALF_SIDE
        .min((bbox.width() / 2.0).floor() as i64)
        .min((bbox.height() / 2.0).floor() as i64);
    if half <= 0 {
        return None;
    }
    let left = (bbox.center_x().floor() as i64 - half).max(0);
    let top = (bbox.center_y().floor() as i64 - half).max(0);

    let mut total = 0.0f64;
    let mut count = 0u32;
    for y in top..top + 2 * half {
        for x in left..left + 2 * half {
            let (Ok(px), Ok(py)) = (u32::try_from(x), u32::try_from(y)) else {
                continue;
            };
            let Some(pixel) = surface.pixel(px, py) else {
                continue;
            };
            let color = pixel.demultiply();
            total += luminance(color) as f64;
            count += 1;
        }
    }
    (count > 0).then(|| (total / count as f64) as f32)
}

pub fn background_luminance(surface: &Pixmap, bbox: &BBox) -> f32 {
    sample_luminance(surface, bbox).unwrap_or_else(|| {
        debug!(?bbox, "background sampling failed, assuming mid-tone");
        DEFAULT_LUMINANCE
    })
}

/// Bright backgrounds get white fill with black text; everything else,
/// including exactly 128, gets black fill with white text.
pub fn choose_contrast(luminance: f32) -> ContrastPair {
    if luminance > DEFAULT_LUMINANCE {
        ContrastPair {
            text: Rgb::BLACK,
            background: Rgb::WHITE,
        }
    } else {
        ContrastPair {
            text: Rgb::WHITE,
            background: Rgb::BLACK,
        }
    }
}

/// Largest size, stepping down 1px from 85% of the box height, whose measured
/// width fits the box. Never below [`MIN_FONT_SIZE_PX`].
pub fn fit_font_size(text: &str, bbox: &BBox, font: &OverlayFont) -> f32 {
    let max_width = bbox.width();
    let mut size = bbox.height() * FONT_HEIGHT_RATIO;
    while size > MIN_FONT_SIZE_PX {
        if font.measure(text, size) <= max_width {
            return size;
        }
        size -= 1.0;
    }
    MIN_FONT_SIZE_PX
}

fn luminance(color: ColorU8) -> f32 {
    0.299 * color.red() as f32 + 0.587 * color.green() as f32 + 0.114 * color.blue() as f32
}

pub(crate) fn pixmap_from_rgba(image: &RgbaImage) -> Result<Pixmap> {
    let size = IntSize::from_wh(image.width(), image.height())
        .ok_or_else(|| anyhow!("empty surface"))?;
    let mut data = Vec::with_capacity(image.as_raw().len());
    for pixel in image.pixels() {
        let [r, g, b, a] = pixel.0;
        let premultiplied = ColorU8::from_rgba(r, g, b, a).premultiply();
        data.extend_from_slice(&[
            premultiplied.red(),
            premultiplied.green(),
            premultiplied.blue(),
            premultiplied.alpha(),
        ]);
    }
    Pixmap::from_vec(data, size).ok_or_else(|| anyhow!("failed to build surface"))
}

pub(crate) fn rgba_from_pixmap(surface: &Pixmap) -> Result<RgbaImage> {
    let mut data = Vec::with_capacity(surface.data().len());
    for pixel in surface.pixels() {
        let color = pixel.demultiply();
        data.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
    RgbaImage::from_raw(surface.width(), surface.height(), data)
        .ok_or_else(|| anyhow!("failed to build image buffer from surface"))
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
