use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use ttf_parser::{Face, name_id};
use usvg::fontdb;

/// Families tried, in order, when no overlay font is configured.
#[cfg(target_os = "windows")]
pub const FALLBACK_FONT_FAMILIES: &[&str] = &["Noto Sans", "Microsoft YaHei", "sans-serif"];
#[cfg(target_os = "macos")]
pub const FALLBACK_FONT_FAMILIES: &[&str] = &["Noto Sans", "Hiragino Sans", "sans-serif"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const FALLBACK_FONT_FAMILIES: &[&str] = &["Noto Sans CJK SC", "Noto Sans", "sans-serif"];

// Baseline offset below the vertical center when no font metrics exist.
const ESTIMATED_BASELINE_RATIO: f32 = 0.35;

#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    face_index: u32,
    units_per_em: u16,
    space_advance: u16,
    ascender: i16,
    descender: i16,
    family: Option<String>,
}

impl std::fmt::Debug for FontMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontMetrics")
            .field("family", &self.family)
            .field("face_index", &self.face_index)
            .field("units_per_em", &self.units_per_em)
            .finish()
    }
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read font: {}", path.display()))?;
        Self::from_data(&data, None)
            .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err))
    }

    /// Parses the first face of `data` (or the face named `preferred_family`
    /// inside a collection).
    pub fn from_data(data: &[u8], preferred_family: Option<&str>) -> Result<Self> {
        let shared = Arc::new(data.to_vec());
        let mut first = None;
        let count = ttf_parser::fonts_in_collection(data).unwrap_or(1);
        for index in 0..count {
            let Some(metrics) = Self::parse_face(&shared, index) else {
                continue;
            };
            if let (Some(preferred), Some(found)) = (preferred_family, metrics.family()) {
                if found.eq_ignore_ascii_case(preferred) {
                    return Ok(metrics);
                }
            }
            if first.is_none() {
                first = Some(metrics);
            }
        }
        first.ok_or_else(|| anyhow!("failed to parse font data"))
    }

    fn from_face(data: &[u8], index: u32) -> Result<Self> {
        Self::parse_face(&Arc::new(data.to_vec()), index)
            .ok_or_else(|| anyhow!("failed to parse font face {}", index))
    }

    fn parse_face(data: &Arc<Vec<u8>>, index: u32) -> Option<Self> {
        let face = Face::parse(data, index).ok()?;
        let units_per_em = face.units_per_em().max(1);
        Some(FontMetrics {
            data: data.clone(),
            face_index: index,
            units_per_em,
            space_advance: face
                .glyph_index(' ')
                .and_then(|id| face.glyph_hor_advance(id))
                .unwrap_or(units_per_em / 2),
            ascender: face.ascender(),
            descender: face.descender(),
            family: family_name(&face),
        })
    }

    fn scale(&self, font_size: f32) -> f32 {
        font_size / self.units_per_em as f32
    }

    fn advance_units(&self, text: &str) -> Option<u32> {
        let face = Face::parse(&self.data, self.face_index).ok()?;
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == '\n' {
                continue;
            }
            let glyph_advance = face
                .glyph_index(ch)
                .and_then(|glyph| face.glyph_hor_advance(glyph))
                .unwrap_or(self.space_advance);
            advance = advance.saturating_add(glyph_advance as u32);
        }
        Some(advance)
    }
}

/// The font used for overlay text: parsed metrics when available, and the
/// family name handed to the rasterizer.
#[derive(Debug, Clone)]
pub struct OverlayFont {
    pub metrics: Option<FontMetrics>,
    pub family: String,
}

impl Default for OverlayFont {
    fn default() -> Self {
        Self {
            metrics: None,
            family: "sans-serif".to_string(),
        }
    }
}

impl OverlayFont {
    /// Resolves the configured font path or family; without either, tries the
    /// fallback families and ends with per-character width estimates.
    pub fn resolve(
        db: &fontdb::Database,
        font_path: Option<&Path>,
        font_family: Option<&str>,
    ) -> Result<Self> {
        if let Some(path) = font_path {
            let metrics = FontMetrics::from_path(path)?;
            let family = metrics
                .family()
                .map(str::to_string)
                .or_else(|| font_family.map(str::to_string))
                .unwrap_or_else(|| "sans-serif".to_string());
            return Ok(Self {
                metrics: Some(metrics),
                family,
            });
        }
        if let Some(family) = font_family {
            return from_family(db, family);
        }
        for candidate in FALLBACK_FONT_FAMILIES {
            if let Ok(font) = from_family(db, candidate) {
                return Ok(font);
            }
        }
        tracing::warn!("no overlay font found, estimating text widths");
        Ok(Self::default())
    }

    pub fn measure(&self, text: &str, font_size: f32) -> f32 {
        measure_text_width_px(text, font_size, self.metrics.as_ref())
    }

    /// Baseline y that vertically centers a line of `font_size` text on `center_y`.
    pub fn centered_baseline(&self, center_y: f32, font_size: f32) -> f32 {
        match &self.metrics {
            Some(metrics) if metrics.ascender > metrics.descender => {
                let mid = (metrics.ascender as f32 + metrics.descender as f32) / 2.0;
                center_y + mid * metrics.scale(font_size)
            }
            _ => center_y + font_size * ESTIMATED_BASELINE_RATIO,
        }
    }
}

pub fn measure_text_width_px(text: &str, font_size: f32, font: Option<&FontMetrics>) -> f32 {
    if let Some(font) = font {
        if let Some(units) = font.advance_units(text) {
            return units as f32 * font.scale(font_size);
        }
    }
    text.chars().map(estimate_char_units).sum::<f32>() * font_size
}

fn estimate_char_units(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if matches!(
        ch as u32,
        0x4E00..=0x9FFF | 0x3040..=0x30FF | 0x31F0..=0x31FF | 0xAC00..=0xD7AF | 0xFF00..=0xFFEF
    ) {
        1.0
    } else {
        0.9
    }
}

fn from_family(db: &fontdb::Database, family: &str) -> Result<OverlayFont> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db
        .query(&query)
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let (data, index) = db
        .with_face_data(id, |data, index| (data.to_vec(), index))
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    let metrics = FontMetrics::from_data(&data, Some(family))
        .or_else(|_| FontMetrics::from_face(&data, index))?;
    let resolved = metrics
        .family()
        .map(str::to_string)
        .unwrap_or_else(|| family.to_string());
    Ok(OverlayFont {
        metrics: Some(metrics),
        family: resolved,
    })
}

fn family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
