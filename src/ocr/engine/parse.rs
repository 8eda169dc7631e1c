use crate::ocr::{BBox, RawRecognition, RawWord};

const WORD_LEVEL: i32 = 5;

/// Parses tesseract's TSV output into word boxes plus the page text, rebuilt
/// one OCR line per text line.
pub(super) fn parse_tsv(tsv: &str) -> RawRecognition {
    let mut words = Vec::new();
    let mut lines: Vec<((i32, i32, i32, i32), Vec<String>)> = Vec::new();

    for (idx, row) in tsv.lines().enumerate() {
        if idx == 0 {
            continue;
        }
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        if level != WORD_LEVEL {
            continue;
        }
        let text = cols[11].trim();
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }
        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        let left: f32 = cols[6].parse().unwrap_or(0.0);
        let top: f32 = cols[7].parse().unwrap_or(0.0);
        let width: f32 = cols[8].parse().unwrap_or(0.0);
        let height: f32 = cols[9].parse().unwrap_or(0.0);
        let bbox = if width > 0.0 && height > 0.0 {
            Some(BBox::new(left, top, left + width, top + height))
        } else {
            None
        };

        match lines.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, texts)) => texts.push(text.to_string()),
            None => lines.push((key, vec![text.to_string()])),
        }
        words.push(RawWord {
            text: text.to_string(),
            confidence: conf.clamp(0.0, 100.0),
            bbox,
        });
    }

    let text = lines
        .into_iter()
        .map(|(_, texts)| texts.join(" "))
        .collect::<Vec<_>>()
        .join("\n");
    RawRecognition { text, words }
}
