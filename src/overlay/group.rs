use std::cmp::Ordering;

use super::Line;
use crate::ocr::Word;

/// Fraction of the previous word's height that two vertical centers may differ
/// by and still sit on the same printed line.
pub const LINE_CENTER_TOLERANCE: f32 = 0.6;

/// Clusters words into top-to-bottom lines by vertical-center proximity.
pub fn group_words_into_lines(words: &[Word]) -> Vec<Line> {
    let mut sorted: Vec<&Word> = words.iter().filter(|word| word.bbox.is_valid()).collect();
    if sorted.is_empty() {
        return Vec::new();
    }
    sorted.sort_by(|a, b| compare_vertical(a, b));

    let mut lines = Vec::new();
    let mut current: Vec<&Word> = vec![sorted[0]];
    for pair in sorted.windows(2) {
        let (prev, word) = (pair[0], pair[1]);
        let distance = (word.bbox.center_y() - prev.bbox.center_y()).abs();
        if distance > prev.bbox.height() * LINE_CENTER_TOLERANCE {
            lines.push(build_line(std::mem::take(&mut current)));
        }
        current.push(word);
    }
    if !current.is_empty() {
        lines.push(build_line(current));
    }
    lines
}

fn build_line(mut words: Vec<&Word>) -> Line {
    words.sort_by(|a, b| compare_horizontal(a, b));
    let bbox = words
        .iter()
        .skip(1)
        .fold(words[0].bbox, |acc, word| acc.union(&word.bbox));
    let text = words
        .iter()
        .map(|word| word.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    Line {
        words: words.into_iter().cloned().collect(),
        text,
        bbox,
    }
}

// Full tie-breaking keeps the walk independent of the input order.
fn compare_vertical(a: &Word, b: &Word) -> Ordering {
    a.bbox
        .center_y()
        .total_cmp(&b.bbox.center_y())
        .then_with(|| compare_horizontal(a, b))
}

fn compare_horizontal(a: &Word, b: &Word) -> Ordering {
    a.bbox
        .x0
        .total_cmp(&b.bbox.x0)
        .then_with(|| a.bbox.y0.total_cmp(&b.bbox.y0))
        .then_with(|| a.bbox.x1.total_cmp(&b.bbox.x1))
        .then_with(|| a.bbox.y1.total_cmp(&b.bbox.y1))
        .then_with(|| a.text.cmp(&b.text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::BBox;

    fn word(text: &str, x0: f32, y0: f32, x1: f32, y1: f32) -> Word {
        Word::new(text, 90.0, BBox::new(x0, y0, x1, y1))
    }

    fn texts(lines: &[Line]) -> Vec<String> {
        lines.iter().map(|line| line.text.clone()).collect()
    }

    #[test]
    fn hello_world_forms_one_line() {
        let words = vec![
            word("HELLO", 0.0, 0.0, 50.0, 10.0),
            word("WORLD", 55.0, 0.0, 100.0, 10.0),
        ];
        let lines = group_words_into_lines(&words);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "HELLO WORLD");
        assert_eq!(lines[0].bbox, BBox::new(0.0, 0.0, 100.0, 10.0));
    }

    #[test]
    fn distant_centers_split_lines() {
        let words = vec![
            word("below", 0.0, 50.0, 40.0, 60.0),
            word("above", 0.0, 0.0, 40.0, 10.0),
        ];
        let lines = group_words_into_lines(&words);
        assert_eq!(texts(&lines), vec!["above", "below"]);
    }

    #[test]
    fn small_baseline_jitter_stays_on_one_line() {
        let words = vec![
            word("b", 30.0, 3.0, 50.0, 13.0),
            word("a", 0.0, 0.0, 20.0, 10.0),
            word("c", 60.0, 1.0, 80.0, 12.0),
        ];
        let lines = group_words_into_lines(&words);
        assert_eq!(texts(&lines), vec!["a b c"]);
        assert_eq!(lines[0].bbox, BBox::new(0.0, 0.0, 80.0, 13.0));
    }

    #[test]
    fn distance_equal_to_tolerance_stays_joined() {
        // prev height 10, tolerance 6.0: a center gap of exactly 6 does not exceed it
        let words = vec![
            word("top", 0.0, 0.0, 20.0, 10.0),
            word("edge", 30.0, 6.0, 50.0, 16.0),
        ];
        assert_eq!(group_words_into_lines(&words).len(), 1);
    }

    #[test]
    fn empty_input_gives_no_lines() {
        assert!(group_words_into_lines(&[]).is_empty());
    }

    #[test]
    fn invalid_boxes_are_skipped() {
        let words = vec![
            word("ok", 0.0, 0.0, 10.0, 10.0),
            word("flat", 0.0, 5.0, 10.0, 5.0),
        ];
        let lines = group_words_into_lines(&words);
        assert_eq!(texts(&lines), vec!["ok"]);
    }

    #[test]
    fn grouping_ignores_input_order() {
        let words = vec![
            word("Second", 0.0, 30.0, 60.0, 42.0),
            word("line", 65.0, 31.0, 100.0, 43.0),
            word("The", 0.0, 0.0, 30.0, 12.0),
            word("first", 35.0, 1.0, 70.0, 13.0),
            word("row", 75.0, 0.0, 100.0, 12.0),
            word("tail", 0.0, 60.0, 30.0, 70.0),
            word("same", 40.0, 60.0, 60.0, 70.0),
            word("same", 40.0, 61.0, 60.0, 69.0),
        ];
        let expected = group_words_into_lines(&words);
        assert_eq!(
            texts(&expected),
            vec!["The first row", "Second line", "tail same same"]
        );

        let mut shuffled = words.clone();
        for step in 1..words.len() {
            shuffled.rotate_left(step);
            shuffled.swap(0, words.len() - 1);
            assert_eq!(group_words_into_lines(&shuffled), expected);
        }
        shuffled.reverse();
        assert_eq!(group_words_into_lines(&shuffled), expected);
    }

    #[test]
    fn line_boxes_contain_their_words() {
        let words = vec![
            word("a", 0.0, 0.0, 10.0, 10.0),
            word("b", 12.0, 2.0, 30.0, 14.0),
            word("c", 0.0, 40.0, 10.0, 52.0),
        ];
        for line in group_words_into_lines(&words) {
            for member in &line.words {
                assert!(line.bbox.contains(&member.bbox));
            }
        }
    }
}
