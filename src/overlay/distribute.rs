use super::Line;

/// Splits `translated` across `lines`, giving each line a share of tokens
/// proportional to its share of the original characters. Tokens are never
/// split and never dropped: the last line absorbs whatever remains.
pub fn distribute_translation(translated: &str, lines: &[Line]) -> Vec<String> {
    let lengths: Vec<usize> = lines.iter().map(|line| line.text.chars().count()).collect();
    distribute_by_lengths(translated, &lengths)
}

/// Same as [`distribute_translation`], driven by raw per-line character counts.
pub fn distribute_by_lengths(translated: &str, lengths: &[usize]) -> Vec<String> {
    match lengths.len() {
        0 => return Vec::new(),
        1 => return vec![translated.trim().to_string()],
        _ => {}
    }

    let total_chars: usize = lengths.iter().sum();
    let tokens = tokenize(translated);
    if tokens.is_empty() {
        return vec![String::new(); lengths.len()];
    }

    let total_tokens = tokens.len();
    let last = lengths.len() - 1;
    let mut cursor = 0;
    let mut out = Vec::with_capacity(lengths.len());
    for (idx, len) in lengths.iter().enumerate() {
        if idx == last {
            out.push(join_tokens(&tokens[cursor..]));
            break;
        }
        let ratio = if total_chars == 0 {
            0.0
        } else {
            *len as f64 / total_chars as f64
        };
        let remaining = total_tokens - cursor;
        let mut count = (total_tokens as f64 * ratio).round() as usize;
        if count == 0 && remaining > 0 {
            count = 1;
        }
        let count = count.min(remaining);
        out.push(join_tokens(&tokens[cursor..cursor + count]));
        cursor += count;
    }
    out
}

/// Script-aware tokens: ASCII alphanumeric runs, or any other single
/// non-whitespace character.
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut run_start: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_ascii_alphanumeric() {
            run_start.get_or_insert(idx);
            continue;
        }
        if let Some(start) = run_start.take() {
            tokens.push(&text[start..idx]);
        }
        if !ch.is_whitespace() {
            tokens.push(&text[idx..idx + ch.len_utf8()]);
        }
    }
    if let Some(start) = run_start {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Joins tokens, spacing only between two ASCII alphanumeric edges.
pub fn join_tokens(tokens: &[&str]) -> String {
    let mut out = String::new();
    for token in tokens {
        let needs_space = matches!(
            (out.chars().last(), token.chars().next()),
            (Some(prev), Some(next)) if prev.is_ascii_alphanumeric() && next.is_ascii_alphanumeric()
        );
        if needs_space {
            out.push(' ');
        }
        out.push_str(token);
    }
    out
}
