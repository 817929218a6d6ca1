use crate::font::FontRegistry;
use crate::print::FontDescriptor;
use crate::types::Pt;

/// Greedy word wrap. Hard breaks on `\n`; a word wider than `width` is broken
/// between characters. Always returns at least one line for non-empty text.
pub fn wrap_lines(fonts: &FontRegistry, font: &FontDescriptor, text: &str, width: Pt) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let paragraph = paragraph.trim_end_matches('\r');
        if paragraph.trim().is_empty() {
            lines.push(String::new());
            continue;
        }
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if fonts.measure_text_width(font, &candidate) <= width {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if fonts.measure_text_width(font, word) <= width {
                current = word.to_string();
            } else {
                let mut pieces = break_word(fonts, font, word, width);
                current = pieces.pop().unwrap_or_default();
                lines.extend(pieces);
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    // trailing hard breaks produce no visible line
    while lines.len() > 1 && lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines
}

fn break_word(fonts: &FontRegistry, font: &FontDescriptor, word: &str, width: Pt) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for ch in word.chars() {
        current.push(ch);
        if current.chars().count() > 1 && fonts.measure_text_width(font, &current) > width {
            current.pop();
            pieces.push(std::mem::take(&mut current));
            current.push(ch);
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Height of `lines` lines with the given spacing factor.
pub fn lines_height(line_height: Pt, line_spacing: f32, lines: usize) -> Pt {
    if lines == 0 {
        return Pt::ZERO;
    }
    let step = if (line_spacing - 1.0).abs() < f32::EPSILON {
        line_height
    } else {
        line_height * line_spacing
    };
    step * (lines as i32)
}

/// How many whole lines fit into `height`.
pub fn lines_fitting(line_height: Pt, line_spacing: f32, height: Pt) -> usize {
    let step = lines_height(line_height, line_spacing, 1);
    height.whole_multiples(step)
}
