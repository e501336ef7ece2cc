//! Deterministic cleanup of free-text model answers.
//!
//! Used for the text-only prompt modes (`prompt_ocr`, `prompt_grounding_ocr`),
//! where the answer goes straight into `md_content`. Layout answers never pass
//! through here: their cell text is rendered as the model wrote it.
//!
//! Rules run in order: fences come off before line endings are normalised,
//! and blank-line collapsing runs after per-line trimming so whitespace-only
//! lines count as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean a free-text answer.
///
/// 1. strip one outer code fence (any info string);
/// 2. CRLF / CR → LF;
/// 3. trim trailing whitespace per line;
/// 4. collapse runs of blank lines to a single blank line;
/// 5. drop spurious separator rows inside pipe tables;
/// 6. strip zero-width and soft-hyphen characters;
/// 7. trim leading and trailing blank lines.
pub fn clean_text(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_mid_table_separators(&s);
    let s = remove_invisible_chars(&s);
    s.trim_matches('\n').to_string()
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\r?\n(.*?)\r?\n```$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.starts_with('|') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

// Only the second row of a pipe table may be a separator.
fn remove_mid_table_separators(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut row = 0usize;
    for line in input.lines() {
        if is_table_row(line) {
            row += 1;
            if is_separator_row(line) && row != 2 {
                continue;
            }
        } else {
            row = 0;
        }
        out.push(line);
    }
    out.join("\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}
