//! Markdown and prose scanning shared by the built-in checkers

use std::ops::Range;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// ATX heading: `## Title`
    static ref HEADING_PATTERN: Regex =
        Regex::new(r"^(#{1,6})[ \t]+(.+?)[ \t]*#*[ \t]*$").unwrap();

    /// Checklist marker: `- [ ] item` / `* [x] item`
    static ref CHECKBOX_PATTERN: Regex =
        Regex::new(r"^[ \t]*(?:[-*+]|\d+[.)])[ \t]+\[([ xX])\][ \t]+(.+?)[ \t]*$").unwrap();

    /// List item start
    static ref LIST_ITEM_PATTERN: Regex =
        Regex::new(r"^[ \t]*(?:[-*+]|\d+[.)])[ \t]+").unwrap();

    /// Sentence terminator followed by whitespace or end of block
    static ref SENTENCE_END_PATTERN: Regex =
        Regex::new(r#"[.!?]+["')\]]*(?:\s+|$)"#).unwrap();
}

/// A markdown heading outside fenced code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: u8,
    pub title: String,
    pub start: usize,
    pub end: usize,
}

/// A checklist marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistItem {
    pub checked: bool,
    pub label: String,
    pub start: usize,
    pub end: usize,
}

/// A sentence in prose, with its word count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentence {
    pub start: usize,
    pub end: usize,
    pub words: usize,
}

/// A line with its byte range (without the trailing newline) and fence state
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    text: &'a str,
    start: usize,
    in_fence: bool,
}

fn lines(text: &str) -> Vec<Line<'_>> {
    let mut out = Vec::new();
    let mut offset = 0;
    let mut in_fence = false;

    for raw in text.split_inclusive('\n') {
        let line = raw.trim_end_matches(['\n', '\r']);
        let trimmed = line.trim_start();
        let is_fence = trimmed.starts_with("```") || trimmed.starts_with("~~~");
        out.push(Line {
            text: line,
            start: offset,
            in_fence: in_fence || is_fence,
        });
        if is_fence {
            in_fence = !in_fence;
        }
        offset += raw.len();
    }

    out
}

/// Byte ranges covered by fenced code blocks, fences included
pub fn fenced_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for line in lines(text).into_iter().filter(|l| l.in_fence) {
        let end = line.start + line.text.len();
        match ranges.last_mut() {
            Some(last) if last.end + 1 >= line.start => last.end = end,
            _ => ranges.push(line.start..end),
        }
    }
    ranges
}

pub fn in_ranges(ranges: &[Range<usize>], offset: usize) -> bool {
    ranges.iter().any(|r| r.contains(&offset))
}

/// All headings outside fenced code, in document order
pub fn headings(text: &str) -> Vec<Heading> {
    lines(text)
        .into_iter()
        .filter(|l| !l.in_fence)
        .filter_map(|l| {
            let caps = HEADING_PATTERN.captures(l.text)?;
            Some(Heading {
                level: caps.get(1)?.as_str().len() as u8,
                title: caps.get(2)?.as_str().trim().to_string(),
                start: l.start,
                end: l.start + l.text.len(),
            })
        })
        .collect()
}

/// All checklist markers outside fenced code, in document order
pub fn checklist_items(text: &str) -> Vec<ChecklistItem> {
    lines(text)
        .into_iter()
        .filter(|l| !l.in_fence)
        .filter_map(|l| {
            let caps = CHECKBOX_PATTERN.captures(l.text)?;
            Some(ChecklistItem {
                checked: !caps.get(1)?.as_str().trim().is_empty(),
                label: caps.get(2)?.as_str().to_string(),
                start: l.start,
                end: l.start + l.text.len(),
            })
        })
        .collect()
}

/// Byte range of the body under the first heading titled `title` (case-insensitive),
/// ending at the next heading of the same or higher level
pub fn section_range(text: &str, title: &str) -> Option<Range<usize>> {
    let all = headings(text);
    let idx = all
        .iter()
        .position(|h| h.title.eq_ignore_ascii_case(title.trim()))?;
    let heading = &all[idx];
    let end = all[idx + 1..]
        .iter()
        .find(|h| h.level <= heading.level)
        .map(|h| h.start)
        .unwrap_or(text.len());
    Some(heading.end..end)
}

/// Paragraph-like prose blocks: consecutive non-blank lines outside code fences,
/// headings and tables. Each list item starts a new block.
pub fn prose_blocks(text: &str) -> Vec<Range<usize>> {
    let mut blocks = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for line in lines(text) {
        let trimmed = line.text.trim();
        let is_break = line.in_fence
            || trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with('|')
            || trimmed.starts_with('>') && trimmed.len() == 1;

        if is_break {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            continue;
        }

        let end = line.start + line.text.len();
        if LIST_ITEM_PATTERN.is_match(line.text) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(line.start..end);
            continue;
        }

        current = match current {
            Some(block) => Some(block.start..end),
            None => Some(line.start..end),
        };
    }

    if let Some(block) = current {
        blocks.push(block);
    }
    blocks
}

/// Count tokens containing at least one alphanumeric character
pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

/// Split prose into sentences. Sentences never span blocks.
pub fn sentences(text: &str) -> Vec<Sentence> {
    let mut out = Vec::new();

    for block in prose_blocks(text) {
        let slice = &text[block.clone()];
        let mut last = 0;
        for m in SENTENCE_END_PATTERN.find_iter(slice) {
            push_sentence(&mut out, slice, block.start, last, m.end());
            last = m.end();
        }
        if last < slice.len() {
            push_sentence(&mut out, slice, block.start, last, slice.len());
        }
    }

    out
}

fn push_sentence(out: &mut Vec<Sentence>, slice: &str, base: usize, start: usize, end: usize) {
    let words = word_count(&slice[start..end]);
    if words > 0 {
        out.push(Sentence {
            start: base + start,
            end: base + end,
            words,
        });
    }
}

/// GitHub-style anchor slug for a heading title
pub fn slugify(title: &str) -> String {
    title
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .map(|c| if c == ' ' { '-' } else { c })
        .collect()
}

/// Extract a snippet around a byte range (up to 50 characters of context each side)
pub fn extract_snippet(text: &str, start: usize, end: usize) -> String {
    let from = floor_char_boundary(text, start.saturating_sub(50));
    let to = floor_char_boundary(text, (end + 50).min(text.len()));
    format!("...{}...", text[from..to].trim())
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
