//! Entity text rendering
//!
//! Converts a platform text payload plus its annotated [`EntitySpan`]s into
//! HTML and Markdown. Spans are resolved to byte ranges using the platform's
//! offset unit, validated, and spliced in order; plain text between spans is
//! copied through.
//!
//! Malformed spans are skipped, never clamped: a span is dropped when it is
//! empty or inverted, falls outside the text, does not land on a character
//! boundary, or overlaps a span that starts earlier.

use crate::types::{EntityKind, EntitySpan, LinkTextMode, NewlineMode, RenderOptions, RenderedText};
use std::ops::Range;
use url::Url;

/// Unit in which a platform reports entity offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnit {
    /// UTF-8 byte offsets (Bluesky facets)
    Utf8Bytes,
    /// Unicode scalar values (X API v2 entities)
    CodePoints,
    /// UTF-16 code units
    Utf16,
}

/// Per-platform rendering rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub name: &'static str,
    pub offset_unit: OffsetUnit,
    /// Prefix for mention links; the mention target is appended
    pub profile_base: &'static str,
    /// Prefix for hashtag links; the tag is appended
    pub hashtag_base: &'static str,
    /// Prefix for cashtag links; the symbol is appended
    pub cashtag_base: &'static str,
    /// Anchors open in a new tab and carry an `aria-label`
    pub external_anchors: bool,
}

pub const BLUESKY: Platform = Platform {
    name: "bluesky",
    offset_unit: OffsetUnit::Utf8Bytes,
    profile_base: "https://bsky.app/profile/",
    hashtag_base: "https://bsky.app/hashtag/",
    cashtag_base: "https://bsky.app/search?q=%24",
    external_anchors: false,
};

pub const X: Platform = Platform {
    name: "x",
    offset_unit: OffsetUnit::CodePoints,
    profile_base: "https://x.com/",
    hashtag_base: "https://x.com/hashtag/",
    cashtag_base: "https://x.com/search?q=%24",
    external_anchors: true,
};

/// Render text with entities into HTML and Markdown
///
/// The result's `view_type` is always `None`; classification is the job of
/// the [trailing-link stripper](crate::trailing).
pub fn render_text(
    text: &str,
    spans: &[EntitySpan],
    platform: &Platform,
    options: &RenderOptions,
) -> RenderedText {
    let mut html = String::with_capacity(text.len() * 2);
    let mut markdown = String::with_capacity(text.len() * 2);
    let mut cursor = 0;

    for (range, span) in resolve_spans(text, spans, platform.offset_unit) {
        let before = &text[cursor..range.start];
        html.push_str(&escape_html(before));
        markdown.push_str(before);

        let covered = &text[range.clone()];
        let (url, label_html, label_md, aria) = anchor_parts(&span.kind, covered, platform, options);
        let href = escape_html(&url);

        if platform.external_anchors {
            html.push_str(&format!(
                "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\" aria-label=\"{} {}\">{}</a>",
                href, aria, label_html, label_html
            ));
        } else {
            html.push_str(&format!("<a href=\"{}\">{}</a>", href, label_html));
        }
        markdown.push_str(&format!(
            "[{}]({})",
            escape_markdown_label(&label_md),
            markdown_destination(&url)
        ));

        cursor = range.end;
    }

    let rest = &text[cursor..];
    html.push_str(&escape_html(rest));
    markdown.push_str(rest);

    RenderedText {
        html: apply_newlines(&html, options.newline_mode),
        markdown,
        ..Default::default()
    }
}

/// Link target, HTML label, Markdown label and aria prefix for a span
fn anchor_parts(
    kind: &EntityKind,
    covered: &str,
    platform: &Platform,
    options: &RenderOptions,
) -> (String, String, String, &'static str) {
    match kind {
        EntityKind::Mention { target } => (
            format!("{}{}", platform.profile_base, target),
            escape_html(covered),
            covered.to_string(),
            "Mention",
        ),
        EntityKind::Hashtag { tag } => (
            format!("{}{}", platform.hashtag_base, urlencoding::encode(tag)),
            escape_html(covered),
            covered.to_string(),
            "Hashtag",
        ),
        EntityKind::Cashtag { tag } => (
            format!("{}{}", platform.cashtag_base, urlencoding::encode(tag)),
            escape_html(covered),
            covered.to_string(),
            "Cashtag",
        ),
        EntityKind::Link { url, display, .. } => {
            let (label_html, label_md) = match (options.link_text_mode, display) {
                (LinkTextMode::DomainPath, _) => {
                    let label = domain_and_path(url);
                    (escape_html(&label), label)
                }
                (LinkTextMode::DisplayText, Some(display)) => {
                    (escape_html(display), display.clone())
                }
                (LinkTextMode::DisplayText, None) => {
                    (escape_html(covered), covered.to_string())
                }
            };
            (url.clone(), label_html, label_md, "Link to")
        }
    }
}

/// Resolve spans to validated, ordered, non-overlapping byte ranges
pub fn resolve_spans<'a>(
    text: &str,
    spans: &'a [EntitySpan],
    unit: OffsetUnit,
) -> Vec<(Range<usize>, &'a EntitySpan)> {
    let mut resolved: Vec<(Range<usize>, &EntitySpan)> = spans
        .iter()
        .filter(|span| span.start < span.end)
        .filter_map(|span| {
            let start = byte_offset(text, unit, span.start)?;
            let end = byte_offset(text, unit, span.end)?;
            Some((start..end, span))
        })
        .collect();

    resolved.sort_by_key(|(range, _)| range.start);

    let mut accepted: Vec<(Range<usize>, &EntitySpan)> = Vec::with_capacity(resolved.len());
    for (range, span) in resolved {
        if let Some((prev, _)) = accepted.last() {
            if range.start < prev.end {
                tracing::debug!(start = span.start, end = span.end, "skipping overlapping entity span");
                continue;
            }
        }
        accepted.push((range, span));
    }
    accepted
}

/// Convert an offset in `unit` to a byte offset into `text`
///
/// Returns `None` when the offset is past the end of the text or falls
/// inside a character.
pub fn byte_offset(text: &str, unit: OffsetUnit, offset: usize) -> Option<usize> {
    match unit {
        OffsetUnit::Utf8Bytes => {
            if offset <= text.len() && text.is_char_boundary(offset) {
                Some(offset)
            } else {
                None
            }
        }
        OffsetUnit::CodePoints => {
            if offset == 0 {
                return Some(0);
            }
            text.char_indices()
                .map(|(idx, _)| idx)
                .chain(std::iter::once(text.len()))
                .nth(offset)
        }
        OffsetUnit::Utf16 => {
            let mut units = 0;
            for (idx, ch) in text.char_indices() {
                if units == offset {
                    return Some(idx);
                }
                if units > offset {
                    return None;
                }
                units += ch.len_utf16();
            }
            (units == offset).then_some(text.len())
        }
    }
}

/// Apply the newline policy to rendered HTML
pub fn apply_newlines(html: &str, mode: NewlineMode) -> String {
    match mode {
        NewlineMode::None => html.to_string(),
        NewlineMode::Break => {
            let mut out = String::with_capacity(html.len() + 8);
            let mut in_run = false;
            for ch in html.chars() {
                if ch == '\n' {
                    if !in_run {
                        out.push_str("<br/>\n");
                        in_run = true;
                    }
                } else {
                    in_run = false;
                    out.push(ch);
                }
            }
            out
        }
        NewlineMode::Paragraph => html
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| format!("<p>{}</p>", line))
            .collect(),
    }
}

/// Escape `&`, `<`, `>`, `"` and `'` for embedding in HTML
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Backslash-escape characters that would end or nest a Markdown link label
pub fn escape_markdown_label(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '\\' | '[' | ']' | '(' | ')') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn markdown_destination(url: &str) -> String {
    url.replace(' ', "%20")
        .replace('(', "%28")
        .replace(')', "%29")
}

/// Host and path of a URL, e.g. `example.com/blog/post`
///
/// Unparseable input is returned unchanged.
pub fn domain_and_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path()),
        Err(_) => url.to_string(),
    }
}
