//! Trailing short-link detection
//!
//! X appends `https://t.co/...` links to a tweet's text for attached media
//! and quoted tweets. These carry no meaning for readers once the
//! attachment is shown separately, so they are stripped and the item is
//! classified as a media card, a link preview, or neither.

use crate::types::{EntityKind, EntitySpan, ViewType};
use regex::Regex;
use std::sync::LazyLock;

static TRAILING_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\s+https?://t\.co/[A-Za-z0-9]+)+$").expect("valid trailing link pattern")
});

static STATUS_PERMALINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://twitter\.com/\w+/status/\d+").expect("valid status permalink pattern")
});

/// Display text and view classification after stripping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stripped {
    pub text: String,
    pub view_type: ViewType,
    pub link_view_url: Option<String>,
}

/// Short URLs forming the trailing run of `text`, in text order
pub fn trailing_links(text: &str) -> Vec<&str> {
    if text.trim_end().is_empty() {
        return Vec::new();
    }
    match TRAILING_RUN.find(text) {
        Some(found) => found.as_str().split_whitespace().collect(),
        None => Vec::new(),
    }
}

/// Classify `text` by its trailing links and optionally strip them
///
/// `has_attachments` is true when the item carries media independently of
/// its link entities.
pub fn strip_trailing_links(
    text: &str,
    spans: &[EntitySpan],
    has_attachments: bool,
    remove: bool,
) -> Stripped {
    let run = trailing_links(text);

    let Some(last) = run.last() else {
        return classify_without_run(text, spans);
    };

    let entity = find_link(spans, last);
    let view_type = if entity.is_some_and(EntityKind::has_media) || has_attachments {
        ViewType::Media
    } else {
        ViewType::Link
    };
    let link_view_url = match view_type {
        ViewType::Link => entity.and_then(expanded_url).map(str::to_string),
        _ => None,
    };

    let mut display = text.to_string();
    if remove {
        display = remove_last(&display, last);

        // a quoted tweet permalink may be preceded by the quoting tweet's own media links
        let quotes_status = entity
            .and_then(expanded_url)
            .is_some_and(|url| STATUS_PERMALINK.is_match(url));
        if quotes_status {
            // removing a media link also drops everything after it
            for short in run.iter().rev().skip(1) {
                if find_link(spans, short).is_some_and(EntityKind::has_media) {
                    display = remove_last(&display, short);
                }
            }
        }
    }

    Stripped {
        text: display,
        view_type,
        link_view_url,
    }
}

fn classify_without_run(text: &str, spans: &[EntitySpan]) -> Stripped {
    let links: Vec<&EntityKind> = spans
        .iter()
        .filter(|span| span.kind.is_link())
        .map(|span| &span.kind)
        .collect();

    let (view_type, link_view_url) = if links.iter().any(|kind| kind.has_media()) {
        (ViewType::Media, None)
    } else if let Some(last) = links.last() {
        (ViewType::Link, expanded_url(last).map(str::to_string))
    } else {
        (ViewType::None, None)
    };

    Stripped {
        text: text.to_string(),
        view_type,
        link_view_url,
    }
}

fn find_link<'a>(spans: &'a [EntitySpan], short: &str) -> Option<&'a EntityKind> {
    spans
        .iter()
        .find(|span| span.short_url() == Some(short))
        .map(|span| &span.kind)
}

fn expanded_url(kind: &EntityKind) -> Option<&str> {
    match kind {
        EntityKind::Link { url, .. } => Some(url),
        _ => None,
    }
}

fn remove_last(text: &str, needle: &str) -> String {
    match text.rfind(needle) {
        Some(idx) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}
