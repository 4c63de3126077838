//! Minimal, allocation-light helpers for inspecting an SVG document's root
//! element without a full XML parser.

use crate::geometry::{DEFAULT_CONTENT_HEIGHT, DEFAULT_CONTENT_WIDTH};

pub const ROOT_TAG: &str = "svg";
pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

fn is_tag_boundary(ch: Option<char>) -> bool {
    match ch {
        Some(ch) => ch.is_whitespace() || ch == '>' || ch == '/',
        None => false,
    }
}

/// Byte offsets of every `<svg` opening tag in `text`.
pub fn open_tag_positions(text: &str) -> Vec<usize> {
    let needle = format!("<{ROOT_TAG}");
    text.match_indices(&needle)
        .filter(|(idx, _)| is_tag_boundary(text[idx + needle.len()..].chars().next()))
        .map(|(idx, _)| idx)
        .collect()
}

/// Byte ranges (start, end-exclusive) of every `</svg>` closing tag in `text`.
pub fn close_tag_ranges(text: &str) -> Vec<(usize, usize)> {
    let needle = format!("</{ROOT_TAG}");
    text.match_indices(&needle)
        .filter_map(|(idx, _)| {
            let tail = &text[idx + needle.len()..];
            let trimmed = tail.trim_start();
            if !trimmed.starts_with('>') {
                return None;
            }
            let end = idx + needle.len() + (tail.len() - trimmed.len()) + 1;
            Some((idx, end))
        })
        .collect()
}

/// The text of the first root opening tag up to (not including) its `>`.
pub fn root_open_tag(text: &str) -> Option<&str> {
    let start = *open_tag_positions(text).first()?;
    let end = text[start..].find('>')? + start;
    Some(&text[start..end])
}

/// Looks up an attribute value on a tag, e.g. `attribute(tag, "viewBox")`.
/// Names are matched exactly, so `xmlns` does not match `xmlns:xlink`.
pub fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(found) = tag[search_from..].find(name) {
        let idx = search_from + found;
        search_from = idx + name.len();
        let preceded_by_space = tag[..idx]
            .chars()
            .next_back()
            .map(char::is_whitespace)
            .unwrap_or(false);
        if !preceded_by_space {
            continue;
        }
        let rest = tag[idx + name.len()..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        let quote = rest.chars().next()?;
        if quote != '"' && quote != '\'' {
            continue;
        }
        let body = &rest[1..];
        let close = body.find(quote)?;
        return Some(&body[..close]);
    }
    None
}

fn leading_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let numeric: String = trimmed
        .chars()
        .take_while(|ch| ch.is_ascii_digit() || *ch == '.' || *ch == '-')
        .collect();
    numeric.parse::<f64>().ok().filter(|value| *value > 0.0)
}

fn view_box_size(raw: &str) -> Option<(f64, f64)> {
    let parts: Vec<f64> = raw
        .split(|ch: char| ch.is_whitespace() || ch == ',')
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse::<f64>().ok())
        .collect();
    if parts.len() != 4 || parts[2] <= 0.0 || parts[3] <= 0.0 {
        return None;
    }
    Some((parts[2], parts[3]))
}

/// Intrinsic size of a document: `viewBox`, then `width`/`height`, then 800×600.
pub fn content_size(document: &str) -> (f64, f64) {
    let Some(tag) = root_open_tag(document) else {
        return (DEFAULT_CONTENT_WIDTH, DEFAULT_CONTENT_HEIGHT);
    };
    if let Some(size) = attribute(tag, "viewBox").and_then(view_box_size) {
        return size;
    }
    let width = attribute(tag, "width").and_then(leading_number);
    let height = attribute(tag, "height").and_then(leading_number);
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        _ => (DEFAULT_CONTENT_WIDTH, DEFAULT_CONTENT_HEIGHT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_tags_ignore_lookalike_elements() {
        let text = "<svg><svgfoo/><svg x='1'></svg></svg>";
        assert_eq!(open_tag_positions(text), vec![0, 14]);
        assert_eq!(close_tag_ranges(text).len(), 2);
    }

    #[test]
    fn close_tag_allows_inner_whitespace() {
        let text = "<svg></svg >";
        assert_eq!(close_tag_ranges(text), vec![(5, 12)]);
    }

    #[test]
    fn attribute_lookup_is_exact() {
        let tag = r#"<svg xmlns:xlink="http://www.w3.org/1999/xlink" width='40'"#;
        assert_eq!(attribute(tag, "xmlns"), None);
        assert_eq!(attribute(tag, "width"), Some("40"));
        assert_eq!(
            attribute(tag, "xmlns:xlink"),
            Some("http://www.w3.org/1999/xlink")
        );
    }

    #[test]
    fn content_size_prefers_view_box() {
        assert_eq!(
            content_size(r#"<svg width="10" height="10" viewBox="0 0 300 150"></svg>"#),
            (300.0, 150.0)
        );
        assert_eq!(
            content_size(r#"<svg width="640px" height="480px"></svg>"#),
            (640.0, 480.0)
        );
        assert_eq!(content_size("<svg></svg>"), (800.0, 600.0));
        assert_eq!(content_size("no markup"), (800.0, 600.0));
    }
}
