use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chalk_contracts::markup::{self, ROOT_TAG, SVG_NAMESPACE};
use chalk_contracts::media::{EncodedImage, PNG_MIME};

use crate::error::GenerationError;
use crate::service::ServiceOutput;

pub const DEFAULT_VIEW_BOX: &str = "0 0 800 600";

/// Repairs model markup into a single well-formed root document, or explains
/// why it cannot.
pub fn validate_markup(raw: &str) -> Result<String, GenerationError> {
    let text = strip_code_fences(raw);

    let open = *markup::open_tag_positions(text)
        .first()
        .ok_or_else(|| invalid("no opening <svg> tag"))?;
    let close_end = markup::close_tag_ranges(text)
        .last()
        .map(|(_, end)| *end)
        .filter(|end| *end > open)
        .ok_or_else(|| invalid("no closing </svg> tag"))?;
    let document = &text[open..close_end];

    let opens = markup::open_tag_positions(document);
    let closes = markup::close_tag_ranges(document);
    if opens.len() != closes.len() {
        return Err(invalid(&format!(
            "unbalanced root tags ({} opening, {} closing)",
            opens.len(),
            closes.len()
        )));
    }
    if first_root_end(&opens, &closes) != closes.last().map(|(_, end)| *end) {
        return Err(invalid("more than one root element"));
    }

    let tag_end = document
        .find('>')
        .ok_or_else(|| invalid("unterminated root tag"))?;
    let root_tag = &document[..tag_end];
    let mut injected = String::new();
    if markup::attribute(root_tag, "xmlns").is_none() {
        injected.push_str(&format!(" xmlns=\"{SVG_NAMESPACE}\""));
    }
    if markup::attribute(root_tag, "viewBox").is_none() {
        injected.push_str(&format!(" viewBox=\"{DEFAULT_VIEW_BOX}\""));
    }

    let head_len = ROOT_TAG.len() + 1;
    let repaired = format!(
        "{}{}{}",
        &document[..head_len],
        injected,
        &document[head_len..]
    );
    if !repaired.starts_with(&format!("<{ROOT_TAG}"))
        || !repaired.trim_end().ends_with(&format!("</{ROOT_TAG}>"))
    {
        return Err(invalid("document does not start and end with the root tag"));
    }
    Ok(repaired)
}

/// End offset of the close tag that brings nesting back to zero.
fn first_root_end(opens: &[usize], closes: &[(usize, usize)]) -> Option<usize> {
    let mut tags: Vec<(usize, i32, usize)> = opens.iter().map(|pos| (*pos, 1, *pos)).collect();
    tags.extend(closes.iter().map(|(start, end)| (*start, -1, *end)));
    tags.sort_unstable();

    let mut depth = 0;
    for (_, step, end) in tags {
        depth += step;
        if depth == 0 {
            return Some(end);
        }
    }
    None
}

fn invalid(reason: &str) -> GenerationError {
    GenerationError::InvalidOutput(reason.to_string())
}

fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest
            .trim_start_matches(|ch: char| ch.is_ascii_alphanumeric() || ch == '+' || ch == '-')
            .trim_start();
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }
    text
}

/// Picks the first image-typed attachment and normalizes it to base64.
pub fn extract_image(output: &ServiceOutput) -> Result<EncodedImage, GenerationError> {
    let attachment = output
        .attachments
        .iter()
        .find(|item| {
            item.media_type
                .trim()
                .to_ascii_lowercase()
                .starts_with("image/")
        })
        .ok_or(GenerationError::NoImage)?;

    let media_type = attachment.media_type.trim();
    if let Some(encoded) = attachment
        .encoded
        .as_deref()
        .and_then(|raw| EncodedImage::from_data_url_or_base64(raw, media_type))
    {
        return Ok(EncodedImage {
            mime_type: if media_type.is_empty() {
                PNG_MIME.to_string()
            } else {
                media_type.to_string()
            },
            data_base64: encoded.data_base64,
        });
    }
    match attachment.bytes.as_deref() {
        Some(bytes) if !bytes.is_empty() => Ok(EncodedImage {
            mime_type: media_type.to_string(),
            data_base64: BASE64.encode(bytes),
        }),
        _ => Err(GenerationError::ImageData),
    }
}
