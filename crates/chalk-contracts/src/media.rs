use std::io::Cursor;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageReader;
use serde::{Deserialize, Serialize};

use crate::markup;

pub const PNG_MIME: &str = "image/png";
pub const SVG_MIME: &str = "image/svg+xml";

/// Image bytes in transportable (base64) form together with their media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data_base64: String,
}

impl EncodedImage {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data_base64: BASE64.encode(bytes),
        }
    }

    pub fn png(bytes: &[u8]) -> Self {
        Self::from_bytes(PNG_MIME, bytes)
    }

    /// Accepts either a `data:<mime>;base64,<payload>` URL or a bare base64
    /// payload, in which case `fallback_mime` is used.
    pub fn from_data_url_or_base64(raw: &str, fallback_mime: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(rest) = trimmed.strip_prefix("data:") {
            let (header, payload) = rest.split_once(',')?;
            let mime = header
                .split(';')
                .next()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(fallback_mime);
            if payload.trim().is_empty() {
                return None;
            }
            return Some(Self {
                mime_type: mime.to_string(),
                data_base64: payload.trim().to_string(),
            });
        }
        Some(Self {
            mime_type: fallback_mime.to_string(),
            data_base64: trimmed.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.data_base64.trim().is_empty()
    }

    pub fn is_svg(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case(SVG_MIME)
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.data_base64.trim().as_bytes())
            .with_context(|| format!("invalid base64 payload for {}", self.mime_type))
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data_base64)
    }

    pub fn file_extension(&self) -> &'static str {
        let lowered = self.mime_type.to_ascii_lowercase();
        if lowered.contains("svg") {
            "svg"
        } else if lowered.contains("jpeg") || lowered.contains("jpg") {
            "jpg"
        } else if lowered.contains("webp") {
            "webp"
        } else {
            "png"
        }
    }

    /// Pixel (or user-unit, for SVG) dimensions of the encoded content.
    pub fn dimensions(&self) -> Result<(u32, u32)> {
        let bytes = self.decode()?;
        if self.is_svg() {
            let text = String::from_utf8(bytes).context("svg payload is not utf-8")?;
            let (w, h) = markup::content_size(&text);
            return Ok((w.round().max(1.0) as u32, h.round().max(1.0) as u32));
        }
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .context("failed to sniff image format")?;
        if reader.format().is_none() {
            bail!("unrecognized image format ({})", self.mime_type);
        }
        reader
            .into_dimensions()
            .context("failed to read image dimensions")
    }
}
