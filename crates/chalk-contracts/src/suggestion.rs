use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::canvas::ShapeId;
use crate::geometry::Bounds;
use crate::markup;
use crate::media::{EncodedImage, SVG_MIME};

/// Which output contract a generation request asks the model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Markup,
    Image,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markup => "markup",
            Self::Image => "image",
        }
    }

    /// Capability a model must advertise to serve this mode.
    pub fn capability(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "markup" | "svg" => Ok(Self::Markup),
            "image" | "png" => Ok(Self::Image),
            other => Err(format!("unknown generation mode '{other}' (expected markup or image)")),
        }
    }
}

/// The shape set and region a request was captured from; scopes merge-back.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExportContext {
    pub bounds: Option<Bounds>,
    pub shape_ids: Vec<ShapeId>,
}

/// Raster of the canvas taken at request time. Lives for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasSnapshot {
    pub image: EncodedImage,
    pub context: ExportContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SuggestionContent {
    Markup { document: String },
    Image { image: EncodedImage },
}

impl SuggestionContent {
    pub fn markup(document: impl Into<String>) -> Self {
        Self::Markup {
            document: document.into(),
        }
    }

    pub fn image(image: EncodedImage) -> Self {
        Self::Image { image }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Markup { .. } => "markup",
            Self::Image { .. } => "image",
        }
    }

    /// Content as an encoded image suitable for a canvas asset.
    pub fn to_encoded_image(&self) -> EncodedImage {
        match self {
            Self::Markup { document } => EncodedImage::from_bytes(SVG_MIME, document.as_bytes()),
            Self::Image { image } => image.clone(),
        }
    }

    /// Intrinsic size used for scale-to-fit on merge.
    pub fn content_size(&self) -> anyhow::Result<(f64, f64)> {
        match self {
            Self::Markup { document } => Ok(markup::content_size(document)),
            Self::Image { image } => {
                let (w, h) = image.dimensions()?;
                Ok((f64::from(w), f64::from(h)))
            }
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            Self::Markup { document } => document.len(),
            Self::Image { image } => image.data_base64.len(),
        }
    }
}

/// A validated, not-yet-merged generation result.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub intent: String,
    pub content: SuggestionContent,
    pub context: ExportContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_aliases() {
        assert_eq!("SVG".parse::<GenerationMode>(), Ok(GenerationMode::Markup));
        assert_eq!(" image ".parse::<GenerationMode>(), Ok(GenerationMode::Image));
        assert!("video".parse::<GenerationMode>().is_err());
        assert_eq!(GenerationMode::default(), GenerationMode::Markup);
    }

    #[test]
    fn markup_content_becomes_svg_asset() -> anyhow::Result<()> {
        let content = SuggestionContent::markup(r#"<svg viewBox="0 0 40 30"></svg>"#);
        let asset = content.to_encoded_image();
        assert_eq!(asset.mime_type, SVG_MIME);
        assert_eq!(asset.dimensions()?, (40, 30));
        assert_eq!(content.content_size()?, (40.0, 30.0));
        Ok(())
    }

    #[test]
    fn content_serializes_with_kind_tag() -> anyhow::Result<()> {
        let content = SuggestionContent::markup("<svg></svg>");
        let value = serde_json::to_value(&content)?;
        assert_eq!(value["kind"], "markup");
        assert_eq!(value["document"], "<svg></svg>");
        Ok(())
    }
}
