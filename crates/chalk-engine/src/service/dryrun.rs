use std::io::Cursor;

use chalk_contracts::media::PNG_MIME;
use chalk_contracts::suggestion::GenerationMode;
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use super::{Attachment, GenerationService, ServiceOutput, ServiceRequest};
use crate::error::GenerationError;

const DRYRUN_WIDTH: u32 = 640;
const DRYRUN_HEIGHT: u32 = 480;

/// Offline stand-in that answers deterministically from the intent.
pub struct DryrunService;

impl GenerationService for DryrunService {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ServiceRequest) -> Result<ServiceOutput, GenerationError> {
        match request.mode {
            GenerationMode::Markup => Ok(ServiceOutput {
                text: Some(dryrun_markup(&request.intent)),
                attachments: Vec::new(),
            }),
            GenerationMode::Image => {
                let bytes = dryrun_png(&request.intent).map_err(|err| {
                    GenerationError::upstream("Dry-run render failed", Some(err.to_string()))
                })?;
                Ok(ServiceOutput {
                    text: None,
                    attachments: vec![Attachment {
                        media_type: PNG_MIME.to_string(),
                        encoded: None,
                        bytes: Some(bytes),
                    }],
                })
            }
        }
    }
}

fn digest(intent: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(intent.trim().as_bytes());
    hasher.finalize().into()
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Fenced and namespace-less on purpose, the way hosted models often answer.
fn dryrun_markup(intent: &str) -> String {
    let tag = hex::encode(&digest(intent)[..4]);
    format!(
        "```svg\n<svg width=\"{DRYRUN_WIDTH}\" height=\"{DRYRUN_HEIGHT}\">\
<g id=\"chalk-{tag}\" fill=\"none\" stroke=\"black\" stroke-width=\"2\">\
<rect x=\"40\" y=\"40\" width=\"560\" height=\"400\"/>\
<rect x=\"220\" y=\"200\" width=\"200\" height=\"80\"/>\
</g>\
<text x=\"320\" y=\"245\" text-anchor=\"middle\" font-family=\"sans-serif\">{}</text>\
</svg>\n```",
        escape_text(intent.trim())
    )
}

fn dryrun_png(intent: &str) -> anyhow::Result<Vec<u8>> {
    let digest = digest(intent);
    let image = RgbImage::from_pixel(
        DRYRUN_WIDTH,
        DRYRUN_HEIGHT,
        Rgb([digest[0], digest[1], digest[2]]),
    );
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
