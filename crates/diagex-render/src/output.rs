//! Output checks and raster conversion shared by the backends.
//!
//! Backends produce SVG, PNG or PDF natively. JPG and WebP are derived from a
//! PNG render.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::error::RenderError;
use crate::format::ExportFormat;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Format a backend renders natively to produce `requested`.
pub(crate) fn source_format(requested: ExportFormat) -> ExportFormat {
    match requested {
        ExportFormat::Jpg | ExportFormat::Webp => ExportFormat::Png,
        other => other,
    }
}

/// Validate backend output and convert it to the requested format.
pub(crate) fn finalize(
    bytes: Vec<u8>,
    produced: ExportFormat,
    requested: ExportFormat,
) -> Result<Vec<u8>, RenderError> {
    validate(&bytes, produced)?;
    if produced == requested {
        return Ok(bytes);
    }
    let converted = convert_raster(&bytes, requested)?;
    validate(&converted, requested)?;
    Ok(converted)
}

/// Check that `bytes` look like a `format` document.
pub(crate) fn validate(bytes: &[u8], format: ExportFormat) -> Result<(), RenderError> {
    let invalid = |reason: &str| RenderError::InvalidOutput {
        format,
        reason: reason.to_owned(),
    };

    if bytes.is_empty() {
        return Err(invalid("empty output"));
    }

    let ok = match format {
        ExportFormat::Svg => String::from_utf8_lossy(bytes).contains("<svg"),
        ExportFormat::Png => bytes.starts_with(PNG_SIGNATURE),
        ExportFormat::Jpg => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
        ExportFormat::Webp => bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP",
        ExportFormat::Pdf => bytes.starts_with(b"%PDF"),
    };
    if ok {
        Ok(())
    } else {
        Err(invalid("unexpected file signature"))
    }
}

/// Re-encode a PNG as JPG or WebP.
fn convert_raster(png: &[u8], target: ExportFormat) -> Result<Vec<u8>, RenderError> {
    let decoded = image::load_from_memory_with_format(png, ImageFormat::Png).map_err(|e| {
        RenderError::InvalidOutput {
            format: ExportFormat::Png,
            reason: e.to_string(),
        }
    })?;

    let (encoded, image_format) = match target {
        // JPEG has no alpha channel.
        ExportFormat::Jpg => (DynamicImage::ImageRgb8(decoded.to_rgb8()), ImageFormat::Jpeg),
        ExportFormat::Webp => (DynamicImage::ImageRgba8(decoded.to_rgba8()), ImageFormat::WebP),
        other => {
            return Err(RenderError::InvalidOutput {
                format: other,
                reason: "not a raster conversion target".to_owned(),
            });
        }
    };

    let mut buf = Vec::new();
    encoded
        .write_to(&mut Cursor::new(&mut buf), image_format)
        .map_err(|e| RenderError::InvalidOutput {
            format: target,
            reason: e.to_string(),
        })?;
    Ok(buf)
}
