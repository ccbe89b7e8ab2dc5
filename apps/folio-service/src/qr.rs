//! QR rendering for payment payloads.
//!
//! Two outputs: a PNG data URI for web clients and a unicode block
//! rendering for the staff terminal.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::render::unicode;
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

/// QR rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum QrError {
    #[error("Payload cannot be encoded as a QR code: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

/// Smallest image side we render, in pixels.
const MIN_SIZE: u32 = 128;

fn code_for(payload: &str) -> Result<QrCode, QrError> {
    Ok(QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)?)
}

/// Renders `payload` as a `data:image/png;base64,...` URI at least `size` px wide.
pub fn png_data_uri(payload: &str, size: u32) -> Result<String, QrError> {
    let side = size.max(MIN_SIZE);
    let image = code_for(payload)?
        .render::<Luma<u8>>()
        .min_dimensions(side, side)
        .build();

    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image).write_to(&mut png, ImageFormat::Png)?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png.into_inner())))
}

/// Renders `payload` with unicode half blocks for a terminal.
pub fn terminal(payload: &str) -> Result<String, QrError> {
    let rendered = code_for(payload)?
        .render::<unicode::Dense1x2>()
        // inverted for dark terminal backgrounds
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build();

    Ok(rendered)
}
