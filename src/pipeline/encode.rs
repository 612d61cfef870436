//! Image encoding: rendered page → PNG bytes, and bytes → base64 for upload.
//!
//! PNG is lossless; JPEG ringing around thin diagram lines makes small part
//! numbers and arrow heads harder for a vision model to read.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

pub const PNG_MIME: &str = "image/png";

/// Encode a rasterised page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} page → {} PNG bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// `data:` URI for providers that take images as URLs.
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, to_base64(bytes))
}
