//! Decoding of host-exported pixel bytes.
//!
//! The host exports nodes as PNG; anything else the `image` crate can
//! decode (JPEG, BMP, WebP) is accepted too. The result is always RGBA
//! so the preprocessor sees the alpha channel.

use crate::types::PixelBuffer;

/// Failure to turn exported bytes into pixels.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The export produced no bytes at all.
    #[error("exported image data is empty")]
    EmptyInput,

    /// The bytes are not a recognizable image.
    #[error("failed to decode exported image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode raw image bytes into an RGBA pixel buffer.
///
/// # Errors
///
/// Returns [`DecodeError::EmptyInput`] if `bytes` is empty.
/// Returns [`DecodeError::Image`] if the format is unrecognized or the
/// data is corrupt.
pub fn decode_pixels(bytes: &[u8]) -> Result<PixelBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyInput);
    }
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}
