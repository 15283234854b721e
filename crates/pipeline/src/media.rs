//! Image format sniffing for uploads and provider results.

use image::ImageFormat;

/// Formats accepted as source images.
pub const ACCEPTED_FORMATS: [ImageFormat; 3] = [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::WebP];

/// MIME type of `bytes` if they start with a PNG, JPEG or WebP signature.
pub fn detect_image_mime(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    ACCEPTED_FORMATS
        .contains(&format)
        .then(|| format.to_mime_type())
}
