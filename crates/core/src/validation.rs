//! Request validation for generation inputs.
//!
//! Everything here runs before any remote call is made, so a rejected
//! request never creates files on the workflow server.

use image::ImageFormat;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// File extensions accepted for image and mask uploads (lowercase).
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Maximum number of images accepted by one batch request.
pub const MAX_BATCH_SIZE: usize = 10;

/// Output sizes understood by the generation node.
pub const VALID_SIZES: &[&str] = &["1024x1024", "1536x1024", "1024x1536", "auto"];

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 4_000;

// ---------------------------------------------------------------------------
// File checks
// ---------------------------------------------------------------------------

/// Return the lowercase extension of `filename` if it is an allowed image type.
pub fn image_extension(filename: &str) -> Result<String, CoreError> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(CoreError::Validation(format!(
            "Allowed image types: {}",
            ALLOWED_IMAGE_EXTENSIONS.join(", ")
        )))
    }
}

/// MIME type for an upload, derived from its extension.
///
/// Falls back to `image/png` for anything that is not a JPEG; callers are
/// expected to have run [`image_extension`] first.
pub fn mime_type_for(filename: &str) -> &'static str {
    match image_extension(filename).as_deref() {
        Ok("jpg") | Ok("jpeg") => "image/jpeg",
        _ => "image/png",
    }
}

/// Validate an uploaded image: allowed extension, non-empty, and content
/// that actually sniffs as PNG or JPEG.
pub fn validate_image_upload(field: &str, filename: &str, data: &[u8]) -> Result<(), CoreError> {
    image_extension(filename)
        .map_err(|e| CoreError::Validation(format!("{field} '{filename}': {e}")))?;

    if data.is_empty() {
        return Err(CoreError::Validation(format!("{field} '{filename}' is empty")));
    }

    match image::guess_format(data) {
        Ok(ImageFormat::Png | ImageFormat::Jpeg) => Ok(()),
        _ => Err(CoreError::Validation(format!(
            "{field} '{filename}' is not a PNG or JPEG image"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Form field checks
// ---------------------------------------------------------------------------

/// Validate a text prompt and return it trimmed.
pub fn validate_prompt(prompt: &str) -> Result<&str, CoreError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Missing prompt parameter".into()));
    }
    if trimmed.chars().count() > MAX_PROMPT_LENGTH {
        return Err(CoreError::Validation(format!(
            "Prompt exceeds {MAX_PROMPT_LENGTH} characters"
        )));
    }
    Ok(trimmed)
}

/// Validate the requested output size.
pub fn validate_size(size: &str) -> Result<(), CoreError> {
    if VALID_SIZES.contains(&size) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid size '{size}'. Must be one of: {VALID_SIZES:?}"
        )))
    }
}

/// Validate the number of images in a batch request.
pub fn validate_batch_size(count: usize) -> Result<(), CoreError> {
    if count == 0 {
        return Err(CoreError::Validation("At least one image is required".into()));
    }
    if count > MAX_BATCH_SIZE {
        return Err(CoreError::Validation(format!(
            "Maximum {MAX_BATCH_SIZE} images allowed per batch"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_MAGIC: &[u8] = b"\xFF\xD8\xFF\xE0\0\x10JFIF\0";

    #[test]
    fn extension_is_case_insensitive() {
        assert_eq!(image_extension("Photo.PNG").unwrap(), "png");
        assert_eq!(image_extension("a.b.jpeg").unwrap(), "jpeg");
    }

    #[test]
    fn extension_rejects_other_types() {
        assert_matches!(image_extension("clip.gif"), Err(CoreError::Validation(_)));
        assert_matches!(image_extension("no_extension"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn mime_type_follows_extension() {
        assert_eq!(mime_type_for("x.jpg"), "image/jpeg");
        assert_eq!(mime_type_for("x.JPEG"), "image/jpeg");
        assert_eq!(mime_type_for("x.png"), "image/png");
    }

    #[test]
    fn upload_accepts_png_and_jpeg_content() {
        assert!(validate_image_upload("image", "a.png", PNG_MAGIC).is_ok());
        assert!(validate_image_upload("image", "a.jpg", JPEG_MAGIC).is_ok());
    }

    #[test]
    fn upload_rejects_empty_and_mislabelled_content() {
        assert_matches!(
            validate_image_upload("mask", "m.png", &[]),
            Err(CoreError::Validation(msg)) if msg.contains("empty")
        );
        assert_matches!(
            validate_image_upload("image", "a.png", b"GIF89a......"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn prompt_is_trimmed_and_required() {
        assert_eq!(validate_prompt("  a cat  ").unwrap(), "a cat");
        assert_matches!(validate_prompt("   "), Err(CoreError::Validation(_)));
    }

    #[test]
    fn batch_size_bounds() {
        assert!(validate_batch_size(1).is_ok());
        assert!(validate_batch_size(MAX_BATCH_SIZE).is_ok());
        assert_matches!(validate_batch_size(0), Err(CoreError::Validation(_)));
        assert_matches!(
            validate_batch_size(MAX_BATCH_SIZE + 1),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn size_must_be_known() {
        assert!(validate_size("1024x1024").is_ok());
        assert_matches!(validate_size("640x480"), Err(CoreError::Validation(_)));
    }
}
