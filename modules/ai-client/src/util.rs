/// Detect an image media type from the leading characters of its base64
/// payload. Falls back to JPEG for anything unrecognized.
pub fn detect_image_media_type(base64_data: &str) -> &'static str {
    if base64_data.starts_with("/9j/") {
        "image/jpeg"
    } else if base64_data.starts_with("iVBOR") {
        "image/png"
    } else if base64_data.starts_with("R0lGO") {
        "image/gif"
    } else if base64_data.starts_with("UklGR") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}
