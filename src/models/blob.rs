//! Naming rules for the objects the worker reads and writes.

/// Sub-prefix under which caption records are written.
pub const CAPTIONS_PREFIX: &str = "captions/";

/// Sub-prefix under which processed originals are archived.
pub const PROCESSED_PREFIX: &str = "processed/";

/// Final `/`-separated segment of a blob name.
pub fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Name of the caption record written for `name`.
pub fn caption_blob_name(name: &str) -> String {
    format!("{}{}.json", CAPTIONS_PREFIX, basename(name))
}

/// Name the original is archived under once it has been captioned.
pub fn processed_blob_name(name: &str) -> String {
    format!("{}{}", PROCESSED_PREFIX, basename(name))
}

/// Guess an image MIME type from the blob's extension, defaulting to JPEG.
pub fn image_mime_type(name: &str) -> &'static str {
    let ext = basename(name)
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}
