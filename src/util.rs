//! Small helpers for filenames, sizes and image bytes.

use std::io::Cursor;
use std::sync::LazyLock;

use chrono::{DateTime, Local};
use regex::Regex;

use crate::error::AdtoonError;

#[allow(clippy::expect_used)]
static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("static regex"));

#[allow(clippy::expect_used)]
static REPEATED_UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("_+").expect("static regex"));

/// Replaces characters that aren't allowed in filenames with `_`, collapses
/// runs of underscores and trims dots/spaces from both ends.
pub fn sanitize_filename(filename: &str) -> String {
    let replaced = UNSAFE_FILENAME_CHARS.replace_all(filename, "_");
    let collapsed = REPEATED_UNDERSCORES.replace_all(&replaced, "_");
    let trimmed = collapsed.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Human readable byte count, eg `1.50 MB`.
pub fn format_file_size(size_bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    #[allow(clippy::cast_precision_loss)]
    let mut size = size_bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

/// `YYYYMMDD_HHMMSS`, used in generated filenames.
pub fn timestamp_string(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Filename for a freshly generated scene file.
pub fn scenes_filename(now: DateTime<Local>) -> String {
    format!("scenes_{}.json", timestamp_string(now))
}

/// Filename of a scene's illustration.
pub fn scene_image_filename(index: usize) -> String {
    format!("scene_{index}.png")
}

/// Width and height of an encoded image. Fails when the bytes aren't an
/// image we can read.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), AdtoonError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| AdtoonError::Api(format!("unreadable image: {err}")))?
        .into_dimensions()
        .map_err(|err| AdtoonError::Api(format!("unreadable image: {err}")))
}

#[cfg(test)]
pub(crate) fn tiny_png() -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbImage::new(3, 2)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode png");
    bytes
}
