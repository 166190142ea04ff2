//! Filename derivation and ingest-path naming.
//!
//! Derives safe local filenames from URL path or Content-Disposition header,
//! and builds the final `<sanitized_title>.<format>` ingest name (§6.4).

mod archive;
mod content_disposition;
mod finalize;
mod path;
mod sanitize;

pub use archive::{extract_archive, ArchiveError};
pub use content_disposition::parse_content_disposition_filename;
pub use finalize::{finalize_download, FinalizeError};
pub use path::filename_from_url_path;
pub use sanitize::sanitize_filename;

/// Default filename when URL path and Content-Disposition yield nothing usable.
const DEFAULT_FILENAME: &str = "download.bin";

/// Derives a safe filename for saving a temp download.
///
/// Prefers the filename from `content_disposition` (if present and
/// parseable), otherwise uses the last path segment of `url`.
pub fn derive_filename(url: &str, content_disposition: Option<&str>) -> String {
    let candidate = content_disposition
        .and_then(parse_content_disposition_filename)
        .filter(|s| !s.is_empty())
        .or_else(|| filename_from_url_path(url));

    let raw = match candidate {
        Some(c) => c,
        None => return DEFAULT_FILENAME.to_string(),
    };

    let sanitized = sanitize_filename(&raw);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        DEFAULT_FILENAME.to_string()
    } else {
        sanitized
    }
}

/// Builds the final ingest filename: `<sanitized_title>.<format>` when
/// `title_as_filename` is set and `title` is non-empty, else
/// `<task_id>.<format>` (§6.4).
pub fn ingest_filename(
    task_id: &str,
    title: Option<&str>,
    format: &str,
    title_as_filename: bool,
) -> String {
    let stem = match (title_as_filename, title) {
        (true, Some(t)) if !t.trim().is_empty() => sanitize_filename(t),
        _ => sanitize_filename(task_id),
    };
    let stem = if stem.is_empty() {
        task_id.to_string()
    } else {
        stem
    };
    format!("{stem}.{format}")
}
