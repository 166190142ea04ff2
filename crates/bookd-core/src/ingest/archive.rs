//! Archive extraction: content-type filtering, duplicate-name resolution,
//! final rename into the ingest directory (§4's Post-Processing component,
//! §6.4).

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const EBOOK_EXTENSIONS: &[&str] = &[
    "pdf", "epub", "mobi", "azw", "azw3", "fb2", "djvu", "cbz", "cbr", "doc", "docx", "rtf", "txt",
];
const AUDIO_EXTENSIONS: &[&str] = &[
    "m4b", "mp3", "m4a", "aac", "flac", "ogg", "wma", "wav", "opus",
];

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive is password protected")]
    PasswordProtected,
    #[error("archive is corrupted: {0}")]
    Corrupted(String),
    #[error("unsupported archive format: {0}")]
    Unsupported(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub struct ExtractOutcome {
    /// Files matching the caller's supported-format allow-list, moved into `output_dir`.
    pub matched_files: Vec<PathBuf>,
    /// Human-readable warnings (e.g. rejected-format file counts).
    pub warnings: Vec<String>,
    /// Files of a recognized ebook/audio format but not in the allow-list; deleted.
    pub rejected_files: Vec<PathBuf>,
}

/// Extracts `archive_path` (zip only; RAR is a deliberate non-goal, see
/// DESIGN.md) into `output_dir`, keeping only files whose extension is in
/// `supported_formats`. Non-matching recognized formats are deleted; the
/// archive itself is removed on success.
pub fn extract_archive(
    archive_path: &Path,
    output_dir: &Path,
    supported_formats: &[String],
    is_audiobook: bool,
) -> Result<ExtractOutcome, ArchiveError> {
    let suffix = archive_path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    if suffix != "zip" {
        return Err(ArchiveError::Unsupported(suffix));
    }

    fs::create_dir_all(output_dir)?;
    let extracted = extract_zip(archive_path, output_dir)?;

    let known: &[&str] = if is_audiobook {
        AUDIO_EXTENSIONS
    } else {
        EBOOK_EXTENSIONS
    };
    let allow: BTreeSet<&str> = supported_formats.iter().map(|s| s.as_str()).collect();

    let mut matched_files = Vec::new();
    let mut rejected_files = Vec::new();
    let mut warnings = Vec::new();

    for path in extracted {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();
        if allow.contains(ext.as_str()) {
            matched_files.push(path);
        } else if known.contains(&ext.as_str()) {
            rejected_files.push(path);
        } else {
            let _ = fs::remove_file(&path);
        }
    }

    if !rejected_files.is_empty() {
        warnings.push(format!(
            "{} file(s) extracted but not in the supported-format allow-list",
            rejected_files.len()
        ));
        for f in &rejected_files {
            let _ = fs::remove_file(f);
        }
    }

    fs::remove_file(archive_path)?;

    Ok(ExtractOutcome {
        matched_files,
        warnings,
        rejected_files,
    })
}

fn extract_zip(archive_path: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| match e {
        zip::result::ZipError::InvalidArchive(msg) => ArchiveError::Corrupted(msg.to_string()),
        other => ArchiveError::Corrupted(other.to_string()),
    })?;

    let mut extracted = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| match e {
            zip::result::ZipError::UnsupportedArchive(msg) if msg.contains("password") => {
                ArchiveError::PasswordProtected
            }
            other => ArchiveError::Corrupted(other.to_string()),
        })?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            continue;
        };
        let target = unique_path(&output_dir.join(&name));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        extracted.push(target);
    }
    Ok(extracted)
}

/// Appends `_1`, `_2`, ... before the extension until `path` does not exist.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");

    let mut counter = 1u32;
    loop {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{counter}"))
        } else {
            parent.join(format!("{stem}_{counter}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_zip(dir: &Path, entries: &[(&str, &[u8])]) -> PathBuf {
        let zip_path = dir.join("src.zip");
        let file = fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
        zip_path
    }

    #[test]
    fn extracts_and_filters_by_supported_formats() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = make_zip(
            tmp.path(),
            &[("book.epub", b"epub-bytes"), ("cover.jpg", b"jpeg-bytes")],
        );
        let out_dir = tmp.path().join("out");
        let outcome = extract_archive(
            &zip_path,
            &out_dir,
            &["epub".to_string()],
            false,
        )
        .unwrap();
        assert_eq!(outcome.matched_files.len(), 1);
        assert!(outcome.matched_files[0].ends_with("book.epub"));
        assert!(!zip_path.exists());
    }

    #[test]
    fn rejects_recognized_but_disallowed_formats() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = make_zip(tmp.path(), &[("book.mobi", b"mobi-bytes")]);
        let out_dir = tmp.path().join("out");
        let outcome = extract_archive(&zip_path, &out_dir, &["epub".to_string()], false).unwrap();
        assert!(outcome.matched_files.is_empty());
        assert_eq!(outcome.rejected_files.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn unsupported_archive_format_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let rar_path = tmp.path().join("archive.rar");
        fs::write(&rar_path, b"not really a rar").unwrap();
        let out_dir = tmp.path().join("out");
        let err = extract_archive(&rar_path, &out_dir, &["epub".to_string()], false).unwrap_err();
        assert!(matches!(err, ArchiveError::Unsupported(_)));
    }

    #[test]
    fn duplicate_name_gets_counter_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let existing = tmp.path().join("book.epub");
        fs::write(&existing, b"existing").unwrap();
        let unique = unique_path(&existing);
        assert_eq!(unique, tmp.path().join("book_1.epub"));
    }
}
