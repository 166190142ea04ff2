//! Post-processing hook (§4.6, §4.8): moves a handler's raw temp file into
//! the content-typed ingest directory, attempting archive extraction first.
//!
//! The handler returns a temp path only; it never knows about
//! `IngestConfig`'s per-format directories or the archive/non-archive split.
//! That split is a magic-bytes sniff rather than a trust in the temp file's
//! (usually extension-less) name: `extract_archive` itself only acts on a
//! `.zip`-suffixed path, so a short-lived copy is given that suffix before
//! the extraction attempt.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::config::IngestConfig;

use super::{extract_archive, ingest_filename, ArchiveError};

#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("archive contained no file matching the requested format")]
    NoMatchingFile,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

fn looks_like_zip(path: &Path) -> bool {
    let mut buf = [0u8; 4];
    let Ok(mut f) = fs::File::open(path) else { return false };
    matches!(f.read_exact(&mut buf), Ok(())) && buf == ZIP_MAGIC
}

fn dest_dir(cfg: &IngestConfig, format: &str) -> PathBuf {
    cfg.content_type_dirs
        .get(format)
        .cloned()
        .unwrap_or_else(|| cfg.base_dir.clone())
}

/// Moves `tmp_path` into its final ingest location for `task_id`, extracting
/// it first if it turns out to be a zip bundle. Returns the final on-disk
/// path of the content file.
pub fn finalize_download(
    tmp_path: &Path,
    task_id: &str,
    title: Option<&str>,
    format: &str,
    cfg: &IngestConfig,
) -> Result<PathBuf, FinalizeError> {
    let dir = dest_dir(cfg, format);
    fs::create_dir_all(&dir)?;
    let final_name = ingest_filename(task_id, title, format, cfg.title_as_filename);
    let final_path = dir.join(&final_name);

    if !looks_like_zip(tmp_path) {
        fs::rename(tmp_path, &final_path).or_else(|_| {
            fs::copy(tmp_path, &final_path)?;
            fs::remove_file(tmp_path)
        })?;
        return Ok(final_path);
    }

    let zip_tmp = tmp_path.with_extension("zip");
    fs::rename(tmp_path, &zip_tmp)?;

    let is_audiobook = cfg
        .supported_audiobook_formats
        .iter()
        .any(|f| f.eq_ignore_ascii_case(format));

    match extract_archive(&zip_tmp, &dir, &cfg.supported_formats, is_audiobook) {
        Ok(outcome) => {
            let matched = outcome
                .matched_files
                .into_iter()
                .find(|p| {
                    p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e.eq_ignore_ascii_case(format))
                        .unwrap_or(false)
                })
                .ok_or(FinalizeError::NoMatchingFile)?;
            if matched != final_path {
                fs::rename(&matched, &final_path)?;
            }
            Ok(final_path)
        }
        Err(ArchiveError::Unsupported(_)) => {
            // Not actually a zip despite the magic-bytes sniff; treat as the raw content file.
            fs::rename(&zip_tmp, &final_path)?;
            Ok(final_path)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;

    fn cfg(base: &Path) -> IngestConfig {
        IngestConfig {
            base_dir: base.to_path_buf(),
            content_type_dirs: BTreeMap::new(),
            supported_formats: vec!["epub".to_string(), "mobi".to_string()],
            supported_audiobook_formats: vec!["m4b".to_string()],
            title_as_filename: false,
        }
    }

    #[test]
    fn non_archive_temp_file_is_renamed_into_ingest_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("bookd-dl-xyz");
        fs::write(&src, b"not a zip, plain epub bytes").unwrap();

        let dest_root = tmp.path().join("ingest");
        let result = finalize_download(&src, "task1", None, "epub", &cfg(&dest_root)).unwrap();

        assert_eq!(result, dest_root.join("task1.epub"));
        assert!(result.exists());
        assert!(!src.exists());
    }

    #[test]
    fn zip_archive_is_extracted_and_matching_file_moved_to_final_name() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("bookd-dl-abc");
        {
            let file = fs::File::create(&src).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
            writer.start_file("book.epub", options).unwrap();
            writer.write_all(b"epub-bytes").unwrap();
            writer.finish().unwrap();
        }

        let dest_root = tmp.path().join("ingest");
        let result = finalize_download(&src, "task2", Some("My Title"), "epub", &cfg(&dest_root)).unwrap();

        assert_eq!(result, dest_root.join("task2.epub"));
        assert!(result.exists());
        assert!(!src.exists());
    }

    #[test]
    fn content_type_dir_override_is_used_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("bookd-dl-def");
        fs::write(&src, b"plain mobi bytes").unwrap();

        let base = tmp.path().join("ingest");
        let mobi_dir = tmp.path().join("ingest-mobi");
        let mut c = cfg(&base);
        c.content_type_dirs.insert("mobi".to_string(), mobi_dir.clone());

        let result = finalize_download(&src, "task3", None, "mobi", &c).unwrap();
        assert_eq!(result, mobi_dir.join("task3.mobi"));
    }
}
