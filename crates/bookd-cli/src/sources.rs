//! Default direct-download cascade sources (§4.6 supplement), grounded on
//! `direct_download.py`'s `_DOWNLOAD_SOURCES`/`_MD5_URL_TEMPLATES`/
//! `_CF_BYPASS_REQUIRED`/`_AA_PAGE_SOURCES` tables: welib, aa-fast,
//! aa-slow-wait, aa-slow-nowait, aa-slow, libgen, zlib, tried in that
//! priority order.

use std::sync::Arc;

use bookd_core::cascade::{CascadeSource, SourceKind, UrlResolver};

const AA_BASE_URL: &str = "https://annas-archive.org";

/// The fixed cascade priority order. Kept data-driven (rather than one
/// `CascadeSource` literal per branch) so adding a source is a one-line
/// change here plus one match arm in `build_resolver`.
pub fn default_sources() -> Vec<CascadeSource> {
    let defs: &[(&str, &str, SourceKind, bool)] = &[
        ("welib", "Welib", SourceKind::UrlTemplate, true),
        ("aa-fast", "Anna's Archive (Fast)", SourceKind::UrlTemplate, false),
        ("aa-slow-wait", "Anna's Archive (Waitlist)", SourceKind::AaPage, true),
        ("aa-slow-nowait", "Anna's Archive", SourceKind::AaPage, true),
        ("aa-slow", "Anna's Archive (Slow)", SourceKind::ExternalPage, false),
        ("libgen", "Libgen", SourceKind::UrlTemplate, false),
        ("zlib", "Z-Library", SourceKind::UrlTemplate, true),
    ];

    defs.iter()
        .enumerate()
        .map(|(i, (name, display_name, kind, requires_bypass))| CascadeSource {
            name: (*name).to_string(),
            display_name: (*display_name).to_string(),
            priority: i as u32,
            kind: *kind,
            requires_bypass: *requires_bypass,
            enabled: true,
        })
        .collect()
}

/// Builds the `UrlResolver` paired with `default_sources`. `donor_key`
/// enables `aa-fast` (§ source table: unavailable without one, same as the
/// original's `AA_DONATOR_KEY` gate).
pub fn build_resolver(donor_key: Option<String>) -> UrlResolver {
    Arc::new(move |content_hash: &str, source_name: &str, kind: SourceKind| {
        match source_name {
            "zlib" => vec![format!("https://z-lib.fm/md5/{content_hash}")],
            "libgen" => vec![format!("https://libgen.gl/ads.php?md5={content_hash}")],
            "welib" => vec![format!("https://welib.org/md5/{content_hash}")],
            "aa-fast" => match &donor_key {
                Some(key) => vec![format!(
                    "{AA_BASE_URL}/dyn/api/fast_download.json?md5={content_hash}&key={key}"
                )],
                None => vec![],
            },
            _ => match kind {
                SourceKind::AaPage | SourceKind::ExternalPage => {
                    vec![format!("{AA_BASE_URL}/md5/{content_hash}")]
                }
                SourceKind::UrlTemplate => vec![],
            },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_are_ordered_welib_first_zlib_last() {
        let sources = default_sources();
        assert_eq!(sources.first().unwrap().name, "welib");
        assert_eq!(sources.last().unwrap().name, "zlib");
    }

    #[test]
    fn aa_fast_is_empty_without_a_donor_key() {
        let resolver = build_resolver(None);
        assert!(resolver("abc123", "aa-fast", SourceKind::UrlTemplate).is_empty());
    }

    #[test]
    fn aa_fast_uses_the_donor_key_when_present() {
        let resolver = build_resolver(Some("key123".to_string()));
        let urls = resolver("abc123", "aa-fast", SourceKind::UrlTemplate);
        assert_eq!(urls, vec!["https://annas-archive.org/dyn/api/fast_download.json?md5=abc123&key=key123"]);
    }

    #[test]
    fn zlib_uses_its_own_md5_template() {
        let resolver = build_resolver(None);
        let urls = resolver("abc123", "zlib", SourceKind::UrlTemplate);
        assert_eq!(urls, vec!["https://z-lib.fm/md5/abc123"]);
    }

    #[test]
    fn aa_page_sources_point_at_the_book_page() {
        let resolver = build_resolver(None);
        let urls = resolver("abc123", "aa-slow-nowait", SourceKind::AaPage);
        assert_eq!(urls, vec!["https://annas-archive.org/md5/abc123"]);
    }
}
