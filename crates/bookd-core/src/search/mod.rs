//! Anna's Archive catalog search (§3.3 supplement): the one concrete
//! `ReleaseSource` this workspace ships, pairing with the Cascade download
//! handler (§4.6) which resolves the same MD5-keyed ids it returns.
//!
//! Grounded on `book_manager.py`'s `search_books`/`_parse_search_result_row`:
//! same query string shape, same `<table><tr><td>` column layout, ported
//! from `BeautifulSoup` to `scraper` (already this workspace's HTML-parsing
//! crate, see `cascade::page`).

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::warn;

use crate::bypass::BypassGateway;
use crate::cancel::CancelToken;
use crate::dns::DnsLayer;
use crate::fetcher::{self, FetchContext};
use crate::registry::{BookMetadata, ColumnConfig, ColumnSpec, Protocol, Release, RegistryError, ReleaseSource};
use crate::selector::MirrorRotator;

const SUPPORTED_FORMATS: &[&str] = &["epub", "mobi", "azw3", "fb2", "djvu", "cbz", "cbr", "pdf"];

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

pub struct AaSearchSource {
    base_url: String,
    selector: Arc<dyn MirrorRotator>,
    bypass: Arc<BypassGateway>,
    bypass_enabled: bool,
    dns: Option<Arc<DnsLayer>>,
}

impl AaSearchSource {
    pub fn new(
        base_url: impl Into<String>,
        selector: Arc<dyn MirrorRotator>,
        bypass: Arc<BypassGateway>,
        bypass_enabled: bool,
        dns: Option<Arc<DnsLayer>>,
    ) -> Self {
        Self { base_url: base_url.into(), selector, bypass, bypass_enabled, dns }
    }

    fn search_url(&self, metadata: &BookMetadata, languages: &[String]) -> String {
        let mut query = metadata.query.clone().unwrap_or_default();
        if !metadata.isbn.is_empty() {
            let clauses = metadata
                .isbn
                .iter()
                .map(|isbn| format!("('isbn13:{isbn}' || 'isbn10:{isbn}')"))
                .collect::<Vec<_>>()
                .join(" || ");
            query = format!("({clauses}) {query}");
        }

        let mut filters = String::new();
        for lang in languages.iter().filter(|l| l.as_str() != "all") {
            filters.push_str(&format!("&lang={}", encode(lang)));
        }
        for (idx, author) in metadata.author.iter().enumerate() {
            filters.push_str(&format!("&termtype_{idx}=author&termval_{idx}={}", encode(author)));
        }
        for (idx, title) in metadata.title.iter().enumerate() {
            filters.push_str(&format!("&termtype_{idx}=title&termval_{idx}={}", encode(title)));
        }

        let ext_clause = SUPPORTED_FORMATS
            .iter()
            .map(|f| format!("&ext={f}"))
            .collect::<String>();

        format!(
            "{}/search?index=&page=1&display=table&acc=aa_download&acc=external_download{ext_clause}&q={}{filters}",
            self.base_url,
            encode(&query),
        )
    }

    fn parse_results(&self, html: &str) -> Vec<Release> {
        let doc = Html::parse_document(html);
        let Ok(row_sel) = Selector::parse("table tr") else { return Vec::new() };
        let Ok(cell_sel) = Selector::parse("td") else { return Vec::new() };
        let Ok(anchor_sel) = Selector::parse("a") else { return Vec::new() };
        let Ok(span_sel) = Selector::parse("span") else { return Vec::new() };

        let cell_text = |cells: &[scraper::ElementRef], idx: usize| -> Option<String> {
            cells.get(idx).and_then(|c| {
                c.select(&span_sel)
                    .next()
                    .map(|s| s.text().collect::<String>())
                    .or_else(|| Some(c.text().collect::<String>()))
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        };

        let mut out = Vec::new();
        for row in doc.select(&row_sel) {
            let cells: Vec<scraper::ElementRef> = row.select(&cell_sel).collect();
            if cells.len() < 11 {
                continue;
            }
            let Some(id) = row
                .select(&anchor_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| href.rsplit('/').next())
                .map(|s| s.to_string())
            else {
                continue;
            };

            let title = cell_text(&cells, 1).unwrap_or_else(|| "Untitled".to_string());
            let author = cell_text(&cells, 2);
            let language = cell_text(&cells, 7);
            let format = cell_text(&cells, 9).unwrap_or_else(|| "unknown".to_string()).to_lowercase();
            let size = cell_text(&cells, 10);

            out.push(Release {
                source: self.name().to_string(),
                source_id: id.clone(),
                title,
                format,
                language,
                size,
                size_bytes: None,
                download_url: None,
                info_url: Some(format!("{}/md5/{id}", self.base_url)),
                protocol: Protocol::Http,
                indexer: author,
                seeders: None,
                peers: None,
                extra: serde_json::Map::new(),
            });
        }
        out
    }
}

#[async_trait]
impl ReleaseSource for AaSearchSource {
    fn name(&self) -> &str {
        "aa-catalog"
    }

    async fn search(
        &self,
        metadata: &BookMetadata,
        _expand_search: bool,
        languages: &[String],
    ) -> Result<Vec<Release>, RegistryError> {
        let url = self.search_url(metadata, languages);
        let ctx = FetchContext {
            selector: self.selector.as_ref(),
            bypass: self.bypass.as_ref(),
            dns: self.dns.as_deref(),
            cancel: CancelToken::new(),
            custom_headers: std::collections::HashMap::new(),
        };
        let html = fetcher::html_get(&url, self.bypass_enabled, &ctx)
            .await
            .map_err(|e| RegistryError::HandlerFailed(e.to_string()))?;

        if html.contains("No files found.") {
            return Ok(Vec::new());
        }
        let releases = self.parse_results(&html);
        if releases.is_empty() {
            warn!(url = %url, "aa-catalog: no parseable results table");
        }
        Ok(releases)
    }

    fn is_available(&self) -> bool {
        true
    }

    fn get_column_config(&self) -> ColumnConfig {
        ColumnConfig {
            columns: vec![
                ColumnSpec { key: "title".into(), label: "Title".into(), render_hint: "text".into(), width: None, mobile_visible: true },
                ColumnSpec { key: "indexer".into(), label: "Author".into(), render_hint: "text".into(), width: None, mobile_visible: true },
                ColumnSpec { key: "format".into(), label: "Format".into(), render_hint: "badge".into(), width: Some(80), mobile_visible: true },
                ColumnSpec { key: "language".into(), label: "Language".into(), render_hint: "text".into(), width: Some(100), mobile_visible: false },
                ColumnSpec { key: "size".into(), label: "Size".into(), render_hint: "text".into(), width: Some(80), mobile_visible: false },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bypass::{BypassGateway, CookieStore, EmbeddedBackend};
    use crate::selector::Selector;

    fn fixture() -> AaSearchSource {
        let selector: Arc<dyn MirrorRotator> = Arc::new(
            Selector::with_probe(vec!["https://example.org".to_string()], 1, |_: &str| true).unwrap(),
        );
        let backend: Arc<dyn crate::bypass::Backend> =
            Arc::new(EmbeddedBackend::new(Arc::new(CookieStore::default())));
        let bypass = Arc::new(BypassGateway::new(backend, Arc::new(CookieStore::default()), 5, None));
        AaSearchSource::new("https://annas-archive.org", selector, bypass, false, None)
    }

    #[test]
    fn search_url_includes_query_and_format_filters() {
        let source = fixture();
        let metadata = BookMetadata {
            query: Some("dune".to_string()),
            isbn: vec![],
            author: vec![],
            title: vec![],
            language: vec![],
        };
        let url = source.search_url(&metadata, &[]);
        assert!(url.contains("q=dune"));
        assert!(url.contains("&ext=epub"));
    }

    #[test]
    fn search_url_combines_isbn_and_free_text_query() {
        let source = fixture();
        let metadata = BookMetadata {
            query: Some("dune".to_string()),
            isbn: vec!["9780441013593".to_string()],
            author: vec![],
            title: vec![],
            language: vec![],
        };
        let url = source.search_url(&metadata, &[]);
        assert!(url.contains("isbn13%3A9780441013593"));
    }

    #[test]
    fn parse_results_extracts_row_fields() {
        let source = fixture();
        let html = r#"
            <table>
              <tr>
                <td><a href="/md5/abc123">x</a></td>
                <td><span>Dune</span></td>
                <td><span>Frank Herbert</span></td>
                <td><span>Ace</span></td>
                <td><span>1965</span></td>
                <td></td>
                <td></td>
                <td><span>English</span></td>
                <td></td>
                <td><span>EPUB</span></td>
                <td><span>2.1MB</span></td>
              </tr>
            </table>
        "#;
        let releases = source.parse_results(html);
        assert_eq!(releases.len(), 1);
        let r = &releases[0];
        assert_eq!(r.source_id, "abc123");
        assert_eq!(r.title, "Dune");
        assert_eq!(r.format, "epub");
        assert_eq!(r.language.as_deref(), Some("English"));
    }

    #[test]
    fn parse_results_skips_rows_with_too_few_cells() {
        let source = fixture();
        let html = "<table><tr><td>only one cell</td></tr></table>";
        assert!(source.parse_results(html).is_empty());
    }
}
