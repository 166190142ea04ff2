//! Mirror-link and countdown extraction from a fetched partner page.
//!
//! Tries source-specific sibling-text patterns first (`no-wait`/`waitlist`
//! tags), falling through to a generic anchor scan on template drift (§9
//! open-question decision: never hard-error from tag-format drift alone).

use scraper::{Html, Selector};

/// Countdowns longer than this are clamped (§4.6).
pub const MAX_COUNTDOWN_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLink {
    /// A countdown wait before the link becomes available; re-fetch after.
    Countdown(u64),
    /// A direct download link was found.
    Direct(String),
    /// Neither a countdown nor an extractable link was present.
    None,
}

/// Looks for, in order: a "Download now" anchor, a literal URL inside a
/// decorated span, a countdown span with an integer, then falls back to the
/// first absolute anchor on the page (the "generic partner" rule).
pub fn extract_link(html: &str) -> PageLink {
    let doc = Html::parse_document(html);

    if let Some(url) = find_by_text(&doc, "a", "download now") {
        return PageLink::Direct(url);
    }

    if let Some(url) = find_decorated_span_url(&doc) {
        return PageLink::Direct(url);
    }

    if let Some(secs) = find_countdown(&doc) {
        return PageLink::Countdown(secs.min(MAX_COUNTDOWN_SECS));
    }

    if let Some(url) = first_absolute_anchor(&doc) {
        return PageLink::Direct(url);
    }

    PageLink::None
}

/// First 10 anchor texts, for debugging when extraction fails entirely.
pub fn anchor_texts_for_debug(html: &str, limit: usize) -> Vec<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("a").unwrap();
    doc.select(&sel)
        .take(limit)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .collect()
}

fn find_by_text(doc: &Html, tag: &str, needle: &str) -> Option<String> {
    let sel = Selector::parse(tag).ok()?;
    doc.select(&sel)
        .find(|el| {
            el.text()
                .collect::<String>()
                .to_lowercase()
                .contains(needle)
        })
        .and_then(|el| el.value().attr("href"))
        .map(|s| s.to_string())
}

fn find_decorated_span_url(doc: &Html) -> Option<String> {
    let sel = Selector::parse("span[data-url], span.js-download-url").ok()?;
    doc.select(&sel)
        .find_map(|el| el.value().attr("data-url").map(|s| s.to_string()))
}

fn find_countdown(doc: &Html) -> Option<u64> {
    let sel = Selector::parse(".js-partner-countdown, .countdown").ok()?;
    doc.select(&sel).find_map(|el| {
        el.text()
            .collect::<String>()
            .trim()
            .parse::<u64>()
            .ok()
    })
}

fn first_absolute_anchor(doc: &Html) -> Option<String> {
    let sel = Selector::parse("a[href]").ok()?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr("href"))
        .find(|href| href.starts_with("http://") || href.starts_with("https://"))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_download_now_anchor() {
        let html = r#"<html><body><a href="https://example.org/f.epub">Download Now</a></body></html>"#;
        assert_eq!(
            extract_link(html),
            PageLink::Direct("https://example.org/f.epub".to_string())
        );
    }

    #[test]
    fn finds_countdown_span() {
        let html = r#"<html><body><span class="js-partner-countdown">5</span></body></html>"#;
        assert_eq!(extract_link(html), PageLink::Countdown(5));
    }

    #[test]
    fn countdown_is_clamped_to_max() {
        let html = r#"<html><body><span class="countdown">99999</span></body></html>"#;
        assert_eq!(extract_link(html), PageLink::Countdown(MAX_COUNTDOWN_SECS));
    }

    #[test]
    fn falls_back_to_generic_anchor() {
        let html = r#"<html><body><a href="https://example.org/generic">Some Link</a></body></html>"#;
        assert_eq!(
            extract_link(html),
            PageLink::Direct("https://example.org/generic".to_string())
        );
    }

    #[test]
    fn returns_none_when_nothing_extractable() {
        let html = r#"<html><body><p>no links here</p></body></html>"#;
        assert_eq!(extract_link(html), PageLink::None);
    }

    #[test]
    fn unparseable_countdown_text_falls_through() {
        let html = r#"<html><body><span class="js-partner-countdown">soon</span><a href="https://example.org/x">x</a></body></html>"#;
        assert_eq!(
            extract_link(html),
            PageLink::Direct("https://example.org/x".to_string())
        );
    }
}
