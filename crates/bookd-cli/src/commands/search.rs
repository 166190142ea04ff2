//! `bookd search` — queries a running `bookd serve`'s `/api/search`.

use anyhow::Result;

use crate::http_client::ApiClient;

pub fn run(client: &ApiClient, query: &str, lang: &[String], format: &[String]) -> Result<()> {
    let mut path = format!("/search?query={}", urlencode(query));
    for l in lang {
        path.push_str(&format!("&lang={}", urlencode(l)));
    }
    for f in format {
        path.push_str(&format!("&format={}", urlencode(f)));
    }

    let value = client.get(&path)?;
    let Some(releases) = value.as_array() else {
        println!("unexpected response: {value}");
        return Ok(());
    };
    if releases.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!("{:<24} {:<40} {:<8} {}", "ID", "TITLE", "FORMAT", "SOURCE");
    for r in releases {
        println!(
            "{:<24} {:<40} {:<8} {}",
            r.get("source_id").and_then(|v| v.as_str()).unwrap_or("?"),
            truncate(r.get("title").and_then(|v| v.as_str()).unwrap_or("?"), 40),
            r.get("format").and_then(|v| v.as_str()).unwrap_or("?"),
            r.get("source").and_then(|v| v.as_str()).unwrap_or("?"),
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max { s.to_string() } else { format!("{}…", &s[..max.saturating_sub(1)]) }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
