//! Thin synchronous HTTP client for the CLI's remote subcommands.
//!
//! The Queue and every other piece of server-side state is deliberately
//! in-memory and non-persisted (`bookd-core` §3.2), so a `bookd status` run
//! as a separate process can only observe a running `bookd serve`'s state
//! by talking to its `/api/*` surface over the network. Built on `curl`
//! (already `bookd-core`'s HTTP stack, see `fetcher::download`) rather than
//! pulling in a second HTTP client crate.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;

/// Base URL of the running `bookd serve` instance, e.g. `http://127.0.0.1:8084`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }

    pub fn get(&self, path: &str) -> Result<Value> {
        self.request("GET", path, None)
    }

    pub fn put_json(&self, path: &str, body: &impl Serialize) -> Result<Value> {
        self.request("PUT", path, Some(serde_json::to_vec(body)?))
    }

    pub fn delete(&self, path: &str) -> Result<Value> {
        self.request("DELETE", path, None)
    }

    fn request(&self, method: &str, path: &str, body: Option<Vec<u8>>) -> Result<Value> {
        let url = format!("{}/api{}", self.base_url.trim_end_matches('/'), path);

        let mut easy = curl::easy::Easy::new();
        easy.url(&url).context("setting request url")?;
        easy.connect_timeout(Duration::from_secs(10)).context("setting connect timeout")?;
        easy.timeout(Duration::from_secs(30)).context("setting request timeout")?;
        easy.custom_request(method).context("setting request method")?;
        if let Some(payload) = &body {
            easy.upload(true).context("enabling request body upload")?;
            easy.in_filesize(payload.len() as u64).context("setting request body size")?;
        }

        let mut headers = curl::easy::List::new();
        if body.is_some() {
            headers.append("Content-Type: application/json").ok();
        }
        easy.http_headers(headers).context("setting request headers")?;

        let response = std::sync::Mutex::new(Vec::new());
        let mut transfer = easy.transfer();
        if let Some(payload) = &body {
            let mut remaining = payload.as_slice();
            transfer.read_function(|into| {
                let n = remaining.len().min(into.len());
                into[..n].copy_from_slice(&remaining[..n]);
                remaining = &remaining[n..];
                Ok(n)
            })?;
        }
        transfer.write_function(|chunk| {
            response.lock().unwrap().extend_from_slice(chunk);
            Ok(chunk.len())
        })?;
        transfer.perform().with_context(|| format!("{method} {url} failed"))?;
        drop(transfer);

        let status = easy.response_code().context("reading response status")?;
        let body = response.into_inner().unwrap_or_default();

        if !(200..300).contains(&status) {
            let text = String::from_utf8_lossy(&body);
            bail!("{method} {url} -> HTTP {status}: {text}");
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).with_context(|| format!("parsing response from {method} {url}"))
    }
}
