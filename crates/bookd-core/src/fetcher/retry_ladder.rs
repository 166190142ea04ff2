//! `html_get`'s bespoke linear retry ladder: `sleep = DEFAULT_SLEEP * attempt`,
//! up to `MAX_RETRY` attempts. Deliberately does not share
//! `retry::run_with_retry` (that ladder is exponential; this one is linear
//! per §4.4).

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use super::{FetchContext, FetcherError};

pub const MAX_RETRY: u32 = 10;
pub const DEFAULT_SLEEP: Duration = Duration::from_secs(2);

/// Fetches `url` as text. If `use_bypasser`, delegates straight to the
/// Bypass Gateway. Otherwise performs a plain GET with the linear retry
/// ladder: 404 returns empty immediately; 403 switches into bypass mode for
/// the remaining budget; network errors retry after re-applying the
/// selector's `rewrite(url)` so mirror/DNS rotations mid-retry take effect.
pub async fn html_get(
    url: &str,
    use_bypasser: bool,
    ctx: &FetchContext<'_>,
) -> Result<String, FetcherError> {
    if use_bypasser {
        return ctx
            .bypass
            .get(url, ctx.cancel.clone())
            .await
            .map_err(FetcherError::from);
    }

    let mut attempt = 1u32;
    let mut current_url = ctx.selector.rewrite(url);
    let mut bypassing = false;

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(FetcherError::Cancelled);
        }

        if bypassing {
            return ctx
                .bypass
                .get(&current_url, ctx.cancel.clone())
                .await
                .map_err(FetcherError::from);
        }

        let resolve = super::resolve_entries(ctx.dns, &current_url).await;
        let headers = ctx.custom_headers.clone();
        let fetch_url = current_url.clone();
        let result = tokio::task::spawn_blocking(move || plain_get(&fetch_url, &headers, &resolve))
            .await
            .map_err(|e| FetcherError::Transport(e.to_string()))?;

        match result {
            Ok(body) => return Ok(body),
            Err(FetcherError::Http(404)) => {
                debug!(url = %current_url, "html_get: 404, returning empty");
                return Ok(String::new());
            }
            Err(FetcherError::Http(403)) => {
                warn!(url = %current_url, "html_get: 403, switching to bypass for remaining budget");
                bypassing = true;
                continue;
            }
            Err(e) => {
                if attempt >= MAX_RETRY {
                    return Err(e);
                }
                warn!(url = %current_url, attempt, error = %e, "html_get: retrying");
                let delay = DEFAULT_SLEEP * attempt;
                if !ctx.cancel.sleep_cancellable(delay).await {
                    return Err(FetcherError::Cancelled);
                }
                attempt += 1;
                current_url = ctx.selector.rewrite(url);
            }
        }
    }
}

fn plain_get(
    url: &str,
    custom_headers: &HashMap<String, String>,
    resolve: &[String],
) -> Result<String, FetcherError> {
    let mut body = Vec::new();
    let mut easy = curl::easy::Easy::new();
    easy.url(url)
        .map_err(|e| FetcherError::Transport(e.to_string()))?;
    easy.follow_location(true)
        .map_err(|e| FetcherError::Transport(e.to_string()))?;
    easy.connect_timeout(Duration::from_secs(15))
        .map_err(|e| FetcherError::Transport(e.to_string()))?;
    easy.timeout(Duration::from_secs(60))
        .map_err(|e| FetcherError::Transport(e.to_string()))?;

    if !resolve.is_empty() {
        let mut resolve_list = curl::easy::List::new();
        for entry in resolve {
            resolve_list.append(entry).map_err(|e| FetcherError::Transport(e.to_string()))?;
        }
        easy.resolve(resolve_list).map_err(|e| FetcherError::Transport(e.to_string()))?;
    }

    let mut list = curl::easy::List::new();
    for (k, v) in custom_headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(|e| FetcherError::Transport(e.to_string()))?;
    }
    if !custom_headers.is_empty() {
        easy.http_headers(list)
            .map_err(|e| FetcherError::Transport(e.to_string()))?;
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(|e| FetcherError::Transport(e.to_string()))?;
        transfer
            .perform()
            .map_err(|e| FetcherError::Transport(e.to_string()))?;
    }

    let code = easy
        .response_code()
        .map_err(|e| FetcherError::Transport(e.to_string()))?;
    if !(200..300).contains(&code) {
        return Err(FetcherError::Http(code));
    }

    String::from_utf8(body).map_err(|e| FetcherError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sleep_and_max_retry_constants() {
        assert_eq!(DEFAULT_SLEEP, Duration::from_secs(2));
        assert_eq!(MAX_RETRY, 10);
    }

    #[test]
    fn plain_get_rejects_unresolvable_host_as_transport_error() {
        let err = plain_get(
            "http://this-host-does-not-exist.invalid.example/",
            &HashMap::new(),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, FetcherError::Transport(_)));
    }
}
