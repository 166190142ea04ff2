//! Streaming download: reports progress, aborts fast on cancellation, reuses
//! stored cookies/user-agent for the target domain when present.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::bypass::CookieStore;
use crate::cancel::CancelToken;

use super::FetcherError;

pub type ProgressCb = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;
pub type StatusCb = Arc<dyn Fn(&str) + Send + Sync>;

pub struct DownloadOutcome {
    pub bytes: Vec<u8>,
}

/// Streams `url` to memory, calling `progress_cb(bytes_received, content_length)`
/// as data arrives and aborting as soon as `cancel` is observed set.
#[allow(clippy::too_many_arguments)]
pub fn download(
    url: &str,
    expected_size: Option<u64>,
    progress_cb: Option<ProgressCb>,
    cancel: CancelToken,
    cookies: &CookieStore,
    status_cb: Option<StatusCb>,
    referer: Option<&str>,
    resolve: &[String],
) -> Result<DownloadOutcome, FetcherError> {
    if let Some(cb) = &status_cb {
        cb("Fetching...");
    }

    let received = Arc::new(AtomicU64::new(0));
    let aborted = Arc::new(AtomicBool::new(false));
    let body = Arc::new(std::sync::Mutex::new(Vec::new()));

    let received_cb = Arc::clone(&received);
    let aborted_cb = Arc::clone(&aborted);
    let body_cb = Arc::clone(&body);
    let cancel_cb = cancel.clone();
    let progress = progress_cb.clone();

    let mut easy = curl::easy::Easy::new();
    easy.url(url)
        .map_err(|e| FetcherError::Transport(e.to_string()))?;
    easy.follow_location(true)
        .map_err(|e| FetcherError::Transport(e.to_string()))?;
    easy.connect_timeout(Duration::from_secs(30))
        .map_err(|e| FetcherError::Transport(e.to_string()))?;
    // No global request timeout: streaming downloads may run arbitrarily
    // long as long as they keep making progress (§5).
    easy.low_speed_limit(1)
        .map_err(|e| FetcherError::Transport(e.to_string()))?;
    easy.low_speed_time(Duration::from_secs(300))
        .map_err(|e| FetcherError::Transport(e.to_string()))?;

    if let Some(r) = referer {
        easy.referer(r).map_err(|e| FetcherError::Transport(e.to_string()))?;
    }

    if !resolve.is_empty() {
        let mut list = curl::easy::List::new();
        for entry in resolve {
            list.append(entry).map_err(|e| FetcherError::Transport(e.to_string()))?;
        }
        easy.resolve(list).map_err(|e| FetcherError::Transport(e.to_string()))?;
    }

    if let Some(domain) = crate::bypass::base_domain(url) {
        if let Some((stored, ua)) = cookies.get(&domain) {
            if let Some(ua) = ua {
                easy.useragent(&ua)
                    .map_err(|e| FetcherError::Transport(e.to_string()))?;
            }
            if !stored.is_empty() {
                let header = stored
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                easy.cookie(&header)
                    .map_err(|e| FetcherError::Transport(e.to_string()))?;
            }
        }
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(move |data| {
                if cancel_cb.is_cancelled() {
                    aborted_cb.store(true, Ordering::SeqCst);
                    return Ok(0);
                }
                body_cb.lock().unwrap().extend_from_slice(data);
                let now = received_cb.fetch_add(data.len() as u64, Ordering::SeqCst) + data.len() as u64;
                if let Some(cb) = &progress {
                    cb(now, expected_size);
                }
                Ok(data.len())
            })
            .map_err(|e| FetcherError::Transport(e.to_string()))?;
        let perform = transfer.perform();
        if aborted.load(Ordering::SeqCst) {
            return Err(FetcherError::Cancelled);
        }
        perform.map_err(|e| FetcherError::Transport(e.to_string()))?;
    }

    let code = easy
        .response_code()
        .map_err(|e| FetcherError::Transport(e.to_string()))?;
    if !(200..300).contains(&code) {
        return Err(FetcherError::Http(code));
    }

    let bytes = Arc::try_unwrap(body)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default();

    if bytes.len() < super::MIN_VALID_DOWNLOAD_BYTES as usize {
        return Err(FetcherError::ShortBody {
            expected_min: super::MIN_VALID_DOWNLOAD_BYTES,
            received: bytes.len() as u64,
        });
    }

    if let Some(cb) = &status_cb {
        cb("Download complete");
    }

    Ok(DownloadOutcome { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_body_produces_short_body_error_shape() {
        let err = FetcherError::ShortBody {
            expected_min: super::super::MIN_VALID_DOWNLOAD_BYTES,
            received: 100,
        };
        assert_eq!(
            err.to_string(),
            format!(
                "short body: expected at least {} bytes, got 100",
                super::super::MIN_VALID_DOWNLOAD_BYTES
            )
        );
    }
}
