//! Fetch error type shared by the fetcher and the bypass gateway's external backend.

use std::fmt;

#[derive(Debug)]
pub enum FetchError {
    /// Curl reported an error (timeout, connection, etc.).
    Curl(curl::Error),
    /// HTTP response had a non-2xx status.
    Http(u32),
    /// Download completed but the body was smaller than the minimum valid
    /// size (§4.6 step 3: files under 10 KiB are treated as error pages).
    ShortBody { expected_min: u64, received: u64 },
    /// The caller's cancellation flag was observed.
    Cancelled,
    /// Local I/O failure while streaming to a temp file.
    Io(std::io::Error),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Curl(e) => write!(f, "{}", e),
            FetchError::Http(code) => write!(f, "HTTP {}", code),
            FetchError::ShortBody {
                expected_min,
                received,
            } => write!(
                f,
                "short download: expected at least {} bytes, got {}",
                expected_min, received
            ),
            FetchError::Cancelled => write!(f, "cancelled"),
            FetchError::Io(e) => write!(f, "io: {}", e),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Curl(e) => Some(e),
            FetchError::Io(e) => Some(e),
            FetchError::Http(_) | FetchError::ShortBody { .. } | FetchError::Cancelled => None,
        }
    }
}

impl From<curl::Error> for FetchError {
    fn from(e: curl::Error) -> Self {
        FetchError::Curl(e)
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Io(e)
    }
}
