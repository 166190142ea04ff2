//! Retry loop: run a closure until success or policy says stop.
//!
//! Used by the bypass gateway's external backend (exponential backoff, §4.3).
//! The fetcher's `html_get`/`download` ladder is linear per §4.4 and
//! implements its own loop rather than sharing this one.

use super::classify;
use super::error::FetchError;
use super::policy::{RetryDecision, RetryPolicy};

pub fn run_with_retry<F, T>(policy: &RetryPolicy, mut f: F) -> Result<T, FetchError>
where
    F: FnMut() -> Result<T, FetchError>,
{
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        std::thread::sleep(d);
                        attempt += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_value_on_eventual_success() {
        let policy = RetryPolicy::default();
        let mut attempts = 0u32;
        let result = run_with_retry(&policy, || {
            attempts += 1;
            if attempts < 3 {
                Err(FetchError::Http(503))
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_when_policy_says_no_retry() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let result: Result<(), FetchError> = run_with_retry(&policy, || Err(FetchError::Cancelled));
        assert!(result.is_err());
    }
}
