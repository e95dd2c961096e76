use crate::errors::ProviderError;
use regex::{Regex, RegexBuilder};
use std::time::Duration;

const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];
const RETRYABLE_MARKERS: [&str; 4] = [
    "timeout",
    "rate limit",
    "overloaded",
    "temporarily unavailable",
];

/// Decides whether a failed attempt may be retried on the same provider.
#[derive(Debug, Clone)]
pub struct RetryClassifier {
    markers: Option<Regex>,
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self {
            markers: compile_markers(&[]).ok(),
        }
    }
}

impl RetryClassifier {
    /// Builtin markers plus `extra` message fragments, matched
    /// case-insensitively as plain text.
    pub fn with_markers(extra: &[String]) -> Result<Self, regex::Error> {
        Ok(Self {
            markers: Some(compile_markers(extra)?),
        })
    }

    pub fn is_retryable(&self, err: &ProviderError) -> bool {
        if let Some(status) = err.status {
            if RETRYABLE_STATUS.contains(&status) {
                return true;
            }
        }
        self.markers
            .as_ref()
            .is_some_and(|markers| markers.is_match(&err.message))
    }
}

fn compile_markers(extra: &[String]) -> Result<Regex, regex::Error> {
    let pattern = RETRYABLE_MARKERS
        .iter()
        .map(|marker| regex::escape(marker))
        .chain(
            extra
                .iter()
                .filter(|marker| !marker.is_empty())
                .map(|marker| regex::escape(marker)),
        )
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&pattern).case_insensitive(true).build()
}

/// Linear backoff: `base * (attempt + 1)`.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(u64::from(attempt) + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses_are_retryable() {
        let classifier = RetryClassifier::default();
        for status in [429, 500, 502, 503, 504] {
            assert!(classifier.is_retryable(&ProviderError::with_status(status, "x")));
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!classifier.is_retryable(&ProviderError::with_status(status, "bad input")));
        }
    }

    #[test]
    fn message_markers_ignore_case() {
        let classifier = RetryClassifier::default();
        assert!(classifier.is_retryable(&ProviderError::new("Request TIMEOUT after 30s")));
        assert!(classifier.is_retryable(&ProviderError::new("Rate Limit reached")));
        assert!(classifier.is_retryable(&ProviderError::new("model is overloaded")));
        assert!(classifier.is_retryable(&ProviderError::new(
            "Service Temporarily Unavailable"
        )));
        assert!(!classifier.is_retryable(&ProviderError::new("invalid api key")));
    }

    #[test]
    fn extra_markers_are_literal() {
        let classifier = RetryClassifier::with_markers(&["try again (later)".to_string()]).unwrap();
        assert!(classifier.is_retryable(&ProviderError::new("please TRY AGAIN (later)")));
        assert!(!classifier.is_retryable(&ProviderError::new("try again later")));
    }

    #[test]
    fn backoff_grows_linearly() {
        assert_eq!(backoff_delay(1000, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1000, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(250, 3), Duration::from_millis(1000));
        assert_eq!(backoff_delay(0, 5), Duration::ZERO);
    }
}
