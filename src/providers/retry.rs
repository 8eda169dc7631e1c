use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub(crate) const MAX_ATTEMPTS: usize = 5;
const BASE_DELAY: Duration = Duration::from_secs(2);
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential backoff for rate-limited calls, doubling from 2s up to 60s and
/// never waiting less than the server's `retry-after`.
#[derive(Debug)]
pub(crate) struct Backoff {
    service: &'static str,
    attempt: usize,
    delay: Duration,
    base: Duration,
}

impl Backoff {
    pub(crate) fn new(service: &'static str) -> Self {
        Self::with_base(service, BASE_DELAY)
    }

    pub(crate) fn with_base(service: &'static str, base: Duration) -> Self {
        Self {
            service,
            attempt: 0,
            delay: base,
            base,
        }
    }

    /// Counts one attempt; returns whether another one is allowed after it.
    pub(crate) fn record_attempt(&mut self) -> bool {
        self.attempt += 1;
        self.attempt < MAX_ATTEMPTS
    }

    pub(crate) fn attempt(&self) -> usize {
        self.attempt
    }

    pub(crate) async fn wait(&mut self, retry_after: Option<Duration>) {
        let wait = retry_after.map_or(self.delay, |hint| hint.max(self.delay));
        warn!(
            "{} rate limited; retrying in {:.1}s (attempt {}/{})",
            self.service,
            wait.as_secs_f32(),
            self.attempt,
            MAX_ATTEMPTS
        );
        sleep(wait).await;
        self.delay = self.next_delay();
    }

    fn next_delay(&self) -> Duration {
        self.delay.saturating_mul(2).max(self.base).min(MAX_DELAY)
    }
}

pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        return true;
    }
    let lower = body.to_lowercase();
    ["rate limit", "rate_limit", "too many requests", "overloaded"]
        .iter()
        .any(|needle| lower.contains(needle))
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    value.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn delay_doubles_up_to_cap() {
        let mut backoff = Backoff::new("test");
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(backoff.delay.as_secs());
            backoff.delay = backoff.next_delay();
        }
        assert_eq!(seen, vec![2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn attempts_are_bounded() {
        let mut backoff = Backoff::new("test");
        let allowed = (0..10).take_while(|_| backoff.record_attempt()).count();
        assert_eq!(allowed, MAX_ATTEMPTS - 1);
        assert_eq!(backoff.attempt(), MAX_ATTEMPTS);
    }

    #[test]
    fn detects_rate_limits() {
        assert!(is_rate_limited(StatusCode::TOO_MANY_REQUESTS, ""));
        assert!(is_rate_limited(StatusCode::BAD_REQUEST, "Rate limit reached for gpt-4o"));
        assert!(!is_rate_limited(StatusCode::UNAUTHORIZED, "invalid api key"));
    }

    #[test]
    fn parses_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static(" 7 "));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test]
    async fn wait_honors_longer_retry_after() {
        let mut backoff = Backoff::with_base("test", Duration::from_millis(1));
        backoff.record_attempt();
        let started = std::time::Instant::now();
        backoff.wait(Some(Duration::from_millis(20))).await;
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(backoff.delay, Duration::from_millis(2));
    }
}
