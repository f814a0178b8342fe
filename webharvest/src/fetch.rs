//! Page fetching with retry, backoff, user-agent rotation, and per-host
//! rate limiting.
//!
//! [`PageFetcher`] dispatches each [`Target`] over the static HTTP path or
//! through a caller-supplied browser session, retrying transient failures
//! with exponential backoff. Backoff sleeps race against the cancellation
//! token so a cancelled job stops promptly.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::cancellation::CancellationToken;
use crate::config::FetchConfig;
use crate::errors::{ConfigurationError, HarvestError};
use crate::events::EventSink;
use crate::model::{PageContent, RenderMode, Target};
use crate::session::BrowserSession;

/// A fetch that gave up, with the number of attempts spent.
#[derive(Debug)]
pub struct FetchFailure {
    /// The error from the final attempt.
    pub error: HarvestError,
    /// Total attempts made, including the failed one.
    pub attempts: usize,
}

/// Enforces a minimum interval between requests to the same host.
///
/// Each host gets a slot holding the earliest time its next request may
/// start; callers reserve the slot and sleep until it arrives. Concurrent
/// workers hitting the same host are serialized at `interval` spacing.
#[derive(Debug)]
pub struct HostRateLimiter {
    interval: Duration,
    slots: DashMap<String, Instant>,
}

impl HostRateLimiter {
    /// Creates a limiter with the given minimum per-host interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: DashMap::new(),
        }
    }

    /// Waits until a request to `host` is allowed.
    pub async fn acquire(&self, host: &str) {
        if self.interval.is_zero() {
            return;
        }
        let now = Instant::now();
        let at = {
            let mut slot = self.slots.entry(host.to_string()).or_insert(now);
            let at = (*slot).max(now);
            *slot = at + self.interval;
            at
        };
        let wait = at.saturating_duration_since(now);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Fetches page content for targets, honoring retry and rate-limit policy.
pub struct PageFetcher {
    client: reqwest::Client,
    config: FetchConfig,
    limiter: HostRateLimiter,
    next_agent: AtomicUsize,
    sink: Arc<dyn EventSink>,
}

impl PageFetcher {
    /// Builds a fetcher from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if the HTTP client cannot be built,
    /// e.g. a malformed header name or value.
    pub fn new(config: FetchConfig, sink: Arc<dyn EventSink>) -> Result<Self, ConfigurationError> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ConfigurationError::new(e.to_string()).with_field("headers"))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| ConfigurationError::new(e.to_string()).with_field("headers"))?;
            headers.insert(name, value);
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigurationError::new(format!("failed to build HTTP client: {e}")))?;

        let limiter = HostRateLimiter::new(Duration::from_millis(config.rate_limit_ms));
        Ok(Self {
            client,
            config,
            limiter,
            next_agent: AtomicUsize::new(0),
            sink,
        })
    }

    /// Returns the next user-agent in rotation, or `None` if the list is
    /// empty.
    pub(crate) fn next_user_agent(&self) -> Option<String> {
        if self.config.user_agents.is_empty() {
            return None;
        }
        let idx = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.config.user_agents.len();
        self.config.user_agents.get(idx).cloned()
    }

    /// Fetches a target, retrying transient failures per the retry policy.
    ///
    /// Browser-mode targets require a live session in `session`; the static
    /// path ignores it. On failure the returned [`FetchFailure`] carries the
    /// total attempt count for reporting.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] when the URL is invalid, the job is
    /// cancelled, or all attempts are exhausted.
    pub async fn fetch(
        &self,
        target: &Target,
        session: &mut Option<Box<dyn BrowserSession>>,
        cancel: &CancellationToken,
    ) -> Result<PageContent, FetchFailure> {
        let parsed = Url::parse(&target.url).map_err(|e| FetchFailure {
            error: HarvestError::InvalidUrl {
                url: target.url.clone(),
                message: e.to_string(),
            },
            attempts: 1,
        })?;
        let host = parsed.host_str().unwrap_or_default().to_string();

        let mut attempt = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchFailure {
                    error: HarvestError::Cancelled(cancel.reason_or_default()),
                    attempts: attempt,
                });
            }
            self.limiter.acquire(&host).await;

            attempt += 1;
            let started = Instant::now();
            let result = match target.mode {
                RenderMode::Static => self.fetch_static(&target.url).await,
                RenderMode::Browser => {
                    self.fetch_browser(&target.url, session.as_mut(), cancel)
                        .await
                }
            };
            let elapsed_ms = duration_ms(started.elapsed());

            match result {
                Ok(content) => {
                    self.sink.try_emit(
                        "fetch.attempt",
                        Some(serde_json::json!({
                            "target_id": target.id,
                            "url": target.url,
                            "attempt": attempt,
                            "outcome": "ok",
                            "duration_ms": elapsed_ms,
                        })),
                    );
                    return Ok(content.with_duration_ms(elapsed_ms));
                }
                Err(error) => {
                    let transient = error.is_transient(&self.config.retry);
                    let retrying = transient && attempt <= self.config.retry.max_retries;
                    self.sink.try_emit(
                        "fetch.attempt",
                        Some(serde_json::json!({
                            "target_id": target.id,
                            "url": target.url,
                            "attempt": attempt,
                            "outcome": if retrying { "retry" } else { "failed" },
                            "error": error.to_string(),
                        })),
                    );
                    if !retrying {
                        warn!(url = %target.url, attempts = attempt, error = %error, "fetch failed");
                        return Err(FetchFailure { error, attempts: attempt });
                    }
                    let delay = self.config.retry.delay_for_attempt(attempt - 1);
                    debug!(url = %target.url, attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "retrying fetch");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => {
                            return Err(FetchFailure {
                                error: HarvestError::Cancelled(cancel.reason_or_default()),
                                attempts: attempt,
                            });
                        }
                    }
                }
            }
        }
    }

    async fn fetch_static(&self, url: &str) -> Result<PageContent, HarvestError> {
        let mut request = self.client.get(url);
        if let Some(agent) = self.next_user_agent() {
            request = request.header(reqwest::header::USER_AGENT, agent);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                HarvestError::NavigationTimeout {
                    url: url.to_string(),
                    timeout_ms: u64::try_from(self.config.timeout().as_millis()).unwrap_or(u64::MAX),
                }
            } else {
                HarvestError::Fetch {
                    url: url.to_string(),
                    status: None,
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(HarvestError::Fetch {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: format!("server returned {status}"),
            });
        }
        let body = response.text().await.map_err(|e| HarvestError::Fetch {
            url: url.to_string(),
            status: Some(status.as_u16()),
            message: format!("failed to read body: {e}"),
        })?;
        Ok(PageContent::new(body, final_url).with_status(status.as_u16()))
    }

    async fn fetch_browser(
        &self,
        url: &str,
        session: Option<&mut Box<dyn BrowserSession>>,
        cancel: &CancellationToken,
    ) -> Result<PageContent, HarvestError> {
        let Some(session) = session else {
            return Err(HarvestError::Navigation {
                url: url.to_string(),
                message: "no browser session available".to_string(),
            });
        };
        tokio::select! {
            result = session.navigate(url, self.config.timeout()) => result?,
            () = cancel.cancelled() => {
                return Err(HarvestError::Cancelled(cancel.reason_or_default()));
            }
        }
        let markup = session.current_content().await;
        let final_url = session
            .current_url()
            .await
            .unwrap_or_else(|| url.to_string());
        Ok(PageContent::new(markup, final_url))
    }
}

fn duration_ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoOpEventSink;
    use crate::testing::{nav_script, ScriptedSession};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(config: FetchConfig) -> PageFetcher {
        PageFetcher::new(config, Arc::new(NoOpEventSink)).unwrap()
    }

    fn fast_retry() -> FetchConfig {
        let mut config = FetchConfig::new().with_rate_limit_ms(0);
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;
        config
    }

    #[tokio::test]
    async fn test_static_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hello</html>"))
            .mount(&server)
            .await;

        let fetcher = fetcher(fast_retry());
        let target = Target::static_page("t1", format!("{}/page", server.uri()));
        let cancel = CancellationToken::new();
        let mut session = None;

        let content = fetcher.fetch(&target, &mut session, &cancel).await.unwrap();
        assert_eq!(content.markup, "<html>hello</html>");
        assert_eq!(content.status_code, Some(200));
    }

    #[tokio::test]
    async fn test_retries_transient_status_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let fetcher = fetcher(fast_retry());
        let target = Target::static_page("t1", format!("{}/flaky", server.uri()));
        let cancel = CancellationToken::new();
        let mut session = None;

        let content = fetcher.fetch(&target, &mut session, &cancel).await.unwrap();
        assert_eq!(content.markup, "recovered");
    }

    #[tokio::test]
    async fn test_permanent_status_does_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher(fast_retry());
        let target = Target::static_page("t1", format!("{}/gone", server.uri()));
        let cancel = CancellationToken::new();
        let mut session = None;

        let failure = fetcher
            .fetch(&target, &mut session, &cancel)
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
        match failure.error {
            HarvestError::Fetch { status, .. } => assert_eq!(status, Some(404)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_exhausts_retries_on_persistent_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut config = fast_retry();
        config.retry.max_retries = 2;
        let fetcher = fetcher(config);
        let target = Target::static_page("t1", format!("{}/down", server.uri()));
        let cancel = CancellationToken::new();
        let mut session = None;

        let failure = fetcher
            .fetch(&target, &mut session, &cancel)
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 3);
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_attempt() {
        let fetcher = fetcher(fast_retry());
        let target = Target::static_page("t1", "not a url");
        let cancel = CancellationToken::new();
        let mut session = None;

        let failure = fetcher
            .fetch(&target, &mut session, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, HarvestError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_browser_mode_without_session_fails() {
        let fetcher = fetcher(fast_retry());
        let target = Target::new("t1", "https://example.com");
        let cancel = CancellationToken::new();
        let mut session = None;

        let failure = fetcher
            .fetch(&target, &mut session, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, HarvestError::Navigation { .. }));
    }

    #[tokio::test]
    async fn test_browser_mode_retries_navigation_failure() {
        let script = nav_script(vec![Err(HarvestError::Navigation {
            url: "https://example.com".to_string(),
            message: "net::ERR_CONNECTION_RESET".to_string(),
        })]);
        let mut session: Option<Box<dyn BrowserSession>> = Some(Box::new(
            ScriptedSession::new("<html>rendered</html>").with_script(script),
        ));

        let fetcher = fetcher(fast_retry());
        let target = Target::new("t1", "https://example.com");
        let cancel = CancellationToken::new();

        let content = fetcher.fetch(&target, &mut session, &cancel).await.unwrap();
        assert_eq!(content.markup, "<html>rendered</html>");
    }

    #[tokio::test]
    async fn test_browser_fetch_reports_landed_url() {
        let mut session: Option<Box<dyn BrowserSession>> = Some(Box::new(
            ScriptedSession::new("<html>moved</html>")
                .with_redirect_to("https://example.com/final"),
        ));

        let fetcher = fetcher(fast_retry());
        let target = Target::new("t1", "https://example.com/old");
        let cancel = CancellationToken::new();

        let content = fetcher.fetch(&target, &mut session, &cancel).await.unwrap();
        assert_eq!(content.final_url, "https://example.com/final");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fetcher = fetcher(fast_retry());
        let target = Target::static_page("t1", "https://example.com");
        let cancel = CancellationToken::new();
        cancel.cancel("shutting down");
        let mut session = None;

        let failure = fetcher
            .fetch(&target, &mut session, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, HarvestError::Cancelled(_)));
        assert_eq!(failure.attempts, 0);
    }

    #[tokio::test]
    async fn test_user_agent_rotation_cycles() {
        let config = fast_retry().with_user_agents(vec![
            "agent-a".to_string(),
            "agent-b".to_string(),
        ]);
        let fetcher = fetcher(config);

        assert_eq!(fetcher.next_user_agent().as_deref(), Some("agent-a"));
        assert_eq!(fetcher.next_user_agent().as_deref(), Some("agent-b"));
        assert_eq!(fetcher.next_user_agent().as_deref(), Some("agent-a"));
    }

    #[tokio::test]
    async fn test_empty_user_agent_list() {
        let fetcher = fetcher(fast_retry().with_user_agents(Vec::new()));
        assert_eq!(fetcher.next_user_agent(), None);
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_same_host() {
        let limiter = HostRateLimiter::new(Duration::from_millis(40));
        let start = Instant::now();
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_rate_limiter_independent_hosts() {
        let limiter = HostRateLimiter::new(Duration::from_millis(200));
        let start = Instant::now();
        limiter.acquire("a.example.com").await;
        limiter.acquire("b.example.com").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let limiter = HostRateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..50 {
            limiter.acquire("example.com").await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
