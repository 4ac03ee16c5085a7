use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::constants::MIN_REQUEST_INTERVAL_MS;
use crate::error::AppError;

/// Typed failure from the upstream transport.
///
/// `status` is `None` for the connection class (DNS, refused, timeout) —
/// exactly the failures worth retrying alongside 429.
#[derive(Debug, Clone)]
pub struct FetchError {
    pub status: Option<u16>,
    pub message: String,
}

impl FetchError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Rate-limited or connection-class failures are worth retrying.
    /// Other 4xx/5xx are not.
    pub fn is_retriable(&self) -> bool {
        matches!(self.status, None | Some(429))
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "upstream returned {}: {}", status, self.message),
            None => write!(f, "upstream unreachable: {}", self.message),
        }
    }
}

impl std::error::Error for FetchError {}

/// The one thing the core needs from the outside world: an HTTP GET with
/// query parameters and a timeout, returning a parsed JSON body or a typed
/// failure. Tests substitute a scripted implementation.
#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get_json(
        &self,
        url: &str,
        params: &[(String, String)],
        timeout: Duration,
    ) -> Result<Value, FetchError>;
}

/// Real transport backed by reqwest.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create the HTTP client. The optional API key is attached to every
    /// request as the upstream's demo-key header.
    pub fn new(api_key: Option<String>) -> Result<Self, AppError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = reqwest::header::HeaderValue::from_str(&key)
                .map_err(|e| AppError::Config(format!("Invalid API key header: {}", e)))?;
            headers.insert("x-cg-demo-api-key", value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpGet for ReqwestTransport {
    async fn get_json(
        &self,
        url: &str,
        params: &[(String, String)],
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::new(None, format!("request timed out: {}", e))
                } else {
                    FetchError::new(e.status().map(|s| s.as_u16()), e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Err(FetchError::new(Some(status.as_u16()), preview));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::new(None, format!("failed to parse response body: {}", e)))
    }
}

/// Serializes all upstream calls: at most one outstanding request, minimum
/// spacing between consecutive calls, callers served in arrival order.
///
/// The fair tokio mutex is the queue — it is held across the request itself,
/// so spacing and single-outstanding-call fall out of the same lock.
pub struct ThrottledTransport {
    inner: Arc<dyn HttpGet>,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl ThrottledTransport {
    pub fn new(inner: Arc<dyn HttpGet>) -> Self {
        Self {
            inner,
            min_interval: Duration::from_millis(MIN_REQUEST_INTERVAL_MS),
            last_call: Mutex::new(None),
        }
    }

    pub async fn fetch(
        &self,
        url: &str,
        params: &[(String, String)],
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let mut last_call = self.last_call.lock().await;

        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "throttling upstream call");
                sleep(wait).await;
            }
        }
        *last_call = Some(Instant::now());

        // Lock is held until the request settles: no concurrency above one
        // outstanding request, failures pass through unmodified.
        self.inner.get_json(url, params, timeout).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted transport for tests: pops queued responses in order, then
    /// repeats the default response. Records every call it serves.
    pub struct MockTransport {
        script: Mutex<VecDeque<Result<Value, FetchError>>>,
        default_response: Mutex<Result<Value, FetchError>>,
        calls: Mutex<Vec<(String, Vec<(String, String)>, Instant)>>,
        delay: Option<Duration>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                default_response: Mutex::new(Ok(Value::Null)),
                calls: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub async fn push(&self, response: Result<Value, FetchError>) {
            self.script.lock().await.push_back(response);
        }

        pub async fn set_default(&self, response: Result<Value, FetchError>) {
            *self.default_response.lock().await = response;
        }

        pub async fn call_count(&self) -> usize {
            self.calls.lock().await.len()
        }

        pub async fn calls(&self) -> Vec<(String, Vec<(String, String)>, Instant)> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl HttpGet for MockTransport {
        async fn get_json(
            &self,
            url: &str,
            params: &[(String, String)],
            _timeout: Duration,
        ) -> Result<Value, FetchError> {
            self.calls
                .lock()
                .await
                .push((url.to_string(), params.to_vec(), Instant::now()));
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            match self.script.lock().await.pop_front() {
                Some(response) => response,
                None => self.default_response.lock().await.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockTransport;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_calls_are_spaced_by_min_interval() {
        let mock = Arc::new(MockTransport::new());
        let throttled = ThrottledTransport::new(mock.clone());

        for _ in 0..3 {
            throttled
                .fetch("http://test/a", &[], Duration::from_secs(1))
                .await
                .unwrap();
        }

        let calls = mock.calls().await;
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            let gap = pair[1].2 - pair[0].2;
            assert!(
                gap >= Duration::from_millis(MIN_REQUEST_INTERVAL_MS),
                "calls spaced only {:?} apart",
                gap
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_serialize() {
        let mock = Arc::new(MockTransport::new().with_delay(Duration::from_millis(500)));
        let throttled = Arc::new(ThrottledTransport::new(mock.clone()));

        let a = {
            let t = throttled.clone();
            tokio::spawn(async move { t.fetch("http://test/1", &[], Duration::from_secs(1)).await })
        };
        let b = {
            let t = throttled.clone();
            tokio::spawn(async move { t.fetch("http://test/2", &[], Duration::from_secs(1)).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let calls = mock.calls().await;
        assert_eq!(calls.len(), 2);
        let gap = calls[1].2 - calls[0].2;
        assert!(gap >= Duration::from_millis(MIN_REQUEST_INTERVAL_MS));
    }

    #[tokio::test]
    async fn test_failures_pass_through_unmodified() {
        let mock = Arc::new(MockTransport::new());
        mock.push(Err(FetchError::new(Some(503), "bad gateway"))).await;
        let throttled = ThrottledTransport::new(mock);

        let err = throttled
            .fetch("http://test/a", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(503));
        assert_eq!(err.message, "bad gateway");
    }

    #[test]
    fn test_retriable_classification() {
        assert!(FetchError::new(Some(429), "rate limited").is_retriable());
        assert!(FetchError::new(None, "connection refused").is_retriable());
        assert!(!FetchError::new(Some(404), "not found").is_retriable());
        assert!(!FetchError::new(Some(500), "server error").is_retriable());
    }
}
