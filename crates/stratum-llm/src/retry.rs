use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use stratum_core::chat::{ChatMessage, ChatOptions, ChatResponse};
use stratum_core::errors::GatewayError;

use crate::gateway::{ChatGateway, GatewayStream};

/// Retry policy for transient gateway failures.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    /// Extra multiplier applied to rate-limit delays.
    pub rate_limit_backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            rate_limit_backoff_factor: 2.0,
        }
    }
}

/// Wraps a gateway with capped exponential backoff on retryable error
/// classes. Rate-limit responses back off longer and honor `retry_after`
/// hints. Fatal errors pass through untouched. Streams retry only the
/// establishing call; once chunks flow, the stream is committed.
pub struct RetryingGateway<G: ChatGateway> {
    inner: G,
    config: RetryConfig,
    total_retries: AtomicU64,
}

impl<G: ChatGateway> RetryingGateway<G> {
    pub fn new(inner: G, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: G) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// Delay for a retry attempt: server hint, else exponential backoff
    /// with jitter, scaled up for rate limits.
    fn retry_delay(&self, attempt: u32, error: &GatewayError) -> Duration {
        if let Some(hint) = error.suggested_delay() {
            return hint.min(self.config.max_delay);
        }

        let mut exp = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        if error.is_rate_limit() {
            exp *= self.config.rate_limit_backoff_factor;
        }
        let capped = exp.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = (random_u64() % (jitter_range as u64 * 2 + 1)) as f64 - jitter_range;
        Duration::from_millis((capped + jitter).max(50.0) as u64)
    }

    async fn run_with_retry<T, F, Fut>(&self, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let mut last_error: Option<GatewayError> = None;

        for attempt in 0..=self.config.max_retries {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !e.is_retryable() || attempt == self.config.max_retries {
                        return Err(e);
                    }

                    let delay = self.retry_delay(attempt, &e);
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        channel = self.inner.name(),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after gateway error"
                    );

                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GatewayError::NetworkError("max retries exceeded".into())))
    }
}

/// Simple non-cryptographic random u64 using thread-local xorshift state.
fn random_u64() -> u64 {
    use std::cell::Cell;
    use std::time::SystemTime;

    thread_local! {
        static STATE: Cell<u64> = Cell::new(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1
        );
    }

    STATE.with(|s| {
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        s.set(x);
        x
    })
}

#[async_trait]
impl<G: ChatGateway> ChatGateway for RetryingGateway<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, GatewayError> {
        self.run_with_retry(|| self.inner.chat_completion(messages, options))
            .await
    }

    async fn chat_completion_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<GatewayStream, GatewayError> {
        self.run_with_retry(|| self.inner.chat_completion_stream(messages, options))
            .await
    }
}
