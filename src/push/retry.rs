//! Bounded retry with jitter and a dead-letter path for push sends
//!
//! `RetryingProvider` wraps any `PushProvider`. Only failures where nothing
//! was delivered are retried; per-token rejections inside a batch are data
//! and pass through untouched. An attempt that hits its deadline is not
//! retried, since part of it may already have reached devices. Exhausted
//! retries and timed-out attempts are handed to a `DeadLetterSink` and the
//! error is returned to the caller.

use async_trait::async_trait;
use rand::Rng;
use sqlx::SqlitePool;
use std::env;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use super::provider::{BatchResponse, PushProvider};
use super::{PushError, PushMessage};
use crate::common::{generate_dead_letter_id, now_rfc3339};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(5000),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_attempts = env::var("PUSH_RETRY_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .map(|v| v.max(1))
            .unwrap_or(defaults.max_attempts);
        let base_delay = env::var("PUSH_RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.base_delay);
        let max_delay = env::var("PUSH_RETRY_MAX_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_delay);
        let attempt_timeout = env::var("PUSH_ATTEMPT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.attempt_timeout);

        Self {
            max_attempts,
            base_delay,
            max_delay,
            attempt_timeout,
        }
    }

    /// Upper bound of the wait after failed attempt `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, capped at `max_delay`
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Longest a fully retried call can take: every attempt running to its
    /// deadline plus the largest wait between each pair of attempts
    pub fn worst_case_duration(&self) -> Duration {
        let waits: Duration = (1..self.max_attempts)
            .map(|attempt| self.backoff_ceiling(attempt))
            .sum();
        self.attempt_timeout.saturating_mul(self.max_attempts) + waits
    }

    /// Full jitter: uniform in `[0, backoff_ceiling(attempt)]`
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let ceiling_ms = self.backoff_ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }
}

/// A send that exhausted its retries
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub tokens: Vec<String>,
    pub message: PushMessage,
    pub attempts: u32,
    pub last_error: String,
}

/// Destination for sends that could not be completed.
///
/// Recording is best effort; sinks log their own failures so the underlying
/// push error is what reaches the caller.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: DeadLetter);
}

/// Dead letters persisted to the `push_dead_letters` table
pub struct SqliteDeadLetterSink {
    db: SqlitePool,
}

impl SqliteDeadLetterSink {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeadLetterSink for SqliteDeadLetterSink {
    async fn record(&self, letter: DeadLetter) {
        let id = generate_dead_letter_id();
        let tokens = serde_json::to_string(&letter.tokens).unwrap_or_else(|_| "[]".to_string());
        let message = serde_json::to_string(&letter.message).unwrap_or_else(|_| "{}".to_string());

        let result = sqlx::query(
            "INSERT INTO push_dead_letters (id, tokens, message, attempts, last_error, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&tokens)
        .bind(&message)
        .bind(letter.attempts as i64)
        .bind(&letter.last_error)
        .bind(now_rfc3339())
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => info!(
                dead_letter_id = %id,
                tokens = letter.tokens.len(),
                attempts = letter.attempts,
                "Recorded push dead letter"
            ),
            Err(e) => error!(error = %e, "Failed to record push dead letter"),
        }
    }
}

pub struct RetryingProvider {
    inner: Arc<dyn PushProvider>,
    policy: RetryPolicy,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl RetryingProvider {
    pub fn new(
        inner: Arc<dyn PushProvider>,
        policy: RetryPolicy,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            inner,
            policy,
            dead_letters,
        }
    }

    async fn dead_letter(
        &self,
        tokens: &[String],
        message: &PushMessage,
        attempts: u32,
        err: &PushError,
    ) {
        self.dead_letters
            .record(DeadLetter {
                tokens: tokens.to_vec(),
                message: message.clone(),
                attempts,
                last_error: err.to_string(),
            })
            .await;
    }

    async fn with_retry<T, F, Fut>(
        &self,
        tokens: &[String],
        message: &PushMessage,
        mut op: F,
    ) -> Result<T, PushError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PushError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = match timeout(self.policy.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(PushError::Timeout(self.policy.attempt_timeout)),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if let PushError::Timeout(_) = err {
                warn!(
                    provider = self.inner.name(),
                    attempt = attempt,
                    tokens = tokens.len(),
                    "Push attempt timed out; delivery unknown, not retrying"
                );
                self.dead_letter(tokens, message, attempt, &err).await;
                return Err(err);
            }

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt >= self.policy.max_attempts {
                warn!(
                    provider = self.inner.name(),
                    attempts = attempt,
                    error = %err,
                    "Push retries exhausted"
                );
                self.dead_letter(tokens, message, attempt, &err).await;
                return Err(err);
            }

            let delay = self.policy.jittered_delay(attempt);
            warn!(
                provider = self.inner.name(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Push attempt failed, retrying"
            );
            sleep(delay).await;
        }
    }
}

#[async_trait]
impl PushProvider for RetryingProvider {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<String, PushError> {
        let tokens = [token.to_string()];
        self.with_retry(&tokens, message, || self.inner.send(token, message))
            .await
    }

    async fn send_each(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<BatchResponse, PushError> {
        self.with_retry(tokens, message, || self.inner.send_each(tokens, message))
            .await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::migrations::test_support::setup_test_db;
    use crate::push::testing::{MemorySink, RecordingProvider};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_backoff_ceiling_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(1000),
            attempt_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_ceiling(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_ceiling(4), Duration::from_millis(1000));
        assert_eq!(policy.backoff_ceiling(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_ceiling() {
        let policy = RetryPolicy::default();
        for attempt in 1..6 {
            for _ in 0..50 {
                assert!(policy.jittered_delay(attempt) <= policy.backoff_ceiling(attempt));
            }
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let inner = Arc::new(
            RecordingProvider::new()
                .with_errors(vec![PushError::Transport("connection reset".to_string())]),
        );
        let sink = Arc::new(MemorySink::default());
        let provider = RetryingProvider::new(inner.clone(), fast_policy(3), sink.clone());
        let message = PushMessage::new("Hi", "Yo", None);

        let batch = provider
            .send_each(&tokens(&["tokA", "tokB"]), &message)
            .await
            .unwrap();

        assert_eq!(batch.success_count, 2);
        assert_eq!(inner.calls().len(), 2);
        assert!(sink.letters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_per_token_failures_are_not_retried() {
        let inner = Arc::new(RecordingProvider::new().with_failing_token("tokB", "UNREGISTERED"));
        let sink = Arc::new(MemorySink::default());
        let provider = RetryingProvider::new(inner.clone(), fast_policy(3), sink.clone());
        let message = PushMessage::new("Hi", "Yo", None);

        let batch = provider
            .send_each(&tokens(&["tokA", "tokB"]), &message)
            .await
            .unwrap();

        assert_eq!(batch.failure_count, 1);
        assert_eq!(inner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_dead_lettered() {
        let inner = Arc::new(RecordingProvider::new().with_errors(vec![
            PushError::Transport("down".to_string()),
            PushError::Transport("down".to_string()),
            PushError::Transport("still down".to_string()),
        ]));
        let sink = Arc::new(MemorySink::default());
        let provider = RetryingProvider::new(inner.clone(), fast_policy(3), sink.clone());
        let message = PushMessage::new("Hi", "Yo", None);

        let err = provider
            .send_each(&tokens(&["tokA"]), &message)
            .await
            .unwrap_err();

        assert!(matches!(err, PushError::Transport(ref m) if m == "still down"));
        assert_eq!(inner.calls().len(), 3);
        let letters = sink.letters.lock().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].tokens, vec!["tokA".to_string()]);
        assert_eq!(letters[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let inner = Arc::new(
            RecordingProvider::new()
                .with_errors(vec![PushError::MalformedBatch("too big".to_string())]),
        );
        let sink = Arc::new(MemorySink::default());
        let provider = RetryingProvider::new(inner.clone(), fast_policy(3), sink.clone());
        let message = PushMessage::new("Hi", "Yo", None);

        let err = provider
            .send_each(&tokens(&["tokA"]), &message)
            .await
            .unwrap_err();

        assert!(matches!(err, PushError::MalformedBatch(_)));
        assert_eq!(inner.calls().len(), 1);
        assert!(sink.letters.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_late_acknowledgement_is_not_sent_twice() {
        // provider records the send, then answers after the attempt deadline
        let inner = Arc::new(RecordingProvider::new().with_delay(Duration::from_secs(5)));
        let sink = Arc::new(MemorySink::default());
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(50),
            ..fast_policy(3)
        };
        let provider = RetryingProvider::new(inner.clone(), policy, sink.clone());
        let message = PushMessage::new("Hi", "Yo", None);

        let err = provider
            .send_each(&tokens(&["tokA", "tokB"]), &message)
            .await
            .unwrap_err();

        assert!(matches!(err, PushError::Timeout(_)));
        assert_eq!(inner.calls(), vec![tokens(&["tokA", "tokB"])]);
        let letters = sink.letters.lock().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_single_send_timeout_is_not_retried() {
        let inner = Arc::new(RecordingProvider::new().with_delay(Duration::from_secs(5)));
        let sink = Arc::new(MemorySink::default());
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(20),
            ..fast_policy(2)
        };
        let provider = RetryingProvider::new(inner.clone(), policy, sink.clone());
        let message = PushMessage::new("Hi", "Yo", None);

        let err = provider.send("tokA", &message).await.unwrap_err();

        assert!(matches!(err, PushError::Timeout(_)));
        assert_eq!(inner.calls().len(), 1);
        assert_eq!(sink.letters.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_worst_case_duration_covers_every_attempt() {
        let policy = RetryPolicy::default();
        // 3 x 10s plus waits of 200ms and 400ms
        assert_eq!(policy.worst_case_duration(), Duration::from_millis(30_600));

        let single = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert_eq!(single.worst_case_duration(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_sqlite_sink_persists_letter() {
        let pool = setup_test_db().await;
        let sink = SqliteDeadLetterSink::new(pool.clone());

        sink.record(DeadLetter {
            tokens: tokens(&["tokA", "tokB"]),
            message: PushMessage::new("Hi", "Yo", None),
            attempts: 3,
            last_error: "push provider unreachable: down".to_string(),
        })
        .await;

        let (id, stored_tokens, attempts): (String, String, i64) =
            sqlx::query_as("SELECT id, tokens, attempts FROM push_dead_letters")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(id.starts_with("Q_"));
        assert_eq!(stored_tokens, r#"["tokA","tokB"]"#);
        assert_eq!(attempts, 3);
    }
}
