//! Push dispatcher: envelope construction and bounded provider calls

use serde_json::{Map, Value};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::fcm::FcmConfig;
use super::provider::{BatchResponse, PushProvider};
use super::retry::RetryPolicy;
use super::{PushError, PushMessage};
use crate::common::safe_token_log;

/// Headroom over the retry budget so the last attempt can finish and be
/// dead-lettered before the dispatcher deadline fires
const SEND_TIMEOUT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Overall deadline for one dispatcher call, retries included
    pub send_timeout: Duration,
    pub retry: RetryPolicy,
    pub fcm: Option<FcmConfig>,
}

impl PushConfig {
    pub fn from_env() -> Self {
        let send_timeout = env::var("PUSH_SEND_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Self {
            send_timeout,
            retry: RetryPolicy::from_env(),
            fcm: FcmConfig::from_env(),
        }
    }

    /// Dispatcher deadline actually applied.
    ///
    /// Never shorter than the retry budget, otherwise the dispatcher would
    /// cancel a retrying send before it reaches the dead-letter sink.
    pub fn effective_send_timeout(&self) -> Duration {
        let budget = self.retry.worst_case_duration() + SEND_TIMEOUT_GRACE;
        if self.send_timeout >= budget {
            return self.send_timeout;
        }
        warn!(
            requested_ms = self.send_timeout.as_millis() as u64,
            applied_ms = budget.as_millis() as u64,
            "PUSH_SEND_TIMEOUT_SECS is shorter than the retry budget; raising it"
        );
        budget
    }
}

/// Front door to the push provider.
///
/// Converts title/body/payload into a `PushMessage` (payload coerced to the
/// text-only data map) and bounds every provider call with a deadline.
/// The dispatcher itself never retries; wrap the provider in a
/// `RetryingProvider` for that.
#[derive(Clone)]
pub struct PushDispatcher {
    provider: Arc<dyn PushProvider>,
    send_timeout: Duration,
}

impl PushDispatcher {
    pub fn new(provider: Arc<dyn PushProvider>, send_timeout: Duration) -> Self {
        Self {
            provider,
            send_timeout,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Send to one endpoint, returning the provider message id
    pub async fn send_to_one(
        &self,
        token: &str,
        title: &str,
        body: &str,
        payload: Option<&Map<String, Value>>,
    ) -> Result<String, PushError> {
        let message = PushMessage::new(title, body, payload);

        let message_id = timeout(self.send_timeout, self.provider.send(token, &message))
            .await
            .map_err(|_| PushError::Timeout(self.send_timeout))??;

        debug!(
            provider = self.provider.name(),
            token = %safe_token_log(token),
            message_id = %message_id,
            "Push sent to single endpoint"
        );
        Ok(message_id)
    }

    /// Send one message to many endpoints.
    ///
    /// `responses[i]` in the result always describes `tokens[i]`.
    pub async fn send_to_many(
        &self,
        tokens: &[String],
        title: &str,
        body: &str,
        payload: Option<&Map<String, Value>>,
    ) -> Result<BatchResponse, PushError> {
        let message = PushMessage::new(title, body, payload);

        let batch = timeout(self.send_timeout, self.provider.send_each(tokens, &message))
            .await
            .map_err(|_| PushError::Timeout(self.send_timeout))??;

        if batch.responses.len() != tokens.len() {
            warn!(
                provider = self.provider.name(),
                expected = tokens.len(),
                received = batch.responses.len(),
                "Provider response count does not match token count"
            );
            return Err(PushError::Transport(format!(
                "provider returned {} responses for {} tokens",
                batch.responses.len(),
                tokens.len()
            )));
        }

        info!(
            provider = self.provider.name(),
            tokens = tokens.len(),
            success_count = batch.success_count,
            failure_count = batch.failure_count,
            "Push batch dispatched"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::retry::RetryingProvider;
    use crate::push::testing::{MemorySink, RecordingProvider};
    use serde_json::json;

    fn dispatcher(provider: Arc<RecordingProvider>, send_timeout: Duration) -> PushDispatcher {
        PushDispatcher::new(provider, send_timeout)
    }

    #[tokio::test]
    async fn test_send_to_many_preserves_index_correspondence() {
        let provider = Arc::new(RecordingProvider::new().with_failing_token("tokB", "UNREGISTERED"));
        let dispatcher = dispatcher(provider.clone(), Duration::from_secs(5));
        let tokens = vec!["tokA".to_string(), "tokB".to_string(), "tokC".to_string()];

        let batch = dispatcher
            .send_to_many(&tokens, "Hi", "Yo", None)
            .await
            .unwrap();

        assert_eq!(batch.responses.len(), 3);
        assert!(batch.responses[0].success);
        assert!(!batch.responses[1].success);
        assert!(batch.responses[2].success);
        assert_eq!(provider.calls(), vec![tokens]);
    }

    #[tokio::test]
    async fn test_payload_is_coerced_before_dispatch() {
        let provider = Arc::new(RecordingProvider::new());
        let dispatcher = dispatcher(provider.clone(), Duration::from_secs(5));
        let payload = json!({"orderId": 7, "flag": true, "meta": {"a": 1}});

        dispatcher
            .send_to_one("tokA", "Hi", "Yo", payload.as_object())
            .await
            .unwrap();

        let messages = provider.messages();
        let data = messages[0].data.as_ref().unwrap();
        assert_eq!(data["orderId"], "7");
        assert_eq!(data["flag"], "true");
        assert_eq!(data["meta"], "[object Object]");
    }

    #[tokio::test]
    async fn test_send_to_one_propagates_provider_error() {
        let provider = Arc::new(RecordingProvider::new().with_failing_token("tokA", "UNREGISTERED"));
        let dispatcher = dispatcher(provider, Duration::from_secs(5));

        let err = dispatcher
            .send_to_one("tokA", "Hi", "Yo", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Provider { ref code, .. } if code == "UNREGISTERED"));
    }

    #[tokio::test]
    async fn test_deadline_yields_timeout() {
        let provider = Arc::new(RecordingProvider::new().with_delay(Duration::from_secs(5)));
        let dispatcher = dispatcher(provider, Duration::from_millis(20));

        let err = dispatcher
            .send_to_many(&["tokA".to_string()], "Hi", "Yo", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_short_provider_response_is_rejected() {
        let provider = Arc::new(RecordingProvider::new().with_truncated_batches());
        let dispatcher = dispatcher(provider, Duration::from_secs(5));

        let err = dispatcher
            .send_to_many(&["tokA".to_string(), "tokB".to_string()], "Hi", "Yo", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Transport(_)));
    }

    #[test]
    fn test_send_timeout_is_raised_to_retry_budget() {
        let config = PushConfig {
            send_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            fcm: None,
        };
        // 30.6s of retries plus grace
        assert_eq!(config.effective_send_timeout(), Duration::from_millis(31_600));

        let generous = PushConfig {
            send_timeout: Duration::from_secs(120),
            ..config
        };
        assert_eq!(generous.effective_send_timeout(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_slow_failing_attempts_reach_dead_letter_sink() {
        let inner = Arc::new(
            RecordingProvider::new()
                .with_delay(Duration::from_millis(90))
                .with_errors(vec![
                    PushError::Transport("reset".to_string()),
                    PushError::Transport("reset".to_string()),
                    PushError::Transport("reset".to_string()),
                ]),
        );
        let sink = Arc::new(MemorySink::default());
        let config = PushConfig {
            // shorter than three 90ms attempts
            send_timeout: Duration::from_millis(250),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                attempt_timeout: Duration::from_millis(100),
            },
            fcm: None,
        };
        let provider = Arc::new(RetryingProvider::new(
            inner.clone(),
            config.retry.clone(),
            sink.clone(),
        ));
        let dispatcher = PushDispatcher::new(provider, config.effective_send_timeout());

        let err = dispatcher
            .send_to_many(&["tokA".to_string()], "Hi", "Yo", None)
            .await
            .unwrap_err();

        assert!(matches!(err, PushError::Transport(_)));
        assert_eq!(inner.calls().len(), 3);
        assert_eq!(sink.letters.lock().unwrap().len(), 1);
    }
}
