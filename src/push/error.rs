use std::time::Duration;

/// Failures raised by a push provider call.
///
/// Everything except `Provider` is a transport-class failure: the call as a
/// whole did not go through. `Provider` is only produced by single-target
/// sends, where the provider rejected that one token.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PushError {
    #[error("push provider not configured")]
    NotConfigured,

    #[error("push provider unreachable: {0}")]
    Transport(String),

    #[error("push provider authentication failed: {0}")]
    Auth(String),

    #[error("malformed batch: {0}")]
    MalformedBatch(String),

    #[error("push provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("push provider rejected message ({code}): {message}")]
    Provider { code: String, message: String },
}

impl PushError {
    /// Whether retrying the same call could plausibly succeed without
    /// pushing a message twice.
    ///
    /// `Timeout` is excluded: the provider may already have delivered some
    /// or all of the call before the deadline fired.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PushError::Transport(_) | PushError::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_undelivered_failures_are_retryable() {
        assert!(PushError::Transport("refused".to_string()).is_retryable());
        assert!(PushError::Auth("expired".to_string()).is_retryable());
        assert!(!PushError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!PushError::MalformedBatch("empty".to_string()).is_retryable());
        assert!(!PushError::NotConfigured.is_retryable());
    }
}
