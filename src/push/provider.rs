//! Push provider trait and normalized outcome types

use async_trait::async_trait;
use serde::Serialize;

use super::{PushError, PushMessage};

/// Provider error codes meaning the token will never be deliverable again
const INVALID_TOKEN_CODES: &[&str] = &["UNREGISTERED", "SENDER_ID_MISMATCH"];

/// Why one token in a batch was not accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendFailure {
    pub code: String,
    pub message: String,
}

impl SendFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Token is permanently invalid and should be removed from the registry
    pub fn is_token_invalid(&self) -> bool {
        INVALID_TOKEN_CODES.contains(&self.code.as_str())
    }
}

/// Outcome for one token, at the same index as the token in the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResponse {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<SendFailure>,
}

impl SendResponse {
    pub fn sent(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failed(failure: SendFailure) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(failure),
        }
    }
}

/// Per-token breakdown of one multi-target send
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResponse {
    pub responses: Vec<SendResponse>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl BatchResponse {
    pub fn from_responses(responses: Vec<SendResponse>) -> Self {
        let success_count = responses.iter().filter(|r| r.success).count();
        let failure_count = responses.len() - success_count;
        Self {
            responses,
            success_count,
            failure_count,
        }
    }
}

/// External push-messaging provider.
///
/// `send_each` must return exactly one response per input token, in input
/// order. Per-token rejections are data inside the `BatchResponse`; only a
/// failure of the call as a whole is an `Err`.
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Send to one token, returning the provider's message id
    async fn send(&self, token: &str, message: &PushMessage) -> Result<String, PushError>;

    /// Send the same message to many tokens
    async fn send_each(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<BatchResponse, PushError>;

    /// Short provider name for logs
    fn name(&self) -> &'static str;
}

/// Stand-in used when no provider credentials are configured.
///
/// Every call fails as a transport-class error, so fan-out aborts without
/// writing rows instead of pretending messages went out.
pub struct DisabledProvider;

#[async_trait]
impl PushProvider for DisabledProvider {
    async fn send(&self, _token: &str, _message: &PushMessage) -> Result<String, PushError> {
        Err(PushError::NotConfigured)
    }

    async fn send_each(
        &self,
        _tokens: &[String],
        _message: &PushMessage,
    ) -> Result<BatchResponse, PushError> {
        Err(PushError::NotConfigured)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}
