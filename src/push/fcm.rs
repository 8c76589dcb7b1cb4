//! Firebase Cloud Messaging (HTTP v1) provider

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::message::AndroidPriority;
use super::provider::{BatchResponse, PushProvider, SendFailure, SendResponse};
use super::{PushError, PushMessage};
use crate::common::safe_token_log;

/// FCM refuses multicast requests above this many tokens
pub const MAX_BATCH_SIZE: usize = 500;

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// Refresh cached access tokens this long before they expire
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// How the provider obtains OAuth2 bearer tokens
#[derive(Debug, Clone)]
pub enum FcmCredentials {
    /// Service account key; access tokens are minted with a signed JWT assertion
    ServiceAccount {
        client_email: String,
        private_key: String,
    },
    /// Pre-issued access token (e.g. from `gcloud auth print-access-token`)
    AccessToken(String),
}

#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub project_id: String,
    pub credentials: FcmCredentials,
    pub base_url: String,
    pub token_url: String,
}

impl FcmConfig {
    /// Load from environment; `None` when the project or credentials are missing
    pub fn from_env() -> Option<Self> {
        let project_id = env::var("FCM_PROJECT_ID").ok().filter(|v| !v.is_empty())?;

        let credentials = match (
            env::var("FCM_CLIENT_EMAIL").ok().filter(|v| !v.is_empty()),
            env::var("FCM_PRIVATE_KEY").ok().filter(|v| !v.is_empty()),
        ) {
            (Some(client_email), Some(private_key)) => FcmCredentials::ServiceAccount {
                client_email,
                // keys pasted into .env files carry literal "\n" sequences
                private_key: private_key.replace("\\n", "\n"),
            },
            _ => FcmCredentials::AccessToken(
                env::var("FCM_ACCESS_TOKEN").ok().filter(|v| !v.is_empty())?,
            ),
        };

        Some(Self {
            project_id,
            credentials,
            base_url: env::var("FCM_BASE_URL")
                .unwrap_or_else(|_| "https://fcm.googleapis.com".to_string()),
            token_url: env::var("FCM_TOKEN_URL")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string()),
        })
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Debug, Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a BTreeMap<String, String>>,
    android: AndroidConfig<'a>,
    apns: ApnsConfig<'a>,
}

#[derive(Debug, Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct AndroidConfig<'a> {
    priority: AndroidPriority,
    notification: AndroidNotification<'a>,
}

#[derive(Debug, Serialize)]
struct AndroidNotification<'a> {
    channel_id: &'a str,
    sound: &'a str,
}

#[derive(Debug, Serialize)]
struct ApnsConfig<'a> {
    payload: ApnsPayload<'a>,
}

#[derive(Debug, Serialize)]
struct ApnsPayload<'a> {
    aps: Aps<'a>,
}

#[derive(Debug, Serialize)]
struct Aps<'a> {
    sound: &'a str,
    badge: u32,
}

fn envelope<'a>(token: &'a str, message: &'a PushMessage) -> SendRequest<'a> {
    SendRequest {
        message: FcmMessage {
            token,
            notification: FcmNotification {
                title: &message.title,
                body: &message.body,
            },
            data: message.data.as_ref(),
            android: AndroidConfig {
                priority: message.hints.android_priority,
                notification: AndroidNotification {
                    channel_id: &message.hints.android_channel_id,
                    sound: &message.hints.sound,
                },
            },
            apns: ApnsConfig {
                payload: ApnsPayload {
                    aps: Aps {
                        sound: &message.hints.sound,
                        badge: message.hints.apns_badge,
                    },
                },
            },
        },
    }
}

#[derive(Debug, Deserialize)]
struct SendSuccess {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

impl ErrorDetail {
    /// The FCM-specific `errorCode` when present, the RPC status otherwise
    fn code(&self) -> String {
        self.details
            .iter()
            .find_map(|d| d.get("errorCode").and_then(|c| c.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| self.status.clone())
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: i64,
}

/// Result of one HTTP send attempt
enum Attempt {
    Sent(String),
    Rejected(SendFailure),
    /// Connection never established; nothing reached FCM
    Unreachable(String),
    /// Bearer token refused (401, or 403 for anything but a sender mismatch)
    Unauthorized(String),
}

// ============================================================================
// Provider
// ============================================================================

pub struct FcmProvider {
    config: FcmConfig,
    client: Client,
    cached_token: RwLock<Option<CachedToken>>,
}

impl FcmProvider {
    pub fn new(config: FcmConfig, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            config,
            client,
            cached_token: RwLock::new(None),
        }
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.config.base_url.trim_end_matches('/'),
            self.config.project_id
        )
    }

    async fn access_token(&self) -> Result<String, PushError> {
        let (client_email, private_key) = match &self.config.credentials {
            FcmCredentials::AccessToken(token) => return Ok(token.clone()),
            FcmCredentials::ServiceAccount {
                client_email,
                private_key,
            } => (client_email, private_key),
        };

        let now = Utc::now().timestamp();
        if let Some(cached) = self.cached_token.read().await.as_ref() {
            if cached.expires_at - TOKEN_REFRESH_MARGIN_SECS > now {
                return Ok(cached.value.clone());
            }
        }

        let claims = AssertionClaims {
            iss: client_email,
            scope: FCM_SCOPE,
            aud: &self.config.token_url,
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
            .map_err(|e| PushError::Auth(format!("invalid service account key: {}", e)))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| PushError::Auth(format!("failed to sign assertion: {}", e)))?;

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PushError::Transport(format!("token endpoint unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(PushError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PushError::Auth(format!("invalid token response: {}", e)))?;

        debug!(expires_in = token.expires_in, "Minted FCM access token");

        *self.cached_token.write().await = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + token.expires_in,
        });

        Ok(token.access_token)
    }

    async fn attempt(&self, access_token: &str, token: &str, message: &PushMessage) -> Attempt {
        let response = match self
            .client
            .post(self.send_url())
            .bearer_auth(access_token)
            .json(&envelope(token, message))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_connect() => return Attempt::Unreachable(e.to_string()),
            // the request may have been delivered; report it against this token only
            Err(e) => {
                let code = if e.is_timeout() {
                    "DEADLINE_EXCEEDED"
                } else {
                    "UNAVAILABLE"
                };
                return Attempt::Rejected(SendFailure::new(code, e.to_string()));
            }
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<SendSuccess>().await {
                Ok(body) => Attempt::Sent(body.name),
                Err(e) => Attempt::Rejected(SendFailure::new("INVALID_RESPONSE", e.to_string())),
            };
        }

        let failure = match response.json::<ErrorBody>().await {
            Ok(body) => {
                let code = body.error.code();
                let code = if code.is_empty() {
                    status.as_str().to_string()
                } else {
                    code
                };
                SendFailure::new(code, body.error.message)
            }
            Err(_) => SendFailure::new(status.as_str(), format!("HTTP {}", status)),
        };

        if status == StatusCode::UNAUTHORIZED
            || (status == StatusCode::FORBIDDEN && failure.code != "SENDER_ID_MISMATCH")
        {
            return Attempt::Unauthorized(format!("{}: {}", failure.code, failure.message));
        }

        debug!(
            token = %safe_token_log(token),
            code = %failure.code,
            "FCM rejected token"
        );
        Attempt::Rejected(failure)
    }

    /// Drop the cached access token so the next call mints a fresh one
    async fn invalidate_access_token(&self, reason: &str) {
        warn!(error = %reason, "FCM refused access token; discarding cached token");
        *self.cached_token.write().await = None;
    }
}

#[async_trait]
impl PushProvider for FcmProvider {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<String, PushError> {
        let access_token = self.access_token().await?;

        match self.attempt(&access_token, token, message).await {
            Attempt::Sent(id) => {
                info!(message_id = %id, token = %safe_token_log(token), "Sent push notification");
                Ok(id)
            }
            Attempt::Rejected(failure) => Err(PushError::Provider {
                code: failure.code,
                message: failure.message,
            }),
            Attempt::Unreachable(e) => Err(PushError::Transport(e)),
            Attempt::Unauthorized(e) => {
                self.invalidate_access_token(&e).await;
                Err(PushError::Auth(e))
            }
        }
    }

    async fn send_each(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<BatchResponse, PushError> {
        if tokens.is_empty() {
            return Err(PushError::MalformedBatch("no tokens".to_string()));
        }
        if tokens.len() > MAX_BATCH_SIZE {
            return Err(PushError::MalformedBatch(format!(
                "{} tokens exceeds the limit of {}",
                tokens.len(),
                MAX_BATCH_SIZE
            )));
        }

        let access_token = self.access_token().await?;

        // join_all yields results in input order, which keeps index correlation intact
        let attempts = join_all(
            tokens
                .iter()
                .map(|token| self.attempt(&access_token, token, message)),
        )
        .await;

        if attempts
            .iter()
            .all(|a| matches!(a, Attempt::Unreachable(_)))
        {
            let reason = match attempts.into_iter().next() {
                Some(Attempt::Unreachable(e)) => e,
                _ => "no response".to_string(),
            };
            warn!(tokens = tokens.len(), error = %reason, "FCM unreachable for entire batch");
            return Err(PushError::Transport(reason));
        }

        if let Some(reason) = attempts.iter().find_map(|a| match a {
            Attempt::Unauthorized(e) => Some(e.clone()),
            _ => None,
        }) {
            self.invalidate_access_token(&reason).await;
            let delivered = attempts.iter().any(|a| matches!(a, Attempt::Sent(_)));
            // nothing went out, so the whole batch can be retried with a new token
            if !delivered {
                return Err(PushError::Auth(reason));
            }
        }

        let responses = attempts
            .into_iter()
            .map(|attempt| match attempt {
                Attempt::Sent(id) => SendResponse::sent(id),
                Attempt::Rejected(failure) => SendResponse::failed(failure),
                Attempt::Unreachable(e) => SendResponse::failed(SendFailure::new("UNAVAILABLE", e)),
                Attempt::Unauthorized(e) => {
                    SendResponse::failed(SendFailure::new("UNAUTHENTICATED", e))
                }
            })
            .collect();

        Ok(BatchResponse::from_responses(responses))
    }

    fn name(&self) -> &'static str {
        "fcm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Json,
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };
    use serde_json::{json, Value};
    use std::net::SocketAddr;

    const STALE_ACCESS_TOKEN: &str = "stale-access-token";

    /// Fake FCM endpoint: tokens starting with "dead" are unregistered and
    /// the stale access token is refused
    async fn fake_send(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        let token = body["message"]["token"].as_str().unwrap_or_default().to_string();
        let bearer = headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();
        if bearer == format!("Bearer {}", STALE_ACCESS_TOKEN) {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": {
                        "code": 401,
                        "message": "Request had invalid authentication credentials.",
                        "status": "UNAUTHENTICATED"
                    }
                })),
            )
        } else if token.starts_with("dead") {
            (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": {
                        "code": 404,
                        "message": "Requested entity was not found.",
                        "status": "NOT_FOUND",
                        "details": [{
                            "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                            "errorCode": "UNREGISTERED"
                        }]
                    }
                })),
            )
        } else {
            (
                StatusCode::OK,
                Json(json!({ "name": format!("projects/demo/messages/{}", token) })),
            )
        }
    }

    async fn spawn_fake_fcm() -> SocketAddr {
        let app = Router::new().route("/v1/projects/demo/messages:send", post(fake_send));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn provider_for(base_url: String) -> FcmProvider {
        FcmProvider::new(
            FcmConfig {
                project_id: "demo".to_string(),
                credentials: FcmCredentials::AccessToken("test-access-token".to_string()),
                base_url,
                token_url: "http://127.0.0.1:1/token".to_string(),
            },
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_envelope_shape() {
        let mut payload = serde_json::Map::new();
        payload.insert("orderId".to_string(), json!(17));
        let message = PushMessage::new("Hi", "Yo", Some(&payload));

        let wire = serde_json::to_value(envelope("tokA", &message)).unwrap();
        assert_eq!(
            wire,
            json!({
                "message": {
                    "token": "tokA",
                    "notification": { "title": "Hi", "body": "Yo" },
                    "data": { "orderId": "17" },
                    "android": {
                        "priority": "high",
                        "notification": { "channel_id": "default", "sound": "default" }
                    },
                    "apns": { "payload": { "aps": { "sound": "default", "badge": 1 } } }
                }
            })
        );
    }

    #[test]
    fn test_envelope_omits_missing_data() {
        let message = PushMessage::new("Hi", "Yo", None);
        let wire = serde_json::to_value(envelope("tokA", &message)).unwrap();
        assert!(wire["message"].get("data").is_none());
    }

    #[tokio::test]
    async fn test_send_each_preserves_order_and_reports_failures() {
        let addr = spawn_fake_fcm().await;
        let provider = provider_for(format!("http://{}", addr));
        let message = PushMessage::new("Hi", "Yo", None);
        let tokens = vec![
            "tokA".to_string(),
            "dead-1".to_string(),
            "tokB".to_string(),
        ];

        let batch = provider.send_each(&tokens, &message).await.unwrap();

        assert_eq!(batch.success_count, 2);
        assert_eq!(batch.failure_count, 1);
        assert_eq!(
            batch.responses[0].message_id.as_deref(),
            Some("projects/demo/messages/tokA")
        );
        let failure = batch.responses[1].error.as_ref().unwrap();
        assert_eq!(failure.code, "UNREGISTERED");
        assert!(failure.is_token_invalid());
        assert_eq!(
            batch.responses[2].message_id.as_deref(),
            Some("projects/demo/messages/tokB")
        );
    }

    #[tokio::test]
    async fn test_send_single_surfaces_provider_error() {
        let addr = spawn_fake_fcm().await;
        let provider = provider_for(format!("http://{}", addr));
        let message = PushMessage::new("Hi", "Yo", None);

        let err = provider.send("dead-2", &message).await.unwrap_err();
        assert!(matches!(err, PushError::Provider { ref code, .. } if code == "UNREGISTERED"));

        let id = provider.send("tokC", &message).await.unwrap();
        assert_eq!(id, "projects/demo/messages/tokC");
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transport_failure() {
        // Port 1 on loopback refuses connections
        let provider = provider_for("http://127.0.0.1:1".to_string());
        let message = PushMessage::new("Hi", "Yo", None);

        let err = provider
            .send_each(&["tokA".to_string(), "tokB".to_string()], &message)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Transport(_)));
    }

    #[tokio::test]
    async fn test_malformed_batches_rejected() {
        let provider = provider_for("http://127.0.0.1:1".to_string());
        let message = PushMessage::new("Hi", "Yo", None);

        let err = provider.send_each(&[], &message).await.unwrap_err();
        assert!(matches!(err, PushError::MalformedBatch(_)));

        let too_many: Vec<String> = (0..=MAX_BATCH_SIZE).map(|i| format!("t{}", i)).collect();
        let err = provider.send_each(&too_many, &message).await.unwrap_err();
        assert!(matches!(err, PushError::MalformedBatch(_)));
    }

    #[tokio::test]
    async fn test_invalid_service_account_key_is_auth_error() {
        let provider = FcmProvider::new(
            FcmConfig {
                project_id: "demo".to_string(),
                credentials: FcmCredentials::ServiceAccount {
                    client_email: "svc@demo.iam.gserviceaccount.com".to_string(),
                    private_key: "not a pem".to_string(),
                },
                base_url: "http://127.0.0.1:1".to_string(),
                token_url: "http://127.0.0.1:1/token".to_string(),
            },
            Duration::from_secs(5),
        );
        let message = PushMessage::new("Hi", "Yo", None);

        let err = provider.send("tokA", &message).await.unwrap_err();
        assert!(matches!(err, PushError::Auth(_)));
    }

    #[tokio::test]
    async fn test_rejected_access_token_is_auth_error() {
        let addr = spawn_fake_fcm().await;
        let mut provider = provider_for(format!("http://{}", addr));
        provider.config.credentials = FcmCredentials::AccessToken(STALE_ACCESS_TOKEN.to_string());
        let message = PushMessage::new("Hi", "Yo", None);

        let err = provider
            .send_each(&["tokA".to_string(), "tokB".to_string()], &message)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Auth(_)));
        assert!(err.is_retryable());

        let err = provider.send("tokA", &message).await.unwrap_err();
        assert!(matches!(err, PushError::Auth(_)));
    }

    #[tokio::test]
    async fn test_rejected_cached_token_is_discarded() {
        let addr = spawn_fake_fcm().await;
        let provider = FcmProvider::new(
            FcmConfig {
                project_id: "demo".to_string(),
                credentials: FcmCredentials::ServiceAccount {
                    client_email: "svc@demo.iam.gserviceaccount.com".to_string(),
                    private_key: "not a pem".to_string(),
                },
                base_url: format!("http://{}", addr),
                token_url: "http://127.0.0.1:1/token".to_string(),
            },
            Duration::from_secs(5),
        );
        // still well inside its lifetime, so it would be reused
        *provider.cached_token.write().await = Some(CachedToken {
            value: STALE_ACCESS_TOKEN.to_string(),
            expires_at: Utc::now().timestamp() + 3600,
        });
        let message = PushMessage::new("Hi", "Yo", None);

        let err = provider
            .send_each(&["tokA".to_string()], &message)
            .await
            .unwrap_err();

        assert!(matches!(err, PushError::Auth(_)));
        assert!(provider.cached_token.read().await.is_none());
    }
}
