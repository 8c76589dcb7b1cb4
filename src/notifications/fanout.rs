//! Fan-out: resolve an audience, push to it, record one row per endpoint
//!
//! One request runs as a single pipeline:
//! 1. resolve the audience page by page into ordered `(token, user)` pairs
//! 2. dispatch each page as one batch
//! 3. join every batch's per-index outcome back onto its pairs
//! 4. persist all rows in one transaction, then summarize
//!
//! A transport failure on any batch aborts before step 4, so a failed
//! request never leaves rows behind. Batches already accepted by the
//! provider before the failure are not recalled.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::env;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::models::{encode_payload, DeliveryStatus, NewNotification, Urgency};
use super::reconcile::DeliveryEvent;
use super::repository::NotificationRepository;
use crate::common::safe_token_log;
use crate::devices::{DeviceToken, DeviceTokenRepository};
use crate::push::fcm::MAX_BATCH_SIZE;
use crate::push::{BatchResponse, PushDispatcher, PushError};

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Endpoints per audience page and per provider batch
    pub page_size: u32,
}

impl FanoutConfig {
    pub fn from_env() -> Self {
        let page_size = env::var("AUDIENCE_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(MAX_BATCH_SIZE as u32)
            .clamp(1, MAX_BATCH_SIZE as u32);

        Self { page_size }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("notification store failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Push(#[from] PushError),
}

/// Who a send targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Users(Vec<String>),
    Everyone,
}

impl Audience {
    /// A missing or empty id list means everyone
    pub fn from_user_ids(user_ids: Option<Vec<String>>) -> Self {
        match user_ids {
            Some(ids) if !ids.is_empty() => Audience::Users(ids),
            _ => Audience::Everyone,
        }
    }
}

/// One resolved endpoint and the user who owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub token: String,
    pub user_id: String,
}

impl From<DeviceToken> for Recipient {
    fn from(device: DeviceToken) -> Self {
        Self {
            token: device.token,
            user_id: device.user_id,
        }
    }
}

/// Ordered, paged source of recipients.
///
/// Pages are never empty; `None` marks the end.
#[async_trait]
pub trait AudienceSource: Send {
    async fn next_page(&mut self) -> Result<Option<Vec<Recipient>>, sqlx::Error>;
}

/// Audience backed by the device registry.
///
/// Explicit user lists are loaded once and handed out in pages; broadcasts
/// walk the registry with a keyset cursor, one page per query. Only the
/// registry reads are paged: `FanoutCoordinator::send` keeps every outcome
/// until the last page is dispatched, so its memory grows with the audience.
pub struct RegistryAudience {
    devices: DeviceTokenRepository,
    page_size: u32,
    state: AudienceState,
}

enum AudienceState {
    Explicit {
        user_ids: Vec<String>,
        loaded: Option<VecDeque<Recipient>>,
    },
    Broadcast {
        cursor: Option<String>,
        exhausted: bool,
    },
}

impl RegistryAudience {
    pub fn new(devices: DeviceTokenRepository, audience: Audience, page_size: u32) -> Self {
        let state = match audience {
            Audience::Users(user_ids) => AudienceState::Explicit {
                user_ids,
                loaded: None,
            },
            Audience::Everyone => AudienceState::Broadcast {
                cursor: None,
                exhausted: false,
            },
        };

        Self {
            devices,
            page_size: page_size.max(1),
            state,
        }
    }
}

#[async_trait]
impl AudienceSource for RegistryAudience {
    async fn next_page(&mut self) -> Result<Option<Vec<Recipient>>, sqlx::Error> {
        let page_size = self.page_size as usize;

        match &mut self.state {
            AudienceState::Explicit { user_ids, loaded } => {
                if loaded.is_none() {
                    let endpoints = self.devices.list_for_users(user_ids).await?;
                    debug!(
                        users = user_ids.len(),
                        endpoints = endpoints.len(),
                        "Resolved explicit audience"
                    );
                    *loaded = Some(endpoints.into_iter().map(Recipient::from).collect());
                }

                let Some(queue) = loaded.as_mut() else {
                    return Ok(None);
                };
                if queue.is_empty() {
                    return Ok(None);
                }
                let take = page_size.min(queue.len());
                Ok(Some(queue.drain(..take).collect()))
            }
            AudienceState::Broadcast { cursor, exhausted } => {
                if *exhausted {
                    return Ok(None);
                }

                let page = self
                    .devices
                    .list_page(cursor.as_deref(), self.page_size)
                    .await?;

                if page.len() < page_size {
                    *exhausted = true;
                }
                if page.is_empty() {
                    return Ok(None);
                }

                *cursor = page.last().map(|d| d.id.clone());
                Ok(Some(page.into_iter().map(Recipient::from).collect()))
            }
        }
    }
}

/// The message half of a fan-out request
#[derive(Debug, Clone)]
pub struct FanoutMessage {
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
    pub payload: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutOutcome {
    /// Nothing to send to; no provider call was made and no rows written
    NoAudience,
    Sent {
        success_count: usize,
        failure_count: usize,
        rows_written: usize,
    },
}

/// Outcome of one index of a batch, joined back to its recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedOutcome {
    pub recipient: Recipient,
    pub status: DeliveryStatus,
    /// Provider said this token will never work again
    pub token_invalid: bool,
}

/// Zip a batch outcome with the recipients it was sent to, by position.
///
/// Callers guarantee equal lengths (the dispatcher rejects mismatches).
pub fn join_outcomes(recipients: Vec<Recipient>, batch: &BatchResponse) -> Vec<JoinedOutcome> {
    recipients
        .into_iter()
        .zip(batch.responses.iter())
        .map(|(recipient, response)| JoinedOutcome {
            recipient,
            status: if response.success {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Failed
            },
            token_invalid: response
                .error
                .as_ref()
                .map(|e| e.is_token_invalid())
                .unwrap_or(false),
        })
        .collect()
}

pub struct FanoutCoordinator {
    dispatcher: PushDispatcher,
    notifications: NotificationRepository,
    events: mpsc::Sender<DeliveryEvent>,
}

impl FanoutCoordinator {
    pub fn new(
        dispatcher: PushDispatcher,
        notifications: NotificationRepository,
        events: mpsc::Sender<DeliveryEvent>,
    ) -> Self {
        Self {
            dispatcher,
            notifications,
            events,
        }
    }

    pub async fn send<A: AudienceSource>(
        &self,
        audience: &mut A,
        message: &FanoutMessage,
    ) -> Result<FanoutOutcome, FanoutError> {
        let mut joined: Vec<JoinedOutcome> = Vec::new();
        let mut success_count = 0;
        let mut failure_count = 0;

        while let Some(page) = audience.next_page().await? {
            let tokens: Vec<String> = page.iter().map(|r| r.token.clone()).collect();

            let batch = self
                .dispatcher
                .send_to_many(
                    &tokens,
                    &message.title,
                    &message.body,
                    message.payload.as_ref(),
                )
                .await
                .map_err(|e| {
                    warn!(
                        error = %e,
                        endpoints_already_sent = joined.len(),
                        "Fan-out aborted on transport failure; no rows written"
                    );
                    e
                })?;

            success_count += batch.success_count;
            failure_count += batch.failure_count;
            joined.extend(join_outcomes(page, &batch));
        }

        if joined.is_empty() {
            info!("Fan-out found no device tokens");
            return Ok(FanoutOutcome::NoAudience);
        }

        let data = encode_payload(message.payload.as_ref());
        let rows: Vec<NewNotification> = joined
            .iter()
            .map(|j| NewNotification {
                user_id: j.recipient.user_id.clone(),
                title: message.title.clone(),
                body: message.body.clone(),
                urgency: message.urgency,
                data: data.clone(),
                delivery_status: j.status,
            })
            .collect();

        let written = self.notifications.create_many(&rows).await?;

        self.publish_invalid_tokens(&joined);

        info!(
            endpoints = joined.len(),
            success_count = success_count,
            failure_count = failure_count,
            "Fan-out complete"
        );

        Ok(FanoutOutcome::Sent {
            success_count,
            failure_count,
            rows_written: written.len(),
        })
    }

    /// Queue cleanup of dead tokens without waiting on the worker
    fn publish_invalid_tokens(&self, joined: &[JoinedOutcome]) {
        for outcome in joined.iter().filter(|j| j.token_invalid) {
            let event = DeliveryEvent::TokenInvalidated {
                token: outcome.recipient.token.clone(),
            };
            if let Err(e) = self.events.try_send(event) {
                warn!(
                    token = %safe_token_log(&outcome.recipient.token),
                    error = %e,
                    "Dropped token invalidation event"
                );
            }
        }
    }
}
