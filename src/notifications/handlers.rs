//! Notification handlers

use axum::{
    extract::{Extension, Json, Path, Query},
    http::{HeaderMap, StatusCode},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::fanout::{Audience, FanoutCoordinator, FanoutMessage, FanoutOutcome, RegistryAudience};
use super::models::*;
use super::reconcile::DeliveryEvent;
use super::repository::NotificationRepository;
use super::service::NotificationService;
use super::validators::{CreateNotificationValidator, SendNotificationValidator};
use crate::auth::{AuthedUser, VerifiedCaller};
use crate::common::{safe_email_log, ApiError, ApiJson, AppState, Validator};
use crate::devices::DeviceTokenRepository;

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Upper bound on events accepted in one webhook call
const MAX_EVENTS_PER_CALL: usize = 1000;

/// POST /api/notifications
/// Stores a notification for the caller at status pending; nothing is pushed
pub async fn create_notification(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    ApiJson(payload): ApiJson<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<Notification>), ApiError> {
    CreateNotificationValidator.validate(&payload).into_result()?;

    let state = state_lock.read().await.clone();
    let notification = NotificationService::new(state.db)
        .create(&authed.id, &payload)
        .await?;

    Ok((StatusCode::CREATED, Json(notification)))
}

/// GET /api/notifications?isRead=&skip=&take=
pub async fn list_notifications(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    let options = ListOptions::from(query);

    let state = state_lock.read().await.clone();
    let notifications = NotificationService::new(state.db)
        .find_all(&authed.id, &options)
        .await?;

    Ok(Json(notifications))
}

/// GET /api/notifications/unread/count
/// Responds with a bare JSON number
pub async fn unread_count(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<i64>, ApiError> {
    let state = state_lock.read().await.clone();
    let count = NotificationService::new(state.db)
        .unread_count(&authed.id)
        .await?;

    Ok(Json(count))
}

/// GET /api/notifications/:id
pub async fn get_notification(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    let state = state_lock.read().await.clone();
    let notification = NotificationService::new(state.db)
        .find_one(&authed.id, &id)
        .await?;

    Ok(Json(notification))
}

/// PATCH /api/notifications/:id/read
pub async fn mark_as_read(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    let state = state_lock.read().await.clone();
    let notification = NotificationService::new(state.db)
        .mark_as_read(&authed.id, &id)
        .await?;

    Ok(Json(notification))
}

/// POST /api/notifications/send
/// Fans a message out to the given users' devices, or to every device
///
/// # Request Body
/// ```json
/// {
///   "title": "Hi",
///   "body": "Yo",
///   "urgency": 2,
///   "data": { "orderId": 17 },
///   "userIds": ["U_..."]
/// }
/// ```
///
/// # Response
/// ```json
/// { "success": true, "successCount": 1, "failureCount": 0, "message": "Sent 1 notifications" }
/// ```
pub async fn send_notification(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    caller: VerifiedCaller,
    ApiJson(payload): ApiJson<SendNotificationRequest>,
) -> Result<Json<SendNotificationResponse>, ApiError> {
    if !caller.is_admin {
        warn!(
            email = %safe_email_log(&caller.identity.email),
            "Non-admin attempted to send notifications"
        );
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }

    SendNotificationValidator.validate(&payload).into_result()?;
    let urgency = Urgency::try_from(payload.urgency).map_err(ApiError::ValidationError)?;

    let SendNotificationRequest {
        title,
        body,
        data,
        user_ids,
        ..
    } = payload;
    let payload = match data {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    };

    let state = state_lock.read().await.clone();
    let audience = Audience::from_user_ids(user_ids);
    info!(
        broadcast = matches!(audience, Audience::Everyone),
        provider = state.dispatcher.provider_name(),
        "Fan-out requested"
    );

    let coordinator = FanoutCoordinator::new(
        state.dispatcher.clone(),
        NotificationRepository::new(state.db.clone()),
        state.delivery_events.clone(),
    );
    let mut source = RegistryAudience::new(
        DeviceTokenRepository::new(state.db.clone()),
        audience,
        state.fanout.page_size,
    );

    let outcome = coordinator
        .send(
            &mut source,
            &FanoutMessage {
                title,
                body,
                urgency,
                payload,
            },
        )
        .await?;

    let response = match outcome {
        FanoutOutcome::NoAudience => SendNotificationResponse {
            success: false,
            success_count: None,
            failure_count: None,
            message: "No device tokens found".to_string(),
        },
        FanoutOutcome::Sent {
            success_count,
            failure_count,
            ..
        } => SendNotificationResponse {
            success: true,
            success_count: Some(success_count),
            failure_count: Some(failure_count),
            message: format!("Sent {} notifications", success_count),
        },
    };

    Ok(Json(response))
}

/// POST /api/notifications/:id/delivered
/// Client confirmation that a notification reached the device
pub async fn confirm_delivered(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let state = state_lock.read().await.clone();

    // ownership check; another user's id is a 404
    NotificationService::new(state.db.clone())
        .find_one(&authed.id, &id)
        .await?;

    enqueue(&state, DeliveryEvent::Delivered { notification_id: id }).await?;

    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { accepted: 1 })))
}

/// POST /api/notifications/delivery-events
/// Provider callback; requires the `x-webhook-secret` header
///
/// # Request Body
/// ```json
/// {
///   "events": [
///     { "type": "delivered", "notificationId": "N_..." },
///     { "type": "failed", "notificationId": "N_..." },
///     { "type": "tokenInvalidated", "token": "<provider token>" }
///   ]
/// }
/// ```
pub async fn delivery_events(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<DeliveryEventsRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let state = state_lock.read().await.clone();

    let Some(expected) = state.webhook_secret.as_deref() else {
        warn!("Delivery webhook called but DELIVERY_WEBHOOK_SECRET is not set");
        return Err(ApiError::Unauthorized("webhook disabled".to_string()));
    };

    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    if !secrets_match(provided, expected) {
        warn!("Delivery webhook rejected: bad secret");
        return Err(ApiError::Unauthorized("invalid webhook secret".to_string()));
    }

    if payload.events.is_empty() {
        return Err(ApiError::ValidationError("events: At least one event is required".to_string()));
    }
    if payload.events.len() > MAX_EVENTS_PER_CALL {
        return Err(ApiError::ValidationError(format!(
            "events: At most {} events per call",
            MAX_EVENTS_PER_CALL
        )));
    }

    let accepted = payload.events.len();
    for event in payload.events {
        enqueue(&state, event).await?;
    }

    info!(accepted = accepted, "Delivery events queued");
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { accepted })))
}

async fn enqueue(state: &AppState, event: DeliveryEvent) -> Result<(), ApiError> {
    state
        .delivery_events
        .send(event)
        .await
        .map_err(|_| ApiError::ServiceUnavailable("delivery reconciliation is not running".to_string()))
}

/// Length-independent comparison so response timing does not leak the secret
fn secrets_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= (x ^ y) as usize;
    }
    diff == 0
}
