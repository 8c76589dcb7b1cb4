//! Device registration handlers

use axum::{
    extract::{Extension, Json, Path},
    http::StatusCode,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::models::{DeviceToken, Platform, RegisterDeviceRequest, RemoveDeviceResponse};
use super::repository::DeviceTokenRepository;
use super::validators::DeviceTokenValidator;
use crate::auth::AuthedUser;
use crate::common::{safe_token_log, ApiError, ApiJson, AppState, Validator};

/// POST /api/notifications/device-token
/// Registers (or re-parents) a push token for the caller
///
/// # Request Body
/// ```json
/// { "token": "<provider token>", "platform": "ios" | "android" }
/// ```
pub async fn register_device_token(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    ApiJson(payload): ApiJson<RegisterDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceToken>), ApiError> {
    DeviceTokenValidator.validate(&payload).into_result()?;

    let platform: Platform = payload.platform.parse().map_err(ApiError::ValidationError)?;

    let state = state_lock.read().await.clone();
    let device = DeviceTokenRepository::new(state.db)
        .register_or_update(&authed.id, &payload.token, platform)
        .await?;

    info!(
        user_id = %authed.id,
        token = %safe_token_log(&device.token),
        platform = %platform,
        "Device token registered"
    );

    Ok((StatusCode::CREATED, Json(device)))
}

/// DELETE /api/notifications/device-token/:token
/// Removes one of the caller's tokens; idempotent
pub async fn remove_device_token(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Path(token): Path<String>,
) -> Result<Json<RemoveDeviceResponse>, ApiError> {
    let state = state_lock.read().await.clone();

    let removed = DeviceTokenRepository::new(state.db)
        .delete_owned(&authed.id, &token)
        .await?;

    info!(
        user_id = %authed.id,
        token = %safe_token_log(&token),
        removed = removed,
        "Device token removal requested"
    );

    Ok(Json(RemoveDeviceResponse { removed }))
}
