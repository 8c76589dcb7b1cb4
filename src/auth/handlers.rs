//! Authentication handlers

use axum::extract::{Extension, Json};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::extractors::VerifiedCaller;
use super::models::MeResponse;
use super::repository::UserRepository;
use crate::common::{ApiError, AppState};

/// GET /api/auth/me
/// Returns the caller's user record, creating it on first call
///
/// # Response
/// ```json
/// {
///   "id": "U_...",
///   "externalId": "<identity subject>",
///   "email": "user@example.com",
///   "createdAt": "...",
///   "updatedAt": "...",
///   "isAdmin": false
/// }
/// ```
pub async fn me_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    caller: VerifiedCaller,
) -> Result<Json<MeResponse>, ApiError> {
    let state = state_lock.read().await.clone();

    let user = UserRepository::new(state.db.clone())
        .find_or_create(&caller.identity)
        .await?;

    debug!(user_id = %user.id, is_admin = caller.is_admin, "Resolved current user");

    Ok(Json(MeResponse {
        user,
        is_admin: caller.is_admin,
    }))
}
