//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::repository::UserRepository;
use super::verifier::{IdentityError, VerifiedIdentity};
use crate::common::{safe_email_log, ApiError, AppState};

async fn app_state<S: Send + Sync>(parts: &mut Parts, state: &S) -> Result<AppState, ApiError> {
    let Extension(state_lock): Extension<Arc<RwLock<AppState>>> =
        Extension::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

    let app_state = state_lock.read().await.clone();
    Ok(app_state)
}

/// Caller whose bearer credential verified, whether or not a user row exists yet
#[derive(Debug)]
pub struct VerifiedCaller {
    pub identity: VerifiedIdentity,
    pub is_admin: bool,
}

impl VerifiedCaller {
    async fn from_state(parts: &Parts, app_state: &AppState) -> Result<Self, ApiError> {
        // DEV MODE: fixed identity, no credential required
        if app_state.dev_mode.is_enabled() {
            let identity = app_state.dev_mode.dev_identity();
            let is_admin = app_state.dev_mode.user_is_admin
                || app_state.admin_emails.contains(&identity.email.to_lowercase());

            debug!(
                email = %safe_email_log(&identity.email),
                is_admin = is_admin,
                "DEV MODE: Authentication bypassed"
            );
            return Ok(Self { identity, is_admin });
        }

        let header = match parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
        {
            Some(h) => h,
            None => {
                warn!("Authentication failed: missing Authorization header");
                return Err(IdentityError::Missing.into());
            }
        };

        // Handle "Bearer <token>" format or raw token
        let bearer = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        if bearer.is_empty() {
            return Err(IdentityError::Missing.into());
        }

        let identity = app_state.identity.verify(bearer).await.map_err(|e| {
            warn!(error = %e, "Bearer verification failed");
            ApiError::from(e)
        })?;

        let is_admin = app_state
            .admin_emails
            .contains(&identity.email.to_lowercase());

        Ok(Self { identity, is_admin })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for VerifiedCaller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = app_state(parts, state).await?;
        Self::from_state(parts, &app_state).await
    }
}

/// Authenticated user extractor
///
/// Verifies the bearer credential, then loads the local user row by the
/// identity's subject. A verified caller without a row gets 404
/// "User not found"; the row is created by `GET /api/auth/me`.
#[derive(Debug)]
pub struct AuthedUser {
    pub id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = app_state(parts, state).await?;
        let caller = VerifiedCaller::from_state(parts, &app_state).await?;

        let users = UserRepository::new(app_state.db.clone());
        let user = if app_state.dev_mode.is_enabled() {
            // dev identity has no sign-up step
            Some(users.find_or_create(&caller.identity).await?)
        } else {
            users.find_by_external_id(&caller.identity.subject).await?
        };

        match user {
            Some(u) => {
                debug!(
                    user_id = %u.id,
                    email = %safe_email_log(&u.email),
                    is_admin = caller.is_admin,
                    "User authentication successful via extractor"
                );
                Ok(AuthedUser { id: u.id })
            }
            None => {
                warn!(
                    email = %safe_email_log(&caller.identity.email),
                    "Authenticated identity has no user row"
                );
                Err(ApiError::NotFound("User not found".to_string()))
            }
        }
    }
}
