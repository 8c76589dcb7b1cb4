//! Authentication data models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Bearer token claims accepted by the identity verifier
#[derive(Serialize, Deserialize, Debug)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: usize,
}

/// User database model
///
/// `external_id` is the identity provider's subject and never changes;
/// `email` is refreshed on every `/api/auth/me` call.
#[derive(FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub external_id: String,
    pub email: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Response body of `GET /api/auth/me`
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: User,
    pub is_admin: bool,
}
