//! Bearer credential verification

use async_trait::async_trait;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use std::env;

use super::models::Claims;

/// Identity asserted by a verified bearer credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("missing credential")]
    Missing,

    #[error("credential expired")]
    Expired,

    #[error("invalid credential: {0}")]
    Invalid(String),

    #[error("identity verification unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, bearer: &str) -> Result<VerifiedIdentity, IdentityError>;
}

#[derive(Debug, Clone, Default)]
pub struct IdentityConfig {
    pub jwt_secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl IdentityConfig {
    pub fn from_env() -> Self {
        let non_empty = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            jwt_secret: non_empty("AUTH_JWT_SECRET"),
            issuer: non_empty("AUTH_ISSUER"),
            audience: non_empty("AUTH_AUDIENCE"),
        }
    }
}

/// HS256 bearer tokens signed with a shared secret
pub struct JwtIdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &str, issuer: Option<&str>, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // set_issuer/set_audience only compare claims that are present
        let mut required = vec!["exp"];
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
            required.push("iss");
        }
        if let Some(aud) = audience {
            validation.set_audience(&[aud]);
            required.push("aud");
        }
        validation.set_required_spec_claims(&required);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, bearer: &str) -> Result<VerifiedIdentity, IdentityError> {
        let decoded = decode::<Claims>(bearer, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => IdentityError::Expired,
                _ => IdentityError::Invalid(e.to_string()),
            }
        })?;

        let claims = decoded.claims;
        let email = claims
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| IdentityError::Invalid("token has no email claim".to_string()))?;

        Ok(VerifiedIdentity {
            subject: claims.sub,
            email,
        })
    }
}

/// Used when no verification secret is configured
pub struct UnconfiguredVerifier;

#[async_trait]
impl IdentityVerifier for UnconfiguredVerifier {
    async fn verify(&self, _bearer: &str) -> Result<VerifiedIdentity, IdentityError> {
        Err(IdentityError::Unavailable(
            "AUTH_JWT_SECRET is not configured".to_string(),
        ))
    }
}
