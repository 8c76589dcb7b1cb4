//! Request body extractor that reports bad JSON as an `ApiError`

use async_trait::async_trait;
use axum::extract::{rejection::JsonRejection, FromRequest, Json, Request};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::ApiError;

/// `Json<T>` whose rejections (wrong content type, malformed JSON, a field of
/// the wrong type) become `400 VALIDATION_ERROR` in the usual error shape
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                debug!(status = %rejection.status(), "Rejected request body");
                Err(ApiError::from(rejection))
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::ValidationError(rejection.body_text())
    }
}
