//! Per-user notification operations with ownership checks

use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;

use super::models::{
    encode_payload, CreateNotificationRequest, DeliveryStatus, ListOptions, NewNotification,
    Notification, Urgency,
};
use super::repository::NotificationRepository;
use crate::common::ApiError;

const NOT_FOUND: &str = "Notification not found";

pub struct NotificationService {
    repo: NotificationRepository,
}

impl NotificationService {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            repo: NotificationRepository::new(db),
        }
    }

    /// Store one notification for `user_id` at status pending.
    ///
    /// Pure data operation; nothing is pushed.
    pub async fn create(
        &self,
        user_id: &str,
        request: &CreateNotificationRequest,
    ) -> Result<Notification, ApiError> {
        let urgency = Urgency::try_from(request.urgency).map_err(ApiError::ValidationError)?;
        let payload = match &request.data {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        };

        let notification = self
            .repo
            .create(&NewNotification {
                user_id: user_id.to_string(),
                title: request.title.clone(),
                body: request.body.clone(),
                urgency,
                data: encode_payload(payload),
                delivery_status: DeliveryStatus::Pending,
            })
            .await?;

        info!(user_id = %user_id, notification_id = %notification.id, "Notification created");
        Ok(notification)
    }

    pub async fn find_all(
        &self,
        user_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Notification>, ApiError> {
        Ok(self.repo.find_many_by_user_id(user_id, options).await?)
    }

    /// Fetch one notification owned by `user_id`.
    ///
    /// Someone else's id is reported exactly like a missing one.
    pub async fn find_one(&self, user_id: &str, id: &str) -> Result<Notification, ApiError> {
        match self.repo.find_by_id(id).await? {
            Some(n) if n.user_id == user_id => Ok(n),
            _ => Err(ApiError::NotFound(NOT_FOUND.to_string())),
        }
    }

    pub async fn mark_as_read(&self, user_id: &str, id: &str) -> Result<Notification, ApiError> {
        self.find_one(user_id, id).await?;

        self.repo
            .mark_as_read(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(NOT_FOUND.to_string()))
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64, ApiError> {
        Ok(self.repo.count_unread(user_id).await?)
    }
}
