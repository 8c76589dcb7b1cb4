//! Delivery reconciliation
//!
//! Status updates that arrive after a fan-out (client confirmations,
//! provider callbacks, invalid-token feedback) are queued on a bounded
//! channel and applied by a background worker, independent of the request
//! that produced them.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::models::DeliveryStatus;
use super::repository::NotificationRepository;
use crate::common::safe_token_log;
use crate::devices::DeviceTokenRepository;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeliveryEvent {
    Delivered {
        #[serde(rename = "notificationId")]
        notification_id: String,
    },
    Failed {
        #[serde(rename = "notificationId")]
        notification_id: String,
    },
    /// Provider reported the token permanently unusable
    TokenInvalidated { token: String },
}

pub struct DeliveryReconciler {
    notifications: NotificationRepository,
    devices: DeviceTokenRepository,
}

impl DeliveryReconciler {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            notifications: NotificationRepository::new(db.clone()),
            devices: DeviceTokenRepository::new(db),
        }
    }

    /// Apply one event; returns whether anything changed
    pub async fn apply(&self, event: &DeliveryEvent) -> Result<bool, sqlx::Error> {
        match event {
            DeliveryEvent::Delivered { notification_id } => {
                self.set_status(notification_id, DeliveryStatus::Delivered)
                    .await
            }
            DeliveryEvent::Failed { notification_id } => {
                self.set_status(notification_id, DeliveryStatus::Failed).await
            }
            DeliveryEvent::TokenInvalidated { token } => {
                let removed = self.devices.delete_by_token(token).await?;
                if removed {
                    info!(token = %safe_token_log(token), "Removed invalidated device token");
                } else {
                    debug!(token = %safe_token_log(token), "Invalidated token already gone");
                }
                Ok(removed)
            }
        }
    }

    async fn set_status(&self, id: &str, status: DeliveryStatus) -> Result<bool, sqlx::Error> {
        let changed = self.notifications.update_delivery_status(id, status).await?;
        if changed {
            info!(notification_id = %id, status = %status, "Delivery status updated");
        } else {
            debug!(
                notification_id = %id,
                status = %status,
                "Delivery event ignored (unknown id or no valid transition)"
            );
        }
        Ok(changed)
    }
}

pub fn delivery_channel(capacity: usize) -> (mpsc::Sender<DeliveryEvent>, mpsc::Receiver<DeliveryEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Drain `events` until every sender is dropped
pub fn spawn_reconciliation_worker(
    reconciler: DeliveryReconciler,
    mut events: mpsc::Receiver<DeliveryEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Delivery reconciliation worker started");
        while let Some(event) = events.recv().await {
            if let Err(e) = reconciler.apply(&event).await {
                error!(error = %e, event = ?event, "Failed to apply delivery event");
            }
        }
        info!("Delivery reconciliation worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::migrations::test_support::{insert_user, setup_test_db};
    use crate::devices::models::Platform;
    use crate::notifications::models::{NewNotification, Urgency};

    async fn seed(pool: &SqlitePool, status: DeliveryStatus) -> String {
        NotificationRepository::new(pool.clone())
            .create(&NewNotification {
                user_id: "u1".to_string(),
                title: "Hi".to_string(),
                body: "Yo".to_string(),
                urgency: Urgency::Low,
                data: None,
                delivery_status: status,
            })
            .await
            .unwrap()
            .id
    }

    async fn status_of(pool: &SqlitePool, id: &str) -> String {
        NotificationRepository::new(pool.clone())
            .find_by_id(id)
            .await
            .unwrap()
            .unwrap()
            .delivery_status
    }

    #[test]
    fn test_event_wire_format() {
        let event: DeliveryEvent =
            serde_json::from_str(r#"{"type":"delivered","notificationId":"N_1"}"#).unwrap();
        assert_eq!(
            event,
            DeliveryEvent::Delivered {
                notification_id: "N_1".to_string()
            }
        );

        let event: DeliveryEvent =
            serde_json::from_str(r#"{"type":"tokenInvalidated","token":"tokA"}"#).unwrap();
        assert_eq!(
            event,
            DeliveryEvent::TokenInvalidated {
                token: "tokA".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_delivered_and_failed_transitions() {
        let pool = setup_test_db().await;
        insert_user(&pool, "u1").await;
        let reconciler = DeliveryReconciler::new(pool.clone());
        let id = seed(&pool, DeliveryStatus::Sent).await;

        let changed = reconciler
            .apply(&DeliveryEvent::Delivered {
                notification_id: id.clone(),
            })
            .await
            .unwrap();
        assert!(changed);
        assert_eq!(status_of(&pool, &id).await, "delivered");

        // late failure report does not downgrade a confirmed delivery
        let changed = reconciler
            .apply(&DeliveryEvent::Failed {
                notification_id: id.clone(),
            })
            .await
            .unwrap();
        assert!(!changed);
        assert_eq!(status_of(&pool, &id).await, "delivered");
    }

    #[tokio::test]
    async fn test_unknown_notification_is_ignored() {
        let pool = setup_test_db().await;
        let reconciler = DeliveryReconciler::new(pool);

        let changed = reconciler
            .apply(&DeliveryEvent::Delivered {
                notification_id: "N_missing".to_string(),
            })
            .await
            .unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn test_worker_removes_invalidated_tokens() {
        let pool = setup_test_db().await;
        insert_user(&pool, "u1").await;
        let devices = DeviceTokenRepository::new(pool.clone());
        devices
            .register_or_update("u1", "tokDead", Platform::Android)
            .await
            .unwrap();

        let (tx, rx) = delivery_channel(8);
        let worker = spawn_reconciliation_worker(DeliveryReconciler::new(pool.clone()), rx);

        tx.send(DeliveryEvent::TokenInvalidated {
            token: "tokDead".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        worker.await.unwrap();

        assert!(devices.find_by_token("tokDead").await.unwrap().is_none());
    }
}
