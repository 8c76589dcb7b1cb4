//! # Push Module
//!
//! Everything that talks to the external push-messaging provider:
//! - `PushProvider` trait with the FCM HTTP v1 implementation
//! - `PushDispatcher`, which builds messages and bounds provider calls
//! - `RetryingProvider` with jittered backoff and a dead-letter table

pub mod dispatcher;
pub mod error;
pub mod fcm;
pub mod message;
pub mod provider;
pub mod retry;

use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

pub use dispatcher::{PushConfig, PushDispatcher};
pub use error::PushError;
pub use message::PushMessage;
pub use provider::{BatchResponse, DisabledProvider, PushProvider};
pub use retry::{RetryingProvider, SqliteDeadLetterSink};

use fcm::FcmProvider;

/// Wire the configured provider behind retry and deadline handling
pub fn build_dispatcher(config: &PushConfig, db: SqlitePool) -> PushDispatcher {
    let provider: Arc<dyn PushProvider> = match &config.fcm {
        Some(fcm_config) => {
            info!(
                project_id = %fcm_config.project_id,
                max_attempts = config.retry.max_attempts,
                "FCM push provider configured"
            );
            // HTTP deadline fires first so a slow token fails on its own
            let fcm = Arc::new(FcmProvider::new(
                fcm_config.clone(),
                config.retry.attempt_timeout * 9 / 10,
            ));
            Arc::new(RetryingProvider::new(
                fcm,
                config.retry.clone(),
                Arc::new(SqliteDeadLetterSink::new(db)),
            ))
        }
        None => {
            warn!("FCM credentials not set - push sends will fail until FCM_PROJECT_ID and credentials are configured");
            Arc::new(DisabledProvider)
        }
    };

    PushDispatcher::new(provider, config.effective_send_timeout())
}
