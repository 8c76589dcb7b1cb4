// Application state shared across all modules

use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::auth::IdentityVerifier;
use crate::common::dev_mode::DevModeConfig;
use crate::notifications::fanout::FanoutConfig;
use crate::notifications::reconcile::DeliveryEvent;
use crate::push::PushDispatcher;

/// Application state containing database pool, services, and configuration
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub admin_emails: HashSet<String>,
    pub dev_mode: DevModeConfig,
    pub identity: Arc<dyn IdentityVerifier>,
    pub dispatcher: PushDispatcher,
    pub fanout: FanoutConfig,
    /// Inbound side of the delivery reconciliation worker
    pub delivery_events: mpsc::Sender<DeliveryEvent>,
    pub webhook_secret: Option<String>,
}
