//! # Notifications Module
//!
//! Per-user notification history and the push fan-out engine:
//! - Notification store with read state and delivery status
//! - Fan-out coordinator (audience paging, batch dispatch, per-index status)
//! - Delivery reconciliation worker for late status updates

pub mod fanout;
pub mod handlers;
pub mod models;
pub mod reconcile;
pub mod repository;
pub mod routes;
pub mod service;
pub mod validators;


pub use fanout::FanoutConfig;
pub use reconcile::{spawn_reconciliation_worker, DeliveryReconciler};
pub use routes::notifications_routes;
