// src/notifications/routes.rs

use axum::{
    routing::{get, patch, post},
    Router,
};

use super::handlers;

/// Creates and returns the notifications router
///
/// # Routes
/// - `POST /api/notifications` - Store a notification for the caller (no push)
/// - `GET /api/notifications` - List the caller's notifications
/// - `GET /api/notifications/unread/count` - Unread count as a bare number
/// - `POST /api/notifications/send` - Admin fan-out
/// - `POST /api/notifications/delivery-events` - Provider delivery webhook
/// - `GET /api/notifications/:id` - One of the caller's notifications
/// - `PATCH /api/notifications/:id/read` - Mark read
/// - `POST /api/notifications/:id/delivered` - Client delivery confirmation
pub fn notifications_routes() -> Router {
    Router::new()
        .route(
            "/api/notifications",
            get(handlers::list_notifications).post(handlers::create_notification),
        )
        .route("/api/notifications/unread/count", get(handlers::unread_count))
        .route("/api/notifications/send", post(handlers::send_notification))
        .route(
            "/api/notifications/delivery-events",
            post(handlers::delivery_events),
        )
        .route("/api/notifications/:id", get(handlers::get_notification))
        .route("/api/notifications/:id/read", patch(handlers::mark_as_read))
        .route(
            "/api/notifications/:id/delivered",
            post(handlers::confirm_delivered),
        )
}
