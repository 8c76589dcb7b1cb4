// src/devices/routes.rs

use axum::{
    routing::{delete, post},
    Router,
};

use super::handlers;

pub fn devices_routes() -> Router {
    Router::new()
        .route(
            "/api/notifications/device-token",
            post(handlers::register_device_token),
        )
        .route(
            "/api/notifications/device-token/:token",
            delete(handlers::remove_device_token),
        )
}
