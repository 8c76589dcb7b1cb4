//! # Devices Module
//!
//! Device registry: which push endpoints belong to which user.
//! Tokens are unique system-wide and upserted on registration.

pub mod handlers;
pub mod models;
pub mod repository;
pub mod routes;
pub mod validators;

#[cfg(test)]
mod tests;

pub use models::DeviceToken;
pub use repository::DeviceTokenRepository;
pub use routes::devices_routes;
