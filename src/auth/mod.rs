//! # Auth Module
//!
//! This module handles caller identity:
//! - Bearer credential verification (`IdentityVerifier`)
//! - User find-or-create on first login
//! - `AuthedUser` / `VerifiedCaller` extractors for protected routes

pub mod extractors;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod routes;
pub mod verifier;


pub use extractors::{AuthedUser, VerifiedCaller};
pub use routes::auth_routes;
pub use verifier::{IdentityConfig, IdentityVerifier, JwtIdentityVerifier, UnconfiguredVerifier};
