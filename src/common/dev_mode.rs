// src/common/dev_mode.rs
//! Development mode configuration
//! Allows bypassing bearer verification with a fixed identity for local testing

use std::env;
use tracing::{info, warn};

use crate::auth::verifier::VerifiedIdentity;

/// Subject used for the dev identity so the same user row is reused across requests
const DEV_SUBJECT: &str = "dev-subject-0001";

#[derive(Debug, Clone)]
pub struct DevModeConfig {
    pub enabled: bool,
    pub user_email: String,
    pub user_is_admin: bool,
}

impl DevModeConfig {
    pub fn from_env() -> Self {
        let enabled = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .to_lowercase()
            == "true";

        let user_email = env::var("DEV_USER_EMAIL").unwrap_or_else(|_| "dev@test.com".to_string());

        let user_is_admin = env::var("DEV_USER_IS_ADMIN")
            .unwrap_or_else(|_| "false".to_string())
            .to_lowercase()
            == "true";

        Self {
            enabled,
            user_email,
            user_is_admin,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            user_email: String::new(),
            user_is_admin: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Identity handed to the auth extractor when dev mode is on
    pub fn dev_identity(&self) -> VerifiedIdentity {
        VerifiedIdentity {
            subject: DEV_SUBJECT.to_string(),
            email: self.user_email.clone(),
        }
    }
}

/// Log dev mode status on startup
pub fn log_dev_mode_status(config: &DevModeConfig) {
    if config.enabled {
        warn!(
            dev_user_email = %config.user_email,
            dev_user_is_admin = config.user_is_admin,
            "DEV MODE ENABLED - bearer verification bypassed, do not use in production"
        );
    } else {
        info!("Production mode - bearer verification required");
    }
}

/// CLI argument parsing for dev mode
fn parse_dev_mode_args<I: IntoIterator<Item = String>>(args: I) -> Option<bool> {
    let mut result = None;
    for arg in args {
        match arg.as_str() {
            "--dev" | "--dev-mode" => result = Some(true),
            "--no-dev" | "--prod" | "--production" => result = Some(false),
            _ => {}
        }
    }
    result
}

/// Override dev mode from CLI args; the last matching flag wins
pub fn apply_cli_override(mut config: DevModeConfig) -> DevModeConfig {
    if let Some(cli_dev_mode) = parse_dev_mode_args(env::args()) {
        info!(dev_mode = cli_dev_mode, "CLI override for DEV_MODE");
        config.enabled = cli_dev_mode;
    }

    config
}
