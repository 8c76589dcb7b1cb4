// src/devices/validators.rs

use super::models::*;
use crate::common::{ValidationResult, Validator};

pub struct DeviceTokenValidator;

impl Validator<RegisterDeviceRequest> for DeviceTokenValidator {
    fn validate(&self, data: &RegisterDeviceRequest) -> ValidationResult {
        let mut result = ValidationResult::new();

        // Tokens are opaque; only emptiness and size are checked
        if data.token.trim().is_empty() {
            result.add_error("token", "Device token is required");
        } else if data.token.len() > 4096 {
            result.add_error("token", "Device token must be less than 4096 characters");
        }

        if data.platform.parse::<Platform>().is_err() {
            result.add_error("platform", "Platform must be one of: ios, android");
        }

        result
    }
}
