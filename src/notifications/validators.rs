// src/notifications/validators.rs

use serde_json::Value;

use super::models::*;
use crate::common::{ValidationResult, Validator};

/// Rules shared by single-create and fan-out requests
fn validate_message(
    result: &mut ValidationResult,
    title: &str,
    body: &str,
    urgency: i64,
    data: Option<&Value>,
) {
    if title.trim().is_empty() {
        result.add_error("title", "Title is required");
    }

    if body.trim().is_empty() {
        result.add_error("body", "Body is required");
    }

    if Urgency::try_from(urgency).is_err() {
        result.add_error("urgency", "Urgency must be 1, 2 or 3");
    }

    if let Some(data) = data {
        if !data.is_object() {
            result.add_error("data", "Data must be an object");
        }
    }
}

pub struct CreateNotificationValidator;

impl Validator<CreateNotificationRequest> for CreateNotificationValidator {
    fn validate(&self, data: &CreateNotificationRequest) -> ValidationResult {
        let mut result = ValidationResult::new();
        validate_message(
            &mut result,
            &data.title,
            &data.body,
            data.urgency,
            data.data.as_ref(),
        );
        result
    }
}

pub struct SendNotificationValidator;

impl Validator<SendNotificationRequest> for SendNotificationValidator {
    fn validate(&self, data: &SendNotificationRequest) -> ValidationResult {
        let mut result = ValidationResult::new();
        validate_message(
            &mut result,
            &data.title,
            &data.body,
            data.urgency,
            data.data.as_ref(),
        );

        if let Some(user_ids) = &data.user_ids {
            if user_ids.iter().any(|id| id.trim().is_empty()) {
                result.add_error("userIds", "User ids must be non-empty strings");
            }
        }

        result
    }
}
