//! Notification store data models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_TAKE: i64 = 50;
pub const MAX_TAKE: i64 = 100;

/// The service's own record of a push attempt.
///
/// `Delivered` is only reached through reconciliation (client or provider
/// confirmation); fan-out writes `Sent` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Delivered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Delivered => "delivered",
        }
    }

    /// States a row may move out of to reach `self`.
    ///
    /// Nothing moves back to `Pending`, and a confirmed delivery is never
    /// downgraded by a late failure report.
    pub fn allowed_sources(&self) -> &'static [DeliveryStatus] {
        match self {
            DeliveryStatus::Pending => &[],
            DeliveryStatus::Sent => &[DeliveryStatus::Pending],
            DeliveryStatus::Failed => &[DeliveryStatus::Pending, DeliveryStatus::Sent],
            DeliveryStatus::Delivered => &[
                DeliveryStatus::Pending,
                DeliveryStatus::Sent,
                DeliveryStatus::Failed,
            ],
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            "delivered" => Ok(DeliveryStatus::Delivered),
            other => Err(format!("unknown delivery status '{}'", other)),
        }
    }
}

/// Urgency ordinal: 1 = low, 2 = medium, 3 = high
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl TryFrom<i64> for Urgency {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Urgency::Low),
            2 => Ok(Urgency::Medium),
            3 => Ok(Urgency::High),
            other => Err(format!("urgency must be 1, 2 or 3, got {}", other)),
        }
    }
}

/// Notification database model, one row per (recipient, message) pair
#[derive(FromRow, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub urgency: i64,
    /// Payload as the stored JSON string
    pub data: Option<String>,
    pub is_read: bool,
    pub delivery_status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Row to be inserted by `create` / `create_many`
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
    pub data: Option<String>,
    pub delivery_status: DeliveryStatus,
}

/// Serialize a request payload into the stored `data` column
pub fn encode_payload(payload: Option<&Map<String, Value>>) -> Option<String> {
    payload.map(|p| Value::Object(p.clone()).to_string())
}

// ============================================================================
// Requests / responses
// ============================================================================

#[derive(Deserialize, Debug)]
pub struct CreateNotificationRequest {
    pub title: String,
    pub body: String,
    pub urgency: i64,
    pub data: Option<Value>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    pub title: String,
    pub body: String,
    pub urgency: i64,
    pub data: Option<Value>,
    /// Absent or empty means every registered endpoint
    pub user_ids: Option<Vec<String>>,
}

/// Raw list query; values are parsed leniently like the mobile client expects
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub is_read: Option<String>,
    pub skip: Option<String>,
    pub take: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub is_read: Option<bool>,
    pub skip: i64,
    pub take: i64,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            is_read: None,
            skip: 0,
            take: DEFAULT_TAKE,
        }
    }
}

impl From<ListQuery> for ListOptions {
    fn from(query: ListQuery) -> Self {
        let parse = |raw: Option<String>| raw.and_then(|v| v.trim().parse::<i64>().ok());

        Self {
            // anything other than "true" filters for unread
            is_read: query.is_read.map(|v| v == "true"),
            skip: parse(query.skip).unwrap_or(0).max(0),
            take: parse(query.take)
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_TAKE)
                .min(MAX_TAKE),
        }
    }
}

/// Result of `POST /api/notifications/send`
#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_count: Option<usize>,
    pub message: String,
}

#[derive(Deserialize, Debug)]
pub struct DeliveryEventsRequest {
    pub events: Vec<super::reconcile::DeliveryEvent>,
}

#[derive(Serialize, Debug)]
pub struct AcceptedResponse {
    pub accepted: usize,
}
