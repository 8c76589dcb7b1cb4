//! Device registry data models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Platform tag of a registered endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(format!("unsupported platform '{}'", other)),
        }
    }
}

/// Device endpoint database model
///
/// `token` is unique across all users; re-registering it moves the row to
/// the registering user.
#[derive(FromRow, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub platform: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Body of `POST /api/notifications/device-token`
#[derive(Deserialize, Debug)]
pub struct RegisterDeviceRequest {
    pub token: String,
    pub platform: String,
}

#[derive(Serialize, Debug)]
pub struct RemoveDeviceResponse {
    pub removed: bool,
}
