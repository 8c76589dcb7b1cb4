//! Repository for the `device_tokens` table

use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{info, warn};

use super::models::{DeviceToken, Platform};
use crate::common::{generate_device_id, now_rfc3339, safe_token_log};

/// Column list for the `device_tokens` table.
const COLUMNS: &str = "id, user_id, token, platform, created_at, updated_at";

/// Keeps `IN (...)` lists well under SQLite's bind parameter limit
const USER_ID_CHUNK: usize = 500;

#[derive(Clone)]
pub struct DeviceTokenRepository {
    db: SqlitePool,
}

impl DeviceTokenRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Upsert by token.
    ///
    /// A token already registered to another user is re-parented to `user_id`;
    /// reinstalls and account switches on one device land here.
    pub async fn register_or_update(
        &self,
        user_id: &str,
        token: &str,
        platform: Platform,
    ) -> Result<DeviceToken, sqlx::Error> {
        let previous = self.find_by_token(token).await?;
        let now = now_rfc3339();

        sqlx::query(
            "INSERT INTO device_tokens (id, user_id, token, platform, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(token) DO UPDATE SET \
                user_id = excluded.user_id, \
                platform = excluded.platform, \
                updated_at = excluded.updated_at",
        )
        .bind(generate_device_id())
        .bind(user_id)
        .bind(token)
        .bind(platform.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        if let Some(prev) = previous.as_ref().filter(|p| p.user_id != user_id) {
            info!(
                token = %safe_token_log(token),
                from_user = %prev.user_id,
                to_user = %user_id,
                "Device token reassigned to new user"
            );
        }

        self.find_by_token(token)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<DeviceToken>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM device_tokens WHERE token = ?");
        sqlx::query_as::<_, DeviceToken>(&query)
            .bind(token)
            .fetch_optional(&self.db)
            .await
    }

    /// Every endpoint owned by any of `user_ids`.
    ///
    /// Duplicate ids are harmless; each endpoint appears once.
    pub async fn list_for_users(&self, user_ids: &[String]) -> Result<Vec<DeviceToken>, sqlx::Error> {
        let mut endpoints = Vec::new();
        let mut seen = HashSet::new();

        for chunk in user_ids.chunks(USER_ID_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let query = format!(
                "SELECT {COLUMNS} FROM device_tokens WHERE user_id IN ({placeholders}) ORDER BY id"
            );

            let mut q = sqlx::query_as::<_, DeviceToken>(&query);
            for id in chunk {
                q = q.bind(id);
            }
            let rows = q.fetch_all(&self.db).await?;

            // a user id repeated across chunks would otherwise return its endpoints twice
            for row in rows {
                if seen.insert(row.id.clone()) {
                    endpoints.push(row);
                }
            }
        }

        Ok(endpoints)
    }

    /// Unbounded scan of the whole registry; prefer `list_page`
    pub async fn list_all(&self) -> Result<Vec<DeviceToken>, sqlx::Error> {
        warn!("Loading every device token in one query; use list_page for large registries");
        let query = format!("SELECT {COLUMNS} FROM device_tokens ORDER BY id");
        sqlx::query_as::<_, DeviceToken>(&query)
            .fetch_all(&self.db)
            .await
    }

    /// Keyset page of endpoints with `id > after`, ordered by id.
    ///
    /// Pass the last id of the previous page as `after`; a page shorter than
    /// `limit` is the final one.
    pub async fn list_page(
        &self,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<DeviceToken>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM device_tokens WHERE id > ? ORDER BY id LIMIT ?"
        );
        sqlx::query_as::<_, DeviceToken>(&query)
            .bind(after.unwrap_or(""))
            .bind(limit as i64)
            .fetch_all(&self.db)
            .await
    }

    /// Idempotent removal; returns whether a row was deleted
    pub async fn delete_by_token(&self, token: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM device_tokens WHERE token = ?")
            .bind(token)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove `token` only when `user_id` owns it
    pub async fn delete_owned(&self, user_id: &str, token: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM device_tokens WHERE token = ? AND user_id = ?")
            .bind(token)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
