//! Repository for the `notifications` table

use sqlx::SqlitePool;

use super::models::{DeliveryStatus, ListOptions, NewNotification, Notification};
use crate::common::{generate_notification_id, now_rfc3339};

/// Column list for the `notifications` table.
const COLUMNS: &str = "id, user_id, title, body, urgency, data, is_read, delivery_status, \
    created_at, updated_at";

const INSERT: &str = "INSERT INTO notifications \
    (id, user_id, title, body, urgency, data, is_read, delivery_status, created_at, updated_at) \
    VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)";

#[derive(Clone)]
pub struct NotificationRepository {
    db: SqlitePool,
}

impl NotificationRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    fn materialize(new: &NewNotification, now: &str) -> Notification {
        Notification {
            id: generate_notification_id(),
            user_id: new.user_id.clone(),
            title: new.title.clone(),
            body: new.body.clone(),
            urgency: new.urgency as i64,
            data: new.data.clone(),
            is_read: false,
            delivery_status: new.delivery_status.as_str().to_string(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }

    async fn insert<'e, E>(executor: E, row: &Notification) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(INSERT)
            .bind(&row.id)
            .bind(&row.user_id)
            .bind(&row.title)
            .bind(&row.body)
            .bind(row.urgency)
            .bind(&row.data)
            .bind(&row.delivery_status)
            .bind(&row.created_at)
            .bind(&row.updated_at)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn create(&self, new: &NewNotification) -> Result<Notification, sqlx::Error> {
        let row = Self::materialize(new, &now_rfc3339());
        Self::insert(&self.db, &row).await?;
        Ok(row)
    }

    /// Insert every row in one transaction; either all land or none do
    pub async fn create_many(
        &self,
        rows: &[NewNotification],
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let now = now_rfc3339();
        let rows: Vec<Notification> = rows.iter().map(|r| Self::materialize(r, &now)).collect();

        let mut tx = self.db.begin().await?;
        for row in &rows {
            Self::insert(&mut *tx, row).await?;
        }
        tx.commit().await?;

        Ok(rows)
    }

    /// Newest first; equal timestamps fall back to reverse insertion order
    pub async fn find_many_by_user_id(
        &self,
        user_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let filter = if options.is_read.is_some() {
            " AND is_read = ?"
        } else {
            ""
        };
        let query = format!(
            "SELECT {COLUMNS} FROM notifications WHERE user_id = ?{filter} \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        );

        let mut q = sqlx::query_as::<_, Notification>(&query).bind(user_id);
        if let Some(is_read) = options.is_read {
            q = q.bind(is_read);
        }
        q.bind(options.take).bind(options.skip).fetch_all(&self.db).await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Notification>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM notifications WHERE id = ?");
        sqlx::query_as::<_, Notification>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await
    }

    /// One-way and idempotent; `None` when the id does not exist
    pub async fn mark_as_read(&self, id: &str) -> Result<Option<Notification>, sqlx::Error> {
        sqlx::query("UPDATE notifications SET is_read = 1, updated_at = ? WHERE id = ? AND is_read = 0")
            .bind(now_rfc3339())
            .bind(id)
            .execute(&self.db)
            .await?;

        self.find_by_id(id).await
    }

    /// Move a row to `status` if its current status allows it.
    ///
    /// Returns whether the row changed; an unknown id or a disallowed
    /// transition both yield `false`.
    pub async fn update_delivery_status(
        &self,
        id: &str,
        status: DeliveryStatus,
    ) -> Result<bool, sqlx::Error> {
        let sources = status.allowed_sources();
        if sources.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; sources.len()].join(", ");
        let query = format!(
            "UPDATE notifications SET delivery_status = ?, updated_at = ? \
             WHERE id = ? AND delivery_status IN ({placeholders})"
        );

        let mut q = sqlx::query(&query)
            .bind(status.as_str())
            .bind(now_rfc3339())
            .bind(id);
        for source in sources {
            q = q.bind(source.as_str());
        }

        let result = q.execute(&self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_unread(&self, user_id: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0")
                .bind(user_id)
                .fetch_one(&self.db)
                .await?;
        Ok(count)
    }
}
