//! User persistence

use sqlx::SqlitePool;
use tracing::info;

use super::models::User;
use super::verifier::VerifiedIdentity;
use crate::common::{generate_user_id, now_rfc3339, safe_email_log};

#[derive(Clone)]
pub struct UserRepository {
    db: SqlitePool,
}

impl UserRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.db)
            .await
    }

    /// Return the user for a verified identity, creating it on first sight.
    /// A changed email is written back.
    pub async fn find_or_create(&self, identity: &VerifiedIdentity) -> Result<User, sqlx::Error> {
        if let Some(user) = self.find_by_external_id(&identity.subject).await? {
            if user.email == identity.email {
                return Ok(user);
            }

            let now = now_rfc3339();
            sqlx::query("UPDATE users SET email = ?, updated_at = ? WHERE id = ?")
                .bind(&identity.email)
                .bind(&now)
                .bind(&user.id)
                .execute(&self.db)
                .await?;

            info!(user_id = %user.id, email = %safe_email_log(&identity.email), "Refreshed user email");
            return Ok(User {
                email: identity.email.clone(),
                updated_at: now,
                ..user
            });
        }

        let now = now_rfc3339();
        // Concurrent first logins race on external_id; the loser keeps the winner's row
        let inserted = sqlx::query(
            "INSERT INTO users (id, external_id, email, created_at, updated_at) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(external_id) DO NOTHING",
        )
        .bind(generate_user_id())
        .bind(&identity.subject)
        .bind(&identity.email)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        if inserted.rows_affected() > 0 {
            info!(email = %safe_email_log(&identity.email), "Created user for new identity");
        }

        self.find_by_external_id(&identity.subject)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }
}
