//! PostgreSQL implementation of the recipient directory.

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use herald_notifications::{EmailRecipient, NotificationError, PushRecipient, RecipientDirectory};

use crate::connection::{PostgresConfig, open_pool};
use crate::error::{PostgresError, Result};
use crate::migrations;

type PushRow = (String, bool, OffsetDateTime, Option<OffsetDateTime>);
type EmailRow = (String, Option<String>, bool, OffsetDateTime);

fn push_from_row((endpoint_token, enabled, created_at, disabled_at): PushRow) -> PushRecipient {
    PushRecipient {
        endpoint_token,
        enabled,
        created_at,
        disabled_at,
    }
}

fn email_from_row((address, display_name, enabled, subscribed_at): EmailRow) -> EmailRecipient {
    EmailRecipient {
        address,
        display_name,
        enabled,
        subscribed_at,
    }
}

fn db_error(e: sqlx_core::error::Error) -> NotificationError {
    PostgresError::Database(e).into()
}

/// Recipient directory backed by the `push_recipients` and
/// `email_recipients` tables.
#[derive(Debug, Clone)]
pub struct PostgresRecipientDirectory {
    pool: PgPool,
}

impl PostgresRecipientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the pool and, when configured, apply migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = open_pool(config).await?;
        if config.run_migrations {
            migrations::run(&pool).await?;
        }
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecipientDirectory for PostgresRecipientDirectory {
    #[instrument(skip(self))]
    async fn list_enabled_push(&self) -> std::result::Result<Vec<PushRecipient>, NotificationError> {
        let rows: Vec<PushRow> = query_as(
            r#"
            SELECT endpoint_token, enabled, created_at, disabled_at
            FROM push_recipients
            WHERE enabled
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        debug!(count = rows.len(), "Loaded enabled push recipients");
        Ok(rows.into_iter().map(push_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn list_enabled_email(
        &self,
    ) -> std::result::Result<Vec<EmailRecipient>, NotificationError> {
        let rows: Vec<EmailRow> = query_as(
            r#"
            SELECT address, display_name, enabled, subscribed_at
            FROM email_recipients
            WHERE enabled
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        debug!(count = rows.len(), "Loaded enabled email recipients");
        Ok(rows.into_iter().map(email_from_row).collect())
    }

    async fn get_push(
        &self,
        token: &str,
    ) -> std::result::Result<Option<PushRecipient>, NotificationError> {
        let row: Option<PushRow> = query_as(
            r#"
            SELECT endpoint_token, enabled, created_at, disabled_at
            FROM push_recipients
            WHERE endpoint_token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(push_from_row))
    }

    async fn upsert_push(
        &self,
        token: &str,
        at: OffsetDateTime,
    ) -> std::result::Result<PushRecipient, NotificationError> {
        let row: PushRow = query_as(
            r#"
            INSERT INTO push_recipients (endpoint_token, enabled, created_at, disabled_at)
            VALUES ($1, TRUE, $2, NULL)
            ON CONFLICT (endpoint_token) DO UPDATE
            SET enabled = TRUE, created_at = EXCLUDED.created_at, disabled_at = NULL
            RETURNING endpoint_token, enabled, created_at, disabled_at
            "#,
        )
        .bind(token)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(push_from_row(row))
    }

    async fn set_push_enabled(
        &self,
        token: &str,
        enabled: bool,
        at: OffsetDateTime,
    ) -> std::result::Result<bool, NotificationError> {
        // The `enabled <> $2` guard makes the update a no-op when nothing
        // changes, so `disabled_at` keeps the first transition time.
        let result = query(
            r#"
            UPDATE push_recipients
            SET enabled = $2,
                disabled_at = CASE WHEN $2 THEN NULL ELSE $3 END
            WHERE endpoint_token = $1 AND enabled <> $2
            "#,
        )
        .bind(token)
        .bind(enabled)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_push(&self, token: &str) -> std::result::Result<bool, NotificationError> {
        let result = query("DELETE FROM push_recipients WHERE endpoint_token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn list_push_disabled_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> std::result::Result<Vec<String>, NotificationError> {
        let rows: Vec<(String,)> = query_as(
            r#"
            SELECT endpoint_token
            FROM push_recipients
            WHERE NOT enabled AND disabled_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(|(token,)| token).collect())
    }

    async fn upsert_email(
        &self,
        recipient: &EmailRecipient,
    ) -> std::result::Result<(), NotificationError> {
        query(
            r#"
            INSERT INTO email_recipients (address, display_name, enabled, subscribed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (address) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                enabled = EXCLUDED.enabled,
                subscribed_at = EXCLUDED.subscribed_at
            "#,
        )
        .bind(&recipient.address)
        .bind(&recipient.display_name)
        .bind(recipient.enabled)
        .bind(recipient.subscribed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_mapping() {
        let now = OffsetDateTime::now_utc();
        let push = push_from_row(("tok".into(), false, now, Some(now)));
        assert_eq!(push.endpoint_token, "tok");
        assert!(!push.enabled);
        assert_eq!(push.disabled_at, Some(now));

        let email = email_from_row(("a@example.com".into(), Some("Ada".into()), true, now));
        assert_eq!(email.address, "a@example.com");
        assert_eq!(email.display_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_db_error_is_directory_unavailable() {
        let err = db_error(sqlx_core::error::Error::PoolClosed);
        assert!(matches!(err, NotificationError::DirectoryUnavailable(_)));
    }
}
