//! Postgres refresh-token store.
//!
//! Rotation claims a row with a conditional `UPDATE ... RETURNING` so two
//! concurrent rotations of the same token value cannot both win; insert
//! and prune share one transaction. Schema lives in `migrations/`.

use crate::errors::AuthError;
use crate::models::RefreshTokenRecord;
use crate::repositories::{RefreshTokenStore, Revocation};
use async_trait::async_trait;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

const INSERT_SQL: &str = r#"
    INSERT INTO refresh_tokens (
        id, user_id, token_value, created_at, expires_at, created_by_ip,
        is_revoked, revoked_at, revoked_by_ip, replaced_by_token
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
"#;

pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, AuthError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }
}

fn bind_record<'q>(
    query: Query<'q, Postgres, PgArguments>,
    record: &RefreshTokenRecord,
) -> Query<'q, Postgres, PgArguments> {
    query
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.token_value.clone())
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.created_by_ip.clone())
        .bind(record.is_revoked)
        .bind(record.revoked_at)
        .bind(record.revoked_by_ip.clone())
        .bind(record.replaced_by_token.clone())
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn insert_and_prune(
        &self,
        record: RefreshTokenRecord,
        keep: usize,
    ) -> Result<(), AuthError> {
        let mut tx = self.pool.begin().await?;

        bind_record(sqlx::query(INSERT_SQL), &record)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE user_id = $1
              AND id NOT IN (
                  SELECT id FROM refresh_tokens
                  WHERE user_id = $1
                  ORDER BY created_at DESC
                  LIMIT $2
              )
            "#,
        )
        .bind(record.user_id)
        .bind(keep as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_value(
        &self,
        token_value: &str,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let row = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT id, user_id, token_value, created_at, expires_at, created_by_ip,
                   is_revoked, revoked_at, revoked_by_ip, replaced_by_token
            FROM refresh_tokens
            WHERE token_value = $1
            "#,
        )
        .bind(token_value)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn rotate(
        &self,
        presented: &str,
        revocation: Revocation,
        replacement: RefreshTokenRecord,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let mut tx = self.pool.begin().await?;

        // The conditional update is the claim: only an unrevoked,
        // unexpired row matches, and row-level locking serializes racing
        // callers.
        let claimed = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = TRUE,
                revoked_at = $2,
                revoked_by_ip = $3,
                replaced_by_token = $4
            WHERE token_value = $1
              AND is_revoked = FALSE
              AND expires_at > $2
            RETURNING id, user_id, token_value, created_at, expires_at, created_by_ip,
                      is_revoked, revoked_at, revoked_by_ip, replaced_by_token
            "#,
        )
        .bind(presented)
        .bind(revocation.at)
        .bind(&revocation.by_ip)
        .bind(&replacement.token_value)
        .fetch_optional(&mut *tx)
        .await?;

        let claimed = match claimed {
            Some(row) => row,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        if claimed.user_id != replacement.user_id {
            tx.rollback().await?;
            return Err(AuthError::Persistence(
                "rotation replacement targets a different user".to_string(),
            ));
        }

        bind_record(sqlx::query(INSERT_SQL), &replacement)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(claimed))
    }

    async fn revoke(&self, token_value: &str, revocation: Revocation) -> Result<bool, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = TRUE,
                revoked_at = $2,
                revoked_by_ip = $3
            WHERE token_value = $1
              AND is_revoked = FALSE
              AND expires_at > $2
            "#,
        )
        .bind(token_value)
        .bind(revocation.at)
        .bind(&revocation.by_ip)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        revocation: Revocation,
    ) -> Result<u64, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = TRUE,
                revoked_at = $2,
                revoked_by_ip = $3
            WHERE user_id = $1
              AND is_revoked = FALSE
              AND expires_at > $2
            "#,
        )
        .bind(user_id)
        .bind(revocation.at)
        .bind(&revocation.by_ip)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_for_user(&self, user_id: Uuid) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let rows = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT id, user_id, token_value, created_at, expires_at, created_by_ip,
                   is_revoked, revoked_at, revoked_by_ip, replaced_by_token
            FROM refresh_tokens
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
