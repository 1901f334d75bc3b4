//! In-memory refresh-token store.
//!
//! One mutex over the whole table gives the same per-row serializability
//! the Postgres implementation gets from conditional updates. Intended
//! for tests and single-process embedding.

use crate::errors::AuthError;
use crate::models::RefreshTokenRecord;
use crate::repositories::{RefreshTokenStore, Revocation};
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    rows: Mutex<Vec<RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_revocation(row: &mut RefreshTokenRecord, revocation: &Revocation) {
    row.is_revoked = true;
    row.revoked_at = Some(revocation.at);
    row.revoked_by_ip = Some(revocation.by_ip.clone());
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn insert_and_prune(
        &self,
        record: RefreshTokenRecord,
        keep: usize,
    ) -> Result<(), AuthError> {
        let mut rows = self.rows.lock().await;
        let user_id = record.user_id;
        rows.push(record);

        let mut user_rows: Vec<(Uuid, chrono::DateTime<chrono::Utc>)> = rows
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| (r.id, r.created_at))
            .collect();
        user_rows.sort_by(|a, b| b.1.cmp(&a.1));

        let evicted: Vec<Uuid> = user_rows.iter().skip(keep).map(|(id, _)| *id).collect();
        rows.retain(|r| !evicted.contains(&r.id));
        Ok(())
    }

    async fn find_by_value(
        &self,
        token_value: &str,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().find(|r| r.token_value == token_value).cloned())
    }

    async fn rotate(
        &self,
        presented: &str,
        revocation: Revocation,
        replacement: RefreshTokenRecord,
    ) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let mut rows = self.rows.lock().await;

        let claimed = match rows
            .iter_mut()
            .find(|r| r.token_value == presented && r.is_active(revocation.at))
        {
            Some(row) => {
                if row.user_id != replacement.user_id {
                    return Err(AuthError::Persistence(
                        "rotation replacement targets a different user".to_string(),
                    ));
                }
                apply_revocation(row, &revocation);
                row.replaced_by_token = Some(replacement.token_value.clone());
                row.clone()
            }
            None => return Ok(None),
        };

        rows.push(replacement);
        Ok(Some(claimed))
    }

    async fn revoke(&self, token_value: &str, revocation: Revocation) -> Result<bool, AuthError> {
        let mut rows = self.rows.lock().await;
        match rows
            .iter_mut()
            .find(|r| r.token_value == token_value && r.is_active(revocation.at))
        {
            Some(row) => {
                apply_revocation(row, &revocation);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        revocation: Revocation,
    ) -> Result<u64, AuthError> {
        let mut rows = self.rows.lock().await;
        let mut revoked = 0u64;
        for row in rows
            .iter_mut()
            .filter(|r| r.user_id == user_id && r.is_active(revocation.at))
        {
            apply_revocation(row, &revocation);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn find_for_user(&self, user_id: Uuid) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        let rows = self.rows.lock().await;
        let mut found: Vec<RefreshTokenRecord> = rows
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}
