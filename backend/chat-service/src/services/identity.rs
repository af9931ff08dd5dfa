//! Identity lookups
//!
//! Users are owned by the identity service; the core only needs display names
//! at send time.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserIdentity {
    pub id: Uuid,
    pub name: String,
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Resolve a whole id set in one lookup; unknown ids are simply absent
    async fn find_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<UserIdentity>>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserIdentity>> {
        Ok(self.find_by_ids(&[id]).await?.into_iter().next())
    }
}

pub struct PgIdentityService {
    db: PgPool,
    timeout: Duration,
}

impl PgIdentityService {
    pub fn new(db: PgPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }
}

#[async_trait]
impl IdentityService for PgIdentityService {
    async fn find_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<UserIdentity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query =
            sqlx::query_as::<_, UserIdentity>("SELECT id, name FROM users WHERE id = ANY($1)")
                .bind(ids.to_vec())
                .fetch_all(&self.db);

        match tokio::time::timeout(self.timeout, query).await {
            Ok(res) => res.map_err(AppError::from),
            Err(_) => Err(AppError::Transient("identity lookup timed out".into())),
        }
    }
}
