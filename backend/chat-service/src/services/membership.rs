use crate::error::{AppError, AppResult};
use crate::models::{ConversationType, Member, MemberRole};
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

/// Read access to group and broadcast recipient sets
#[async_trait]
pub trait MembershipService: Send + Sync {
    /// Current members in insertion order. `NotFound` when the group or
    /// broadcast does not exist or has been deleted.
    async fn members(&self, kind: ConversationType, reference_id: &str) -> AppResult<Vec<Member>>;

    async fn recipients(&self, kind: ConversationType, reference_id: &str) -> AppResult<Vec<Uuid>> {
        Ok(self
            .members(kind, reference_id)
            .await?
            .into_iter()
            .map(|m| m.user_id)
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct MemberRecord {
    user_id: Uuid,
    role: Option<String>,
}

pub struct PgMembershipService {
    db: PgPool,
    timeout: Duration,
}

impl PgMembershipService {
    pub fn new(db: PgPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    async fn load(
        &self,
        exists_sql: &str,
        members_sql: &str,
        id: Uuid,
    ) -> Result<Option<Vec<MemberRecord>>, sqlx::Error> {
        let exists: Option<(Uuid,)> = sqlx::query_as(exists_sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }
        let rows = sqlx::query_as::<_, MemberRecord>(members_sql)
            .bind(id)
            .fetch_all(&self.db)
            .await?;
        Ok(Some(rows))
    }
}

#[async_trait]
impl MembershipService for PgMembershipService {
    async fn members(&self, kind: ConversationType, reference_id: &str) -> AppResult<Vec<Member>> {
        let (exists_sql, members_sql) = match kind {
            ConversationType::Group => (
                "SELECT id FROM groups WHERE id = $1 AND deleted_at IS NULL",
                "SELECT user_id, role FROM group_members WHERE group_id = $1 ORDER BY joined_at, user_id",
            ),
            ConversationType::Broadcast => (
                "SELECT id FROM broadcasts WHERE id = $1 AND deleted_at IS NULL",
                "SELECT user_id, NULL::text AS role FROM broadcast_members \
                 WHERE broadcast_id = $1 ORDER BY joined_at, user_id",
            ),
            ConversationType::Direct => {
                return Err(AppError::Validation(
                    "direct conversations have no membership".into(),
                ))
            }
        };

        let not_found = || AppError::NotFound(format!("{kind} {reference_id} not found"));
        let id = Uuid::parse_str(reference_id).map_err(|_| not_found())?;

        let lookup = self.load(exists_sql, members_sql, id);
        let rows = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(res) => res?,
            Err(_) => return Err(AppError::Transient("membership lookup timed out".into())),
        };

        let rows = rows.ok_or_else(not_found)?;
        Ok(rows
            .into_iter()
            .map(|r| Member {
                user_id: r.user_id,
                role: r.role.as_deref().and_then(MemberRole::from_db),
            })
            .collect())
    }
}
