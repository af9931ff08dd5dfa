use crate::error::{AppError, AppResult};
use crate::models::{
    ConversationType, DeliveryState, FileAttachment, LifecycleStatus, Message, MessageBody,
    Participant,
};
use crate::services::message_store::{
    DeliveryFilter, HistoryFilter, MessageStore, Page, TransitionOutcome, UnreadSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

const COLUMNS: &str = "id, batch_id, fanout_index, conversation_type, reference_id, \
    sender_id, sender_name, receivers, message_type, content, image_name, \
    doc_name1, doc_name2, doc_name3, doc_icon, files, delivery_state, status, \
    is_forwarded, reply_to, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct MessageRecord {
    id: Uuid,
    batch_id: Uuid,
    fanout_index: i32,
    conversation_type: String,
    reference_id: String,
    sender_id: Uuid,
    sender_name: String,
    receivers: Json<Vec<Participant>>,
    message_type: String,
    content: String,
    image_name: Option<String>,
    doc_name1: Option<String>,
    doc_name2: Option<String>,
    doc_name3: Option<String>,
    doc_icon: Option<String>,
    files: Json<Vec<FileAttachment>>,
    delivery_state: String,
    status: String,
    is_forwarded: bool,
    reply_to: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = AppError;

    fn try_from(r: MessageRecord) -> Result<Self, Self::Error> {
        let conversation_type = ConversationType::from_db(&r.conversation_type).ok_or_else(|| {
            AppError::Database(format!("unknown conversation_type {}", r.conversation_type))
        })?;
        let delivery_state = DeliveryState::from_db(&r.delivery_state).ok_or_else(|| {
            AppError::Database(format!("unknown delivery_state {}", r.delivery_state))
        })?;
        let status = LifecycleStatus::from_db(&r.status)
            .ok_or_else(|| AppError::Database(format!("unknown status {}", r.status)))?;

        Ok(Message {
            id: r.id,
            batch_id: r.batch_id,
            fanout_index: r.fanout_index,
            conversation_type,
            reference_id: r.reference_id,
            sender: Participant {
                user_id: r.sender_id,
                name: r.sender_name,
            },
            receivers: r.receivers.0,
            body: MessageBody {
                message_type: r.message_type,
                content: r.content,
                image_name: r.image_name,
                doc_name1: r.doc_name1,
                doc_name2: r.doc_name2,
                doc_name3: r.doc_name3,
                doc_icon: r.doc_icon,
                files: r.files.0,
            },
            delivery_state,
            status,
            is_forwarded: r.is_forwarded,
            reply_to: r.reply_to,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn into_messages(records: Vec<MessageRecord>) -> AppResult<Vec<Message>> {
    records.into_iter().map(Message::try_from).collect()
}

fn push_contains_receiver(qb: &mut QueryBuilder<'_, Postgres>, user_id: Uuid) {
    qb.push("receiver_ids @> ARRAY[");
    qb.push_bind(user_id);
    qb.push("]::uuid[]");
}

fn push_history_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &HistoryFilter) {
    qb.push(" WHERE status = 'active' AND ");
    match *filter {
        HistoryFilter::Direct { user1, user2 } => {
            qb.push("conversation_type = 'direct' AND ((sender_id = ");
            qb.push_bind(user1);
            qb.push(" AND ");
            push_contains_receiver(qb, user2);
            qb.push(") OR (sender_id = ");
            qb.push_bind(user2);
            qb.push(" AND ");
            push_contains_receiver(qb, user1);
            qb.push("))");
        }
        HistoryFilter::Group { receiver } => {
            qb.push("conversation_type = 'group' AND ");
            push_contains_receiver(qb, receiver);
        }
        HistoryFilter::Broadcast { participant } => {
            qb.push("conversation_type = 'broadcast' AND (sender_id = ");
            qb.push_bind(participant);
            qb.push(" OR ");
            push_contains_receiver(qb, participant);
            qb.push(")");
        }
    }
}

fn push_delivery_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &DeliveryFilter) {
    qb.push(" WHERE status = 'active' AND delivery_state IN ('sent', 'unread') AND ");
    let receivers = match filter {
        DeliveryFilter::Direct { sender, receivers } => {
            qb.push("sender_id = ");
            qb.push_bind(*sender);
            receivers
        }
        DeliveryFilter::Group { receivers } => {
            qb.push("conversation_type = 'group'");
            receivers
        }
        DeliveryFilter::Broadcast { sender, receivers } => {
            qb.push("conversation_type = 'broadcast' AND sender_id = ");
            qb.push_bind(*sender);
            receivers
        }
    };
    qb.push(" AND receiver_ids && ");
    qb.push_bind(receivers.clone());
    qb.push("::uuid[]");
}

/// PostgreSQL-backed [`MessageStore`]
#[derive(Clone)]
pub struct PgMessageStore {
    db: PgPool,
    timeout: Duration,
}

impl PgMessageStore {
    pub fn new(db: PgPool, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    /// Run one store call under the configured timeout
    async fn timed<T, F>(&self, op: &'static str, fut: F) -> AppResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res.map_err(|e| {
                tracing::warn!(op, error = %e, "store call failed");
                AppError::from(e)
            }),
            Err(_) => {
                tracing::warn!(
                    op,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "store call timed out"
                );
                Err(AppError::Transient(format!("{op} timed out")))
            }
        }
    }
}

async fn insert_row<'e, E>(executor: E, m: &Message) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO chat_messages (
            id, batch_id, fanout_index, conversation_type, reference_id,
            sender_id, sender_name, receivers, receiver_ids, message_type, content,
            image_name, doc_name1, doc_name2, doc_name3, doc_icon, files,
            delivery_state, status, is_forwarded, reply_to, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23)
        "#,
    )
    .bind(m.id)
    .bind(m.batch_id)
    .bind(m.fanout_index)
    .bind(m.conversation_type.to_db())
    .bind(&m.reference_id)
    .bind(m.sender.user_id)
    .bind(&m.sender.name)
    .bind(Json(&m.receivers))
    .bind(m.receiver_ids())
    .bind(&m.body.message_type)
    .bind(&m.body.content)
    .bind(&m.body.image_name)
    .bind(&m.body.doc_name1)
    .bind(&m.body.doc_name2)
    .bind(&m.body.doc_name3)
    .bind(&m.body.doc_icon)
    .bind(Json(&m.body.files))
    .bind(m.delivery_state.to_db())
    .bind(m.status.to_db())
    .bind(m.is_forwarded)
    .bind(m.reply_to)
    .bind(m.created_at)
    .bind(m.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, message: &Message) -> AppResult<()> {
        self.timed("insert", insert_row(&self.db, message)).await
    }

    async fn insert_all(&self, messages: &[Message]) -> AppResult<()> {
        self.timed("insert_all", async {
            let mut tx = self.db.begin().await?;
            for m in messages {
                insert_row(&mut *tx, m).await?;
            }
            tx.commit().await
        })
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Message>> {
        let sql = format!("SELECT {COLUMNS} FROM chat_messages WHERE id = $1");
        let record = self
            .timed(
                "find_by_id",
                sqlx::query_as::<_, MessageRecord>(&sql)
                    .bind(id)
                    .fetch_optional(&self.db),
            )
            .await?;
        record.map(Message::try_from).transpose()
    }

    async fn find_many(&self, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {COLUMNS} FROM chat_messages WHERE id = ANY($1)");
        let records = self
            .timed(
                "find_many",
                sqlx::query_as::<_, MessageRecord>(&sql)
                    .bind(ids.to_vec())
                    .fetch_all(&self.db),
            )
            .await?;
        into_messages(records)
    }

    async fn update_content(&self, id: Uuid, content: &str) -> AppResult<Option<Message>> {
        let sql = format!(
            "UPDATE chat_messages SET content = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'active' RETURNING {COLUMNS}"
        );
        let record = self
            .timed(
                "update_content",
                sqlx::query_as::<_, MessageRecord>(&sql)
                    .bind(id)
                    .bind(content)
                    .fetch_optional(&self.db),
            )
            .await?;
        record.map(Message::try_from).transpose()
    }

    async fn history_page(&self, filter: &HistoryFilter, page: Page) -> AppResult<Vec<Message>> {
        let mut qb = QueryBuilder::<Postgres>::new("WITH matching AS (SELECT * FROM chat_messages");
        push_history_filter(&mut qb, filter);
        qb.push(
            "), page AS (\
                SELECT batch_id AS page_batch, MAX(created_at) AS page_created \
                FROM matching GROUP BY batch_id \
                ORDER BY MAX(created_at) DESC, batch_id DESC OFFSET ",
        );
        qb.push_bind(page.skip);
        qb.push(" LIMIT ");
        qb.push_bind(page.limit);
        qb.push(format!(
            ") SELECT {COLUMNS} FROM matching JOIN page ON page_batch = batch_id \
             ORDER BY page_created DESC, page_batch DESC, fanout_index ASC"
        ));

        let query = qb.build_query_as::<MessageRecord>();
        let records = self.timed("history_page", query.fetch_all(&self.db)).await?;
        into_messages(records)
    }

    async fn transition_delivery(
        &self,
        filter: &DeliveryFilter,
        state: DeliveryState,
    ) -> AppResult<TransitionOutcome> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "WITH matched AS (SELECT id, delivery_state FROM chat_messages",
        );
        push_delivery_filter(&mut qb, filter);
        qb.push(
            " FOR UPDATE), updated AS (\
                UPDATE chat_messages c SET delivery_state = ",
        );
        qb.push_bind(state.to_db());
        qb.push(", updated_at = NOW() FROM matched m WHERE c.id = m.id AND m.delivery_state <> ");
        qb.push_bind(state.to_db());
        qb.push(
            " RETURNING c.id) \
             SELECT (SELECT COUNT(*) FROM matched), (SELECT COUNT(*) FROM updated)",
        );

        let query = qb.build_query_as::<(i64, i64)>();
        let (matched, modified) = self
            .timed("transition_delivery", query.fetch_one(&self.db))
            .await?;
        Ok(TransitionOutcome {
            matched: matched.max(0) as u64,
            modified: modified.max(0) as u64,
        })
    }

    async fn set_delivery_state(&self, id: Uuid, state: DeliveryState) -> AppResult<bool> {
        let result = self
            .timed(
                "set_delivery_state",
                sqlx::query(
                    "UPDATE chat_messages SET delivery_state = $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(id)
                .bind(state.to_db())
                .execute(&self.db),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unread_for(&self, user_id: Uuid, limit: i64) -> AppResult<UnreadSummary> {
        const PENDING: &str = "status = 'active' AND delivery_state IN ('sent', 'unread') \
            AND receiver_ids @> ARRAY[$1]::uuid[]";

        let count_sql = format!("SELECT COUNT(*) FROM chat_messages WHERE {PENDING}");
        let (count,): (i64,) = self
            .timed(
                "unread_count",
                sqlx::query_as(&count_sql).bind(user_id).fetch_one(&self.db),
            )
            .await?;

        let list_sql = format!(
            "SELECT {COLUMNS} FROM chat_messages WHERE {PENDING} \
             ORDER BY created_at DESC, fanout_index ASC LIMIT $2"
        );
        let records = self
            .timed(
                "unread_list",
                sqlx::query_as::<_, MessageRecord>(&list_sql)
                    .bind(user_id)
                    .bind(limit)
                    .fetch_all(&self.db),
            )
            .await?;

        Ok(UnreadSummary {
            count,
            messages: into_messages(records)?,
        })
    }

    async fn soft_delete(&self, id: Uuid) -> AppResult<Option<Message>> {
        let sql = format!(
            "UPDATE chat_messages SET status = 'deleted', updated_at = NOW() \
             WHERE id = $1 RETURNING {COLUMNS}"
        );
        let record = self
            .timed(
                "soft_delete",
                sqlx::query_as::<_, MessageRecord>(&sql)
                    .bind(id)
                    .fetch_optional(&self.db),
            )
            .await?;
        record.map(Message::try_from).transpose()
    }
}
