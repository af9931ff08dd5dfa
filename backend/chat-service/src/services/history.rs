//! History aggregation
//!
//! Pages over logical messages: rows sharing a `batch_id` collapse into one
//! entry before skip/limit apply, for every conversation type.

use crate::error::{AppError, AppResult};
use crate::models::{ConversationType, LogicalMessage, Message, ReplyPreview};
use crate::services::message_store::{HistoryFilter, MessageStore, Page};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "type")]
    pub conversation_type: Option<String>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

/// Collapse rows into logical messages, keeping first-seen order.
///
/// Scalar fields come from the first row of each batch; receivers and ids
/// accumulate across the batch.
pub fn collapse(rows: Vec<Message>) -> Vec<LogicalMessage> {
    let mut out: Vec<LogicalMessage> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();

    for row in rows {
        match index.get(&row.batch_id) {
            Some(&i) => {
                let logical = &mut out[i];
                logical.original_ids.push(row.id);
                for receiver in row.receivers {
                    if !logical.receivers.iter().any(|r| r.user_id == receiver.user_id) {
                        logical.receivers.push(receiver);
                    }
                }
            }
            None => {
                index.insert(row.batch_id, out.len());
                out.push(LogicalMessage::from(row));
            }
        }
    }

    out
}

pub struct HistoryService {
    store: Arc<dyn MessageStore>,
    max_limit: i64,
}

impl HistoryService {
    pub fn new(store: Arc<dyn MessageStore>, max_limit: i64) -> Self {
        Self { store, max_limit }
    }

    fn page(&self, query: &HistoryQuery) -> AppResult<Page> {
        let skip = query.skip.unwrap_or(0);
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
        if skip < 0 {
            return Err(AppError::Validation("skip must not be negative".into()));
        }
        if limit < 0 {
            return Err(AppError::Validation("limit must not be negative".into()));
        }
        Ok(Page {
            skip,
            limit: limit.min(self.max_limit),
        })
    }

    pub async fn conversation(
        &self,
        user1: Uuid,
        user2: Uuid,
        query: &HistoryQuery,
    ) -> AppResult<Vec<LogicalMessage>> {
        let page = self.page(query)?;
        if page.limit == 0 {
            return Ok(Vec::new());
        }

        let kind = ConversationType::from_query(query.conversation_type.as_deref());
        let filter = HistoryFilter::new(kind, user1, user2);
        let rows = self.store.history_page(&filter, page).await?;
        let mut messages = collapse(rows);

        self.attach_reply_previews(&mut messages).await?;

        tracing::debug!(
            %user1,
            %user2,
            conversation_type = %kind,
            skip = page.skip,
            limit = page.limit,
            returned = messages.len(),
            "history page loaded"
        );
        Ok(messages)
    }

    /// Resolve every referent on the page in one lookup
    async fn attach_reply_previews(&self, messages: &mut [LogicalMessage]) -> AppResult<()> {
        let mut ids: Vec<Uuid> = messages.iter().filter_map(|m| m.reply_to).collect();
        if ids.is_empty() {
            return Ok(());
        }
        ids.sort_unstable();
        ids.dedup();

        let referents: HashMap<Uuid, Message> = self
            .store
            .find_many(&ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        for message in messages.iter_mut() {
            if let Some(reply_to) = message.reply_to {
                message.reply_preview = Some(match referents.get(&reply_to) {
                    Some(referent) => ReplyPreview::of(referent),
                    None => ReplyPreview::unavailable(reply_to),
                });
            }
        }
        Ok(())
    }
}
