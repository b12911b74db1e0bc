use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ReembedConfig;
use crate::database::{ChatLogMessage, MessageLog};
use crate::services::conversation::history::message_metadata;
use crate::services::vector_index::VectorIndex;
use crate::utils::error::CoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReembedReport {
    pub scanned: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Backfills embeddings for user chat messages that have none.
///
/// Pages are read with a (created_at, id) cursor; already embedded
/// messages never show up, so an interrupted run simply starts over.
pub struct ReembedJob {
    messages: Arc<dyn MessageLog>,
    index: Arc<VectorIndex>,
    config: ReembedConfig,
}

impl ReembedJob {
    pub fn new(messages: Arc<dyn MessageLog>, index: Arc<VectorIndex>, config: ReembedConfig) -> Self {
        Self { messages, index, config }
    }

    pub async fn run(&self) -> Result<ReembedReport, CoreError> {
        let page_size = self.config.page_size.max(1);
        let concurrency = self.config.concurrency.max(1);
        let delay = Duration::from_millis(self.config.delay_ms);

        info!(
            "Starting re-embed: page={}, concurrency={}, delay={:?}",
            page_size, concurrency, delay
        );

        let mut report = ReembedReport::default();
        let mut cursor: Option<(DateTime<Utc>, Uuid)> = None;
        let mut page_no = 0usize;

        loop {
            let page = self
                .messages
                .messages_missing_embedding(cursor, page_size as i64)
                .await
                .map_err(CoreError::persistence)?;
            if page.is_empty() {
                break;
            }
            page_no += 1;

            if let Some(last) = page.last() {
                cursor = Some((last.created_at, last.id));
            }
            let full_page = page.len() == page_size;
            report.scanned += page.len();

            let results: Vec<bool> = stream::iter(page)
                .map(|message| async move { self.embed_one(&message).await })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            let embedded = results.iter().filter(|ok| **ok).count();
            report.embedded += embedded;
            report.failed += results.len() - embedded;
            info!(
                "Re-embed page {}: {} embedded, {} failed",
                page_no,
                embedded,
                results.len() - embedded
            );

            if !full_page {
                break;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        info!(
            "Re-embed finished: scanned={}, embedded={}, failed={}",
            report.scanned, report.embedded, report.failed
        );
        Ok(report)
    }

    async fn embed_one(&self, message: &ChatLogMessage) -> bool {
        if message.content.trim().is_empty() {
            return false;
        }
        match self
            .index
            .insert_text(message.source_id(), &message.content, message_metadata(message))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to embed message {}: {}", message.id, e);
                false
            }
        }
    }
}
