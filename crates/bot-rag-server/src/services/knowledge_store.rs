use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::database::{knowledge_source_id, KnowledgeEntry, KnowledgeRepository};
use crate::models::metadata::{EmbeddingMetadata, MetadataFilter, Provenance};
use crate::services::providers::EmbeddingProvider;
use crate::services::vector_index::{DeleteSelector, SearchHit, VectorIndex};
use crate::utils::error::CoreError;
use crate::utils::similarity::validate_vector;

/// Bot-scoped taught facts, each mirrored by one embedding.
pub struct KnowledgeStore {
    repo: Arc<dyn KnowledgeRepository>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl KnowledgeStore {
    pub fn new(
        repo: Arc<dyn KnowledgeRepository>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self { repo, index, embedder }
    }

    fn bot_filter(bot_id: i64) -> MetadataFilter {
        MetadataFilter::new().bot_id(bot_id).provenance(Provenance::Knowledge)
    }

    /// Embeds first so a provider failure leaves nothing behind.
    pub async fn add_entry(
        &self,
        bot_id: i64,
        content: &str,
        metadata: EmbeddingMetadata,
    ) -> Result<KnowledgeEntry, CoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CoreError::validation("knowledge content must not be empty"));
        }

        let vector = self.embedder.embed(content).await.map_err(CoreError::provider)?;
        validate_vector(&vector, self.index.dimension()).map_err(CoreError::Validation)?;

        let entry = self
            .repo
            .insert_knowledge(bot_id, content, &metadata)
            .await
            .map_err(CoreError::persistence)?;

        let mut indexed = metadata;
        indexed.bot_id = Some(bot_id);
        indexed.provenance = Some(Provenance::Knowledge);
        indexed.knowledge_id = Some(entry.id.to_string());
        indexed.created_at = Some(entry.created_at);

        if let Err(e) = self
            .index
            .insert(Some(entry.source_id()), content, vector, indexed)
            .await
        {
            warn!("Indexing knowledge {} failed, rolling back: {}", entry.id, e);
            if let Err(cleanup) = self.repo.delete_knowledge(bot_id, entry.id).await {
                warn!("Rollback of knowledge {} failed: {}", entry.id, cleanup);
            }
            return Err(e);
        }

        info!("Bot {} learned knowledge {}", bot_id, entry.id);
        Ok(entry)
    }

    pub async fn search(&self, bot_id: i64, query: &str, k: usize) -> Result<Vec<SearchHit>, CoreError> {
        let filter = Self::bot_filter(bot_id);
        self.index.search_by_text(query, k, Some(&filter)).await
    }

    pub async fn list(&self, bot_id: i64, limit: i64, offset: i64) -> Result<Vec<KnowledgeEntry>, CoreError> {
        self.repo
            .list_knowledge(bot_id, limit, offset)
            .await
            .map_err(CoreError::persistence)
    }

    pub async fn delete_entry(&self, bot_id: i64, id: Uuid) -> Result<bool, CoreError> {
        let deleted = self
            .repo
            .delete_knowledge(bot_id, id)
            .await
            .map_err(CoreError::persistence)?;
        if deleted {
            self.index
                .delete(DeleteSelector::Ids(vec![knowledge_source_id(id)]))
                .await?;
        }
        Ok(deleted)
    }

    /// Drop every entry of the bot together with its embeddings.
    pub async fn reset(&self, bot_id: i64) -> Result<u64, CoreError> {
        let removed = self
            .repo
            .delete_bot_knowledge(bot_id)
            .await
            .map_err(CoreError::persistence)?;
        let vectors = self
            .index
            .delete(DeleteSelector::Filter(Self::bot_filter(bot_id)))
            .await?;
        info!("Reset knowledge of bot {}: {} entries, {} embeddings", bot_id, removed, vectors);
        Ok(removed)
    }
}
