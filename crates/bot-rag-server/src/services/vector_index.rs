//! Similarity search over embeddings kept in the relational store.
//!
//! Candidates are narrowed by metadata containment in SQL; scoring and
//! ordering happen here.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::{EmbeddingRecord, EmbeddingStore};
use crate::models::metadata::{EmbeddingMetadata, MetadataFilter};
use crate::services::providers::EmbeddingProvider;
use crate::utils::error::CoreError;
use crate::utils::similarity::{cosine_similarity, validate_vector};

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub source_id: String,
    pub content: String,
    pub metadata: EmbeddingMetadata,
    pub similarity: f32,
}

/// What to delete. Exactly one selector per call.
#[derive(Debug, Clone)]
pub enum DeleteSelector {
    Ids(Vec<String>),
    Filter(MetadataFilter),
}

pub struct VectorIndex {
    store: Arc<dyn EmbeddingStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    dimension: usize,
}

impl VectorIndex {
    pub fn new(
        store: Arc<dyn EmbeddingStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        dimension: usize,
    ) -> Self {
        Self { store, embedder, dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Store a vector. Re-inserting an existing source id is a no-op.
    /// Returns the source id used.
    pub async fn insert(
        &self,
        source_id: Option<String>,
        content: &str,
        vector: Vec<f32>,
        metadata: EmbeddingMetadata,
    ) -> Result<String, CoreError> {
        validate_vector(&vector, self.dimension).map_err(CoreError::Validation)?;

        let source_id = source_id.unwrap_or_else(|| format!("embedding:{}", Uuid::new_v4()));
        let record = EmbeddingRecord {
            source_id,
            content: content.to_string(),
            vector,
            metadata,
        };

        let inserted = self
            .store
            .insert_embedding(&record)
            .await
            .map_err(CoreError::persistence)?;
        if inserted {
            debug!("Indexed {}", record.source_id);
        }
        Ok(record.source_id)
    }

    /// Embed `content` and store it under `source_id`.
    pub async fn insert_text(
        &self,
        source_id: String,
        content: &str,
        metadata: EmbeddingMetadata,
    ) -> Result<String, CoreError> {
        let vector = self.embedder.embed(content).await.map_err(CoreError::provider)?;
        self.insert(Some(source_id), content, vector, metadata).await
    }

    /// Top `k` by cosine similarity, descending; equal scores keep insertion order.
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, CoreError> {
        validate_vector(query, self.dimension).map_err(CoreError::Validation)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .store
            .embedding_candidates(filter)
            .await
            .map_err(CoreError::persistence)?;

        let mut scored = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match cosine_similarity(query, &candidate.embedding) {
                Ok(similarity) => scored.push((similarity, candidate)),
                Err(e) => warn!("Skipping {}: {}", candidate.source_id, e),
            }
        }

        scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then(a.seq.cmp(&b.seq)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(similarity, row)| SearchHit {
                source_id: row.source_id,
                content: row.content,
                metadata: row.metadata.0,
                similarity,
            })
            .collect())
    }

    pub async fn search_by_text(
        &self,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::validation("search text must not be empty"));
        }
        let query = self.embedder.embed(text).await.map_err(CoreError::provider)?;
        self.search(&query, k, filter).await
    }

    /// Returns the number of rows removed.
    pub async fn delete(&self, selector: DeleteSelector) -> Result<u64, CoreError> {
        match selector {
            DeleteSelector::Ids(ids) => {
                if ids.is_empty() {
                    return Err(CoreError::validation("delete requires at least one id"));
                }
                self.store
                    .delete_embeddings_by_ids(&ids)
                    .await
                    .map_err(CoreError::persistence)
            }
            DeleteSelector::Filter(filter) => {
                if filter.is_empty() {
                    return Err(CoreError::validation("delete filter must not be empty"));
                }
                self.store
                    .delete_embeddings_by_filter(&filter)
                    .await
                    .map_err(CoreError::persistence)
            }
        }
    }

    /// Subset of `source_ids` already present in the index.
    pub async fn indexed(&self, source_ids: &[String]) -> Result<HashSet<String>, CoreError> {
        self.store
            .indexed_sources(source_ids)
            .await
            .map_err(CoreError::persistence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::MockEmbeddingProvider;
    use crate::test::support::MemoryStore;

    fn index_with(embedder: MockEmbeddingProvider) -> (Arc<MemoryStore>, VectorIndex) {
        let store = Arc::new(MemoryStore::default());
        let index = VectorIndex::new(store.clone(), Arc::new(embedder), 3);
        (store, index)
    }

    fn meta(bot_id: i64) -> EmbeddingMetadata {
        EmbeddingMetadata {
            bot_id: Some(bot_id),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_exact_vector_comes_back_first() {
        let (_, index) = index_with(MockEmbeddingProvider::new());
        index.insert(Some("a".into()), "a", vec![1.0, 0.0, 0.0], meta(1)).await.unwrap();
        index.insert(Some("b".into()), "b", vec![0.2, 0.9, 0.1], meta(1)).await.unwrap();
        index.insert(Some("c".into()), "c", vec![0.0, 0.1, 1.0], meta(1)).await.unwrap();

        let hits = index.search(&[0.2, 0.9, 0.1], 3, None).await.unwrap();
        assert_eq!(hits[0].source_id, "b");
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let (_, index) = index_with(MockEmbeddingProvider::new());
        for id in ["first", "second", "third"] {
            index.insert(Some(id.into()), id, vec![0.0, 1.0, 0.0], meta(1)).await.unwrap();
        }
        let hits = index.search(&[0.0, 1.0, 0.0], 2, None).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.source_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_reinsert_is_noop() {
        let (store, index) = index_with(MockEmbeddingProvider::new());
        index.insert(Some("dup".into()), "one", vec![1.0, 0.0, 0.0], meta(1)).await.unwrap();
        index.insert(Some("dup".into()), "two", vec![0.0, 1.0, 0.0], meta(1)).await.unwrap();

        assert_eq!(store.embedding_count(), 1);
        let hits = index.search(&[1.0, 0.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits[0].content, "one");
    }

    #[tokio::test]
    async fn test_malformed_vectors_never_reach_storage() {
        let (store, index) = index_with(MockEmbeddingProvider::new());
        for bad in [vec![], vec![1.0, 2.0], vec![1.0, f32::NAN, 0.0], vec![f32::INFINITY, 0.0, 0.0]] {
            let err = index.insert(None, "x", bad, meta(1)).await.unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)));
        }
        assert_eq!(store.embedding_count(), 0);
    }

    #[tokio::test]
    async fn test_filter_restricts_candidates() {
        let (_, index) = index_with(MockEmbeddingProvider::new());
        index.insert(Some("bot1".into()), "x", vec![1.0, 0.0, 0.0], meta(1)).await.unwrap();
        index.insert(Some("bot2".into()), "y", vec![1.0, 0.0, 0.0], meta(2)).await.unwrap();

        let filter = MetadataFilter::new().bot_id(2);
        let hits = index.search(&[1.0, 0.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "bot2");
    }

    #[tokio::test]
    async fn test_search_by_text_embeds_once() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .times(1)
            .returning(|_| Ok(vec![0.0, 0.0, 1.0]));
        let (_, index) = index_with(embedder);
        index.insert(Some("z".into()), "z", vec![0.0, 0.0, 1.0], meta(1)).await.unwrap();

        let hits = index.search_by_text("anything", 1, None).await.unwrap();
        assert_eq!(hits[0].source_id, "z");
    }

    #[tokio::test]
    async fn test_provider_failure_propagates() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .returning(|_| Err(anyhow::anyhow!("backend down")));
        let (_, index) = index_with(embedder);

        let err = index.search_by_text("q", 1, None).await.unwrap_err();
        assert!(matches!(err, CoreError::Provider(_)));
    }

    #[tokio::test]
    async fn test_delete_selectors() {
        let (store, index) = index_with(MockEmbeddingProvider::new());
        index.insert(Some("a".into()), "a", vec![1.0, 0.0, 0.0], meta(1)).await.unwrap();
        index.insert(Some("b".into()), "b", vec![1.0, 0.0, 0.0], meta(2)).await.unwrap();
        index.insert(Some("c".into()), "c", vec![1.0, 0.0, 0.0], meta(2)).await.unwrap();

        assert!(index.delete(DeleteSelector::Ids(vec![])).await.is_err());
        assert!(index.delete(DeleteSelector::Filter(MetadataFilter::new())).await.is_err());

        assert_eq!(index.delete(DeleteSelector::Ids(vec!["a".into()])).await.unwrap(), 1);
        let removed = index
            .delete(DeleteSelector::Filter(MetadataFilter::new().bot_id(2)))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.embedding_count(), 0);
    }
}
