use std::{sync::Arc, time::Instant};

use common::{Document, DocumentStore, SearchConfig};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    enhance::QueryEnhancer,
    error::Result,
    fusion::{FusedHit, FusionStrategy, Hit, fuse},
    generation::TextGenerator,
    rerank::{RerankMode, Reranker},
};

/// One retrieval signal: a ranked list of at most `limit` hits, best first.
pub trait RankedSource: Send + Sync {
    fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Hit>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document: Arc<Document>,
    pub fused: FusedHit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_rank: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub strategy: FusionStrategy,
    pub limit: usize,
    pub enhance: Option<String>,
    pub rerank: Option<String>,
}

impl SearchOptions {
    pub fn rrf(k: usize, limit: usize) -> Self {
        Self {
            strategy: FusionStrategy::Rrf { k },
            limit,
            enhance: None,
            rerank: None,
        }
    }

    pub fn weighted(alpha: f32, limit: usize) -> Self {
        Self {
            strategy: FusionStrategy::Weighted { alpha },
            limit,
            enhance: None,
            rerank: None,
        }
    }

    #[must_use]
    pub fn with_enhance(mut self, tag: impl Into<String>) -> Self {
        self.enhance = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_rerank(mut self, tag: impl Into<String>) -> Self {
        self.rerank = Some(tag.into());
        self
    }
}

/// Request pipeline: optional enhance, retrieve and fuse, optional rerank,
/// truncate.
pub struct HybridSearch {
    lexical: Box<dyn RankedSource>,
    semantic: Box<dyn RankedSource>,
    documents: DocumentStore,
    enhancer: QueryEnhancer,
    reranker: Reranker,
    config: SearchConfig,
}

impl HybridSearch {
    pub fn new(
        lexical: Box<dyn RankedSource>,
        semantic: Box<dyn RankedSource>,
        documents: DocumentStore,
        generator: Arc<dyn TextGenerator>,
        config: SearchConfig,
    ) -> Self {
        Self {
            lexical,
            semantic,
            documents,
            enhancer: QueryEnhancer::new(generator.clone(), config.enhance_model.clone()),
            reranker: Reranker::new(generator, config.rerank_model.clone()),
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn weighted_search(&self, query: &str, alpha: f32, limit: usize) -> Result<Vec<SearchHit>> {
        self.search(query, &SearchOptions::weighted(alpha, limit))
    }

    pub fn rrf_search(&self, query: &str, k: usize, limit: usize) -> Result<Vec<SearchHit>> {
        self.search(query, &SearchOptions::rrf(k, limit))
    }

    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "hybrid_search",
            %request_id,
            strategy = options.strategy.name(),
            limit = options.limit
        );
        let _entered = span.enter();
        let started = Instant::now();

        let query = match options.enhance.as_deref() {
            Some(tag) => self.enhancer.enhance(query, tag)?,
            None => query.to_string(),
        };

        let rerank = options.rerank.as_deref().and_then(|tag| {
            let mode = RerankMode::parse(tag);
            if mode.is_none() {
                tracing::warn!(mode = tag, "unknown rerank mode, rerank skipped");
            }
            mode
        });
        let fused_count = rerank.map_or(options.limit, |mode| {
            options
                .limit
                .saturating_mul(mode.candidate_multiplier(&self.config))
        });

        let candidates = self.retrieve_fused(&query, options.strategy, fused_count)?;
        let mut hits = match rerank {
            Some(mode) => {
                tracing::debug!(mode = ?mode, candidates = candidates.len(), "reranking");
                self.reranker.rerank(mode, &query, candidates, options.limit)?
            }
            None => candidates,
        };
        hits.truncate(options.limit);

        tracing::info!(
            query = %query,
            results = hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search_complete"
        );
        Ok(hits)
    }

    fn retrieve_fused(
        &self,
        query: &str,
        strategy: FusionStrategy,
        count: usize,
    ) -> Result<Vec<SearchHit>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let per_source = count.saturating_mul(self.config.retrieval_oversample.max(1));
        let (lexical, semantic) = rayon::join(
            || self.lexical.search(query, per_source),
            || self.semantic.search(query, per_source),
        );
        let (lexical, semantic) = (lexical?, semantic?);
        tracing::debug!(
            per_source,
            lexical = lexical.len(),
            semantic = semantic.len(),
            "sources retrieved"
        );

        // Fuse every candidate so hits without a corpus document do not eat
        // into `count`.
        let candidates = lexical.len() + semantic.len();
        let hits = fuse(strategy, &lexical, &semantic, candidates)
            .into_iter()
            .filter_map(|fused| match self.documents.get(fused.doc_id) {
                Some(document) => Some(SearchHit {
                    document,
                    fused,
                    rerank_score: None,
                    rerank_rank: None,
                }),
                None => {
                    tracing::warn!(doc_id = fused.doc_id, "fused hit has no corpus document");
                    None
                }
            })
            .take(count)
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use common::{Document, DocumentStore, SearchConfig};

    use super::{HybridSearch, RankedSource, SearchOptions};
    use crate::{
        fusion::Hit,
        generation::{Generation, TextGenerator},
    };

    struct Fixed {
        ids: Vec<u64>,
        limits: Arc<Mutex<Vec<usize>>>,
    }

    impl RankedSource for Fixed {
        fn search(&self, _query: &str, limit: usize) -> anyhow::Result<Vec<Hit>> {
            self.limits.lock().expect("lock").push(limit);
            Ok(self
                .ids
                .iter()
                .take(limit)
                .enumerate()
                .map(|(i, id)| Hit::ranked(*id, i + 1, 1.0 / (i as f32 + 1.0)))
                .collect())
        }
    }

    struct Silent;

    impl TextGenerator for Silent {
        fn generate(&self, _model: &str, _prompt: &str) -> anyhow::Result<Generation> {
            anyhow::bail!("no model in this test")
        }
    }

    fn engine(lexical: &[u64], semantic: &[u64], limits: &Arc<Mutex<Vec<usize>>>) -> HybridSearch {
        let documents = DocumentStore::new((1..=4).map(|id| Document::new(id, format!("M{id}"), "")));
        let config = SearchConfig {
            retrieval_oversample: 3,
            ..SearchConfig::default()
        };
        HybridSearch::new(
            Box::new(Fixed {
                ids: lexical.to_vec(),
                limits: limits.clone(),
            }),
            Box::new(Fixed {
                ids: semantic.to_vec(),
                limits: limits.clone(),
            }),
            documents,
            Arc::new(Silent),
            config,
        )
    }

    #[test]
    fn sources_are_oversampled_by_configured_factor() {
        let limits = Arc::new(Mutex::new(Vec::new()));
        engine(&[1, 2], &[2, 3], &limits)
            .rrf_search("q", 60, 2)
            .expect("search");
        assert_eq!(*limits.lock().expect("lock"), vec![6, 6]);
    }

    #[test]
    fn unknown_rerank_tag_keeps_fused_order() {
        let limits = Arc::new(Mutex::new(Vec::new()));
        let hits = engine(&[1, 2, 3], &[1, 2, 3], &limits)
            .search("q", &SearchOptions::rrf(60, 2).with_rerank("telepathic"))
            .expect("search");
        let ids = hits.iter().map(|h| h.document.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2]);
        assert!(hits.iter().all(|h| h.rerank_rank.is_none()));
        assert_eq!(*limits.lock().expect("lock"), vec![6, 6]);
    }

    #[test]
    fn hits_without_corpus_document_are_skipped() {
        let limits = Arc::new(Mutex::new(Vec::new()));
        let hits = engine(&[99, 1], &[], &limits)
            .rrf_search("q", 60, 5)
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, 1);
    }

    #[test]
    fn skipped_hits_are_backfilled_from_below_the_cut() {
        let limits = Arc::new(Mutex::new(Vec::new()));
        let hits = engine(&[99, 1, 2, 3], &[], &limits)
            .rrf_search("q", 60, 2)
            .expect("search");
        let ids = hits.iter().map(|h| h.document.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn zero_limit_skips_retrieval() {
        let limits = Arc::new(Mutex::new(Vec::new()));
        let hits = engine(&[1], &[1], &limits)
            .weighted_search("q", 0.5, 0)
            .expect("search");
        assert!(hits.is_empty());
        assert!(limits.lock().expect("lock").is_empty());
    }
}
