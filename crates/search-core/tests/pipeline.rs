use std::sync::{Arc, Mutex};

use common::{Document, DocumentStore, SearchConfig};
use search_core::{
    Generation, Hit, HybridSearch, RankedSource, SearchError, SearchOptions, TextGenerator,
    TokenUsage,
};

const A: u64 = 1;
const B: u64 = 2;
const C: u64 = 3;
const D: u64 = 4;

struct Scripted(Vec<(u64, f32)>);

impl RankedSource for Scripted {
    fn search(&self, _query: &str, limit: usize) -> anyhow::Result<Vec<Hit>> {
        Ok(self
            .0
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, (id, score))| Hit::ranked(*id, i + 1, *score))
            .collect())
    }
}

struct Failing;

impl RankedSource for Failing {
    fn search(&self, _query: &str, _limit: usize) -> anyhow::Result<Vec<Hit>> {
        anyhow::bail!("index offline")
    }
}

/// Replies with the first rule whose needle occurs in the prompt and records
/// every prompt it saw.
#[derive(Default)]
struct Model {
    rules: Vec<(&'static str, &'static str)>,
    prompts: Mutex<Vec<String>>,
}

impl Model {
    fn with(rules: Vec<(&'static str, &'static str)>) -> Arc<Self> {
        Arc::new(Self {
            rules,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.prompts.lock().expect("lock").len()
    }
}

impl TextGenerator for Model {
    fn generate(&self, _model: &str, prompt: &str) -> anyhow::Result<Generation> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        let Some((_, reply)) = self.rules.iter().find(|(needle, _)| prompt.contains(needle)) else {
            anyhow::bail!("no scripted reply")
        };
        Ok(Generation {
            text: (*reply).to_string(),
            usage: TokenUsage::default(),
        })
    }
}

fn corpus() -> DocumentStore {
    DocumentStore::new([
        Document::new(A, "Alpha", "first"),
        Document::new(B, "Bravo", "second"),
        Document::new(C, "Charlie", "third"),
        Document::new(D, "Delta", "fourth"),
    ])
}

fn engine(
    lexical: Box<dyn RankedSource>,
    semantic: Box<dyn RankedSource>,
    model: Arc<Model>,
) -> HybridSearch {
    HybridSearch::new(lexical, semantic, corpus(), model, SearchConfig::default())
}

fn abc_vs_bad(model: Arc<Model>) -> HybridSearch {
    engine(
        Box::new(Scripted(vec![(A, 9.0), (B, 7.0), (C, 2.0)])),
        Box::new(Scripted(vec![(B, 0.9), (A, 0.8), (D, 0.7)])),
        model,
    )
}

fn ids(hits: &[search_core::SearchHit]) -> Vec<u64> {
    hits.iter().map(|h| h.document.id).collect()
}

#[test]
fn rrf_ranks_documents_found_by_both_sources_first() {
    let hits = abc_vs_bad(Model::with(Vec::new()))
        .rrf_search("q", 60, 4)
        .expect("search");
    let ranked = ids(&hits);
    assert_eq!(ranked.len(), 4);
    assert_eq!(&ranked[..2], &[A, B]);
    assert_eq!(hits[0].fused.bm25_rank, 1);
    assert_eq!(hits[0].fused.sem_rank, 2);

    let d = hits.iter().find(|h| h.document.id == D).expect("D present");
    assert_eq!(d.fused.bm25_rank, 0);
    assert_eq!(d.fused.bm25_score, 0.0);
}

#[test]
fn weighted_alpha_extremes_follow_a_single_source() {
    let search = abc_vs_bad(Model::with(Vec::new()));
    // The last entry of each list normalizes to 0 and ties with absent documents.
    let lexical_only = search.weighted_search("q", 1.0, 2).expect("search");
    assert_eq!(ids(&lexical_only), vec![A, B]);
    let semantic_only = search.weighted_search("q", 0.0, 2).expect("search");
    assert_eq!(ids(&semantic_only), vec![B, A]);
}

#[test]
fn result_count_never_exceeds_limit() {
    let search = abc_vs_bad(Model::with(Vec::new()));
    for limit in 0..6 {
        assert!(search.rrf_search("q", 60, limit).expect("search").len() <= limit);
    }
}

#[test]
fn enhanced_query_replaces_the_original() {
    let model = Model::with(vec![
        ("Fix any spelling errors", "bravo"),
        ("Rate how well", "5"),
    ]);
    let search = abc_vs_bad(model.clone());
    let options = SearchOptions::rrf(60, 2).with_enhance("spell");
    search.search("bravvo", &options).expect("search");
    assert_eq!(model.calls(), 1);

    let options = SearchOptions::rrf(60, 2)
        .with_enhance("spell")
        .with_rerank("individual");
    search.search("bravvo", &options).expect("search");
    let prompts = model.prompts.lock().expect("lock");
    assert!(prompts.iter().skip(2).all(|p| p.contains("Query: \"bravo\"")));
}

#[test]
fn unknown_enhance_mode_passes_query_through() {
    let model = Model::with(Vec::new());
    let hits = abc_vs_bad(model.clone())
        .search("q", &SearchOptions::rrf(60, 2).with_enhance("poetic"))
        .expect("search");
    assert_eq!(ids(&hits), vec![A, B]);
    assert_eq!(model.calls(), 0);
}

#[test]
fn batch_rerank_drops_candidates_the_model_leaves_out() {
    let model = Model::with(vec![("Rank these movies", "[3, 1]")]);
    let hits = abc_vs_bad(model.clone())
        .search("q", &SearchOptions::rrf(60, 3).with_rerank("batch"))
        .expect("search");
    assert_eq!(ids(&hits), vec![C, A]);
    assert_eq!(hits[0].rerank_rank, Some(1));
    assert_eq!(model.calls(), 1);
}

#[test]
fn individual_rerank_reorders_by_model_rating() {
    let model = Model::with(vec![
        ("Movie: Delta", "10"),
        ("Movie: Charlie", "8"),
        ("Movie:", "1"),
    ]);
    let hits = abc_vs_bad(model.clone())
        .search("q", &SearchOptions::rrf(60, 2).with_rerank("individual"))
        .expect("search");
    assert_eq!(ids(&hits), vec![D, C]);
    assert_eq!(hits[0].rerank_score, Some(10.0));
    // limit 2 with the default x5 multiplier covers all four documents
    assert_eq!(model.calls(), 4);
}

#[test]
fn rerank_failure_aborts_the_request() {
    let model = Model::with(vec![("Rank these movies", "I think Alpha is best")]);
    let err = abc_vs_bad(model)
        .search("q", &SearchOptions::rrf(60, 2).with_rerank("batch"))
        .expect_err("must fail");
    assert!(matches!(err, SearchError::MalformedModelResponse { .. }));
}

#[test]
fn generation_transport_failure_surfaces_unmodified() {
    let model = Model::with(Vec::new());
    let err = abc_vs_bad(model)
        .search("q", &SearchOptions::rrf(60, 2).with_enhance("expand"))
        .expect_err("must fail");
    assert!(matches!(err, SearchError::Generation(_)));
}

#[test]
fn retrieval_failure_is_a_collaborator_error() {
    let search = engine(
        Box::new(Scripted(vec![(A, 1.0)])),
        Box::new(Failing),
        Model::with(Vec::new()),
    );
    let err = search.rrf_search("q", 60, 2).expect_err("must fail");
    assert!(matches!(err, SearchError::Collaborator(_)));
}

#[test]
fn empty_sources_yield_empty_results() {
    let search = engine(
        Box::new(Scripted(Vec::new())),
        Box::new(Scripted(Vec::new())),
        Model::with(vec![("Rank these movies", "[1]")]),
    );
    assert!(search.rrf_search("q", 60, 5).expect("search").is_empty());
    let reranked = search
        .search("q", &SearchOptions::weighted(0.5, 5).with_rerank("batch"))
        .expect("search");
    assert!(reranked.is_empty());
}
