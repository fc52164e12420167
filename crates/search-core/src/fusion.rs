use std::cmp::Ordering;

use ahash::AHashMap;
use common::DocId;
use serde::Serialize;

/// One entry of a source's ranked list, best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub doc_id: DocId,
    pub rank: Option<usize>,
    pub score: f32,
}

impl Hit {
    pub fn new(doc_id: DocId, score: f32) -> Self {
        Self {
            doc_id,
            rank: None,
            score,
        }
    }

    pub fn ranked(doc_id: DocId, rank: usize, score: f32) -> Self {
        Self {
            doc_id,
            rank: Some(rank),
            score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FusionStrategy {
    /// `alpha * bm25_norm + (1 - alpha) * sem_norm`.
    Weighted { alpha: f32 },
    /// Sum of `1 / (k + rank)` over the sources a document appears in.
    Rrf { k: usize },
}

impl FusionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Weighted { .. } => "weighted",
            Self::Rrf { .. } => "rrf",
        }
    }
}

/// A document after fusion. Ranks are 1-based positions in each source list,
/// `0` meaning the source did not return the document; an absent source
/// likewise reports a score of `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedHit {
    pub doc_id: DocId,
    pub bm25_rank: usize,
    pub sem_rank: usize,
    pub bm25_score: f32,
    pub sem_score: f32,
    pub fused_score: f32,
}

impl FusedHit {
    fn absent(doc_id: DocId) -> Self {
        Self {
            doc_id,
            bm25_rank: 0,
            sem_rank: 0,
            bm25_score: 0.0,
            sem_score: 0.0,
            fused_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Lexical,
    Semantic,
}

/// Per-document merge state. Every document starts from the all-absent
/// record, so both sources go through the same update path.
struct Accumulator {
    entries: AHashMap<DocId, FusedHit>,
}

impl Accumulator {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: AHashMap::with_capacity(capacity),
        }
    }

    fn record(&mut self, source: Source, position: usize, doc_id: DocId, score: f32, gain: f32) {
        let entry = self
            .entries
            .entry(doc_id)
            .or_insert_with(|| FusedHit::absent(doc_id));
        let (rank, slot) = match source {
            Source::Lexical => (&mut entry.bm25_rank, &mut entry.bm25_score),
            Source::Semantic => (&mut entry.sem_rank, &mut entry.sem_score),
        };
        // A source repeating a document only counts its best position.
        if *rank != 0 {
            return;
        }
        *rank = position;
        *slot = score;
        entry.fused_score += gain;
    }

    fn into_ranked(self, limit: usize) -> Vec<FusedHit> {
        let mut fused = self.entries.into_values().collect::<Vec<_>>();
        fused.sort_by(compare_fused);
        fused.truncate(limit);
        fused
    }
}

/// Descending fused score, ties broken by ascending `doc_id`.
fn compare_fused(a: &FusedHit, b: &FusedHit) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}

/// Reciprocal-rank reward for a 1-based `rank`.
pub fn rrf_score(rank: usize, k: usize) -> f32 {
    1.0 / (k as f32 + rank as f32)
}

pub fn rrf_fuse(lexical: &[Hit], semantic: &[Hit], k: usize, limit: usize) -> Vec<FusedHit> {
    let mut acc = Accumulator::with_capacity(lexical.len() + semantic.len());
    for (source, hits) in [(Source::Lexical, lexical), (Source::Semantic, semantic)] {
        for (idx, hit) in hits.iter().enumerate() {
            let rank = idx + 1;
            acc.record(source, rank, hit.doc_id, hit.score, rrf_score(rank, k));
        }
    }
    acc.into_ranked(limit)
}

pub fn weighted_fuse(lexical: &[Hit], semantic: &[Hit], alpha: f32, limit: usize) -> Vec<FusedHit> {
    let alpha = alpha.clamp(0.0, 1.0);
    let mut acc = Accumulator::with_capacity(lexical.len() + semantic.len());
    for (source, hits, weight) in [
        (Source::Lexical, lexical, alpha),
        (Source::Semantic, semantic, 1.0 - alpha),
    ] {
        let scores = hits.iter().map(|h| h.score).collect::<Vec<_>>();
        let normalized = crate::normalize::normalize_scores(&scores);
        for (idx, (hit, norm)) in hits.iter().zip(normalized).enumerate() {
            acc.record(source, idx + 1, hit.doc_id, norm, weight * norm);
        }
    }
    acc.into_ranked(limit)
}

pub fn fuse(
    strategy: FusionStrategy,
    lexical: &[Hit],
    semantic: &[Hit],
    limit: usize,
) -> Vec<FusedHit> {
    match strategy {
        FusionStrategy::Weighted { alpha } => weighted_fuse(lexical, semantic, alpha, limit),
        FusionStrategy::Rrf { k } => rrf_fuse(lexical, semantic, k, limit),
    }
}
