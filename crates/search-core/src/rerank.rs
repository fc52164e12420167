use std::{collections::HashMap, sync::Arc};

use common::{DocId, Document, SearchConfig};
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    decode::{decode_id_list, decode_score},
    error::{Result, SearchError},
    generation::TextGenerator,
    retrieval::SearchHit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankMode {
    /// One 0-10 rating call per candidate.
    Individual,
    /// One ordering call over the whole candidate set.
    Batch,
}

impl RerankMode {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "individual" => Some(Self::Individual),
            "batch" => Some(Self::Batch),
            _ => None,
        }
    }

    /// How many fused candidates to hand the reranker per requested result.
    pub fn candidate_multiplier(self, config: &SearchConfig) -> usize {
        let multiplier = match self {
            Self::Individual => config.individual_rerank_multiplier,
            Self::Batch => config.batch_rerank_multiplier,
        };
        multiplier.max(1)
    }
}

#[derive(Serialize)]
struct BatchCandidate<'a> {
    id: DocId,
    title: &'a str,
    description: &'a str,
}

fn individual_prompt(query: &str, doc: &Document) -> String {
    format!(
        "Rate how well this movie matches the search query.\n\
         \n\
         Query: \"{query}\"\n\
         Movie: {title} - {description}\n\
         \n\
         Consider:\n\
         - Direct relevance to query\n\
         - User intent (what they're looking for)\n\
         - Content appropriateness\n\
         \n\
         Rate 0-10 (10 = perfect match).\n\
         Give me ONLY the number in your response, no other text or explanation.\n\
         \n\
         Score:",
        title = doc.title,
        description = doc.description,
    )
}

fn batch_prompt(query: &str, candidates: &[SearchHit]) -> Result<String> {
    let listing = candidates
        .iter()
        .map(|hit| BatchCandidate {
            id: hit.document.id,
            title: &hit.document.title,
            description: &hit.document.description,
        })
        .collect::<Vec<_>>();
    let listing = serde_json::to_string(&listing).map_err(anyhow::Error::from)?;
    Ok(format!(
        "Rank these movies by relevance to the search query.\n\
         \n\
         Query: \"{query}\"\n\
         \n\
         Movies (JSON array, each with an \"id\"):\n\
         {listing}\n\
         \n\
         Return ONLY a JSON list of the movie ids in order of relevance (best match first), nothing else.\n\
         For example: [75, 12, 34]"
    ))
}

pub struct Reranker {
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl Reranker {
    pub fn new(generator: Arc<dyn TextGenerator>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    pub fn rerank(
        &self,
        mode: RerankMode,
        query: &str,
        candidates: Vec<SearchHit>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        match mode {
            RerankMode::Individual => self.rerank_individual(query, candidates, limit),
            RerankMode::Batch => self.rerank_batch(query, candidates, limit),
        }
    }

    /// Rates every candidate independently, then orders by rating. Equal
    /// ratings keep their fused order.
    pub fn rerank_individual(
        &self,
        query: &str,
        candidates: Vec<SearchHit>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let scores = candidates
            .par_iter()
            .map(|hit| self.rate(query, &hit.document))
            .collect::<Result<Vec<_>>>()?;

        let mut rescored = candidates
            .into_iter()
            .zip(scores)
            .map(|(mut hit, score)| {
                hit.rerank_score = Some(score);
                hit
            })
            .collect::<Vec<_>>();
        rescored.sort_by(|a, b| {
            let a = a.rerank_score.unwrap_or(f32::NEG_INFINITY);
            let b = b.rerank_score.unwrap_or(f32::NEG_INFINITY);
            b.total_cmp(&a)
        });
        rescored.truncate(limit);
        for (idx, hit) in rescored.iter_mut().enumerate() {
            hit.rerank_rank = Some(idx + 1);
        }
        Ok(rescored)
    }

    /// Asks for an ordering of candidate ids in one call. Ids the model
    /// invents are dropped; candidates the model leaves out are not re-added.
    pub fn rerank_batch(
        &self,
        query: &str,
        candidates: Vec<SearchHit>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = batch_prompt(query, &candidates)?;
        let generation = self
            .generator
            .generate(&self.model, &prompt)
            .map_err(SearchError::Generation)?;
        let ordered_ids = decode_id_list(&generation.text)?;

        let mut by_id = candidates
            .into_iter()
            .map(|hit| (hit.document.id, hit))
            .collect::<HashMap<_, _>>();
        let mut reranked = Vec::with_capacity(limit.min(ordered_ids.len()));
        for id in ordered_ids {
            if reranked.len() >= limit {
                break;
            }
            match by_id.remove(&id) {
                Some(mut hit) => {
                    hit.rerank_rank = Some(reranked.len() + 1);
                    reranked.push(hit);
                }
                None => tracing::debug!(doc_id = id, "batch rerank returned unknown or repeated id"),
            }
        }
        Ok(reranked)
    }

    fn rate(&self, query: &str, doc: &Document) -> Result<f32> {
        let generation = self
            .generator
            .generate(&self.model, &individual_prompt(query, doc))
            .map_err(SearchError::Generation)?;
        let score = decode_score(&generation.text)?;
        tracing::debug!(doc_id = doc.id, score, "candidate rated");
        Ok(score)
    }
}
