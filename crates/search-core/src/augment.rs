use std::sync::Arc;

use serde::Serialize;

use crate::{
    error::{Result, SearchError},
    generation::{TextGenerator, TokenUsage},
    retrieval::{HybridSearch, SearchHit},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmentMode {
    Answer,
    Summarize,
    Citations,
    Question,
}

impl AugmentMode {
    fn prompt(self, query: &str, results: &[SearchHit]) -> Result<String> {
        let prompt = match self {
            Self::Answer => format!(
                "Answer the question or provide information based on the provided documents. \
                 This should be tailored to Hoopla users. Hoopla is a movie streaming service.\n\
                 \n\
                 Query: {query}\n\
                 \n\
                 Documents:\n\
                 {docs}\n\
                 \n\
                 Provide a comprehensive answer that addresses the query:",
                docs = documents_json(results)?
            ),
            Self::Summarize => format!(
                "Provide information useful to this query by synthesizing information from multiple search results in detail.\n\
                 The goal is to provide comprehensive information so that users know what their options are.\n\
                 Your response should be information-dense and concise, with several key pieces of information \
                 about the genre, plot, etc. of each movie.\n\
                 This should be tailored to Hoopla users. Hoopla is a movie streaming service.\n\
                 Query: {query}\n\
                 Search Results:\n\
                 {docs}\n\
                 Provide a comprehensive 3-4 sentence answer that combines information from multiple sources:",
                docs = documents_json(results)?
            ),
            Self::Citations => format!(
                "Answer the question or provide information based on the provided documents.\n\
                 \n\
                 This should be tailored to Hoopla users. Hoopla is a movie streaming service.\n\
                 \n\
                 If not enough information is available to give a good answer, say so but give as good \
                 of an answer as you can while citing the sources you have.\n\
                 \n\
                 Query: {query}\n\
                 \n\
                 Documents:\n\
                 {docs}\n\
                 \n\
                 Instructions:\n\
                 - Provide a comprehensive answer that addresses the query\n\
                 - Cite sources using [1], [2], etc. format when referencing information\n\
                 - If sources disagree, mention the different viewpoints\n\
                 - If the answer isn't in the documents, say \"I don't have enough information\"\n\
                 - Be direct and informative\n\
                 \n\
                 Answer:",
                docs = numbered_documents(results)
            ),
            Self::Question => format!(
                "Answer the user's question based on the provided movies that are available on Hoopla.\n\
                 \n\
                 This should be tailored to Hoopla users. Hoopla is a movie streaming service.\n\
                 \n\
                 Question: {query}\n\
                 \n\
                 Documents:\n\
                 {titles}\n\
                 \n\
                 Instructions:\n\
                 - Answer questions directly and concisely\n\
                 - Be casual and conversational\n\
                 - Don't be cringe or hype-y\n\
                 - Talk like a normal person would in a chat conversation\n\
                 \n\
                 Answer:",
                titles = serde_json::to_string(
                    &results.iter().map(|hit| hit.document.title.as_str()).collect::<Vec<_>>()
                )
                .map_err(anyhow::Error::from)?
            ),
        };
        Ok(prompt)
    }
}

fn documents_json(results: &[SearchHit]) -> Result<String> {
    let docs = results.iter().map(|hit| hit.document.as_ref()).collect::<Vec<_>>();
    Ok(serde_json::to_string(&docs).map_err(anyhow::Error::from)?)
}

fn numbered_documents(results: &[SearchHit]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(idx, hit)| format!("[{}] {}: {}", idx + 1, hit.document.title, hit.document.description))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Serialize)]
pub struct AugmentedAnswer {
    pub mode: AugmentMode,
    pub results: Vec<SearchHit>,
    pub text: String,
    pub usage: TokenUsage,
}

/// Grounds a generated answer in the top RRF results for `query`.
pub struct AugmentedGenerator {
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl AugmentedGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    pub fn generate(
        &self,
        search: &HybridSearch,
        mode: AugmentMode,
        query: &str,
        limit: usize,
    ) -> Result<AugmentedAnswer> {
        let results = search.rrf_search(query, search.config().default_k, limit)?;
        let prompt = mode.prompt(query, &results)?;
        let generation = self
            .generator
            .generate(&self.model, &prompt)
            .map_err(SearchError::Generation)?;
        tracing::info!(
            mode = ?mode,
            results = results.len(),
            prompt_tokens = generation.usage.prompt_tokens,
            completion_tokens = generation.usage.completion_tokens,
            "augmented_generation_complete"
        );
        Ok(AugmentedAnswer {
            mode,
            results,
            text: generation.text,
            usage: generation.usage,
        })
    }
}
