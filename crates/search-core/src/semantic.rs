use std::{fs, path::Path};

use ahash::AHashMap;
use anyhow::{Context, Result, anyhow};
use common::{DocId, Document, corpus::corpus_fingerprint};
use embeddings::EmbeddingEngine;
use serde::{Deserialize, Serialize};

use crate::{fusion::Hit, retrieval::RankedSource};

const EMBED_BATCH: usize = 64;

pub trait Embedder: Send + Sync {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Names the vector space; cached vectors are only reused under the same id.
    fn model_id(&self) -> String;
}

impl Embedder for EmbeddingEngine {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts)
    }

    fn model_id(&self) -> String {
        Self::model_id(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingOptions {
    pub sentences: usize,
    pub overlap: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            sentences: 4,
            overlap: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkRecord {
    doc_id: DocId,
    chunk_index: usize,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingCache {
    fingerprint: String,
    chunks: Vec<ChunkRecord>,
}

/// Splits after `.`, `!` or `?` when followed by whitespace or end of text.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        let at_boundary = matches!(ch, '.' | '!' | '?')
            && chars.peek().is_none_or(|(_, next)| next.is_whitespace());
        if at_boundary {
            let end = idx + ch.len_utf8();
            out.push(text[start..end].trim());
            start = end;
        }
    }
    out.push(text[start..].trim());
    out.retain(|s| !s.is_empty());
    out
}

/// Overlapping windows of `options.sentences` sentences. Every chunk is
/// prefixed with the title; a document without description yields its title.
pub fn chunk_document(doc: &Document, options: ChunkingOptions) -> Vec<String> {
    let sentences = split_sentences(&doc.description);
    if sentences.is_empty() {
        return vec![doc.title.clone()];
    }
    let size = options.sentences.max(1);
    let step = size.saturating_sub(options.overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(sentences.len());
        chunks.push(format!("{}: {}", doc.title, sentences[start..end].join(" ")));
        if end == sentences.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Cosine-similarity search over document chunks; a document scores as its
/// best chunk.
pub struct ChunkedSemanticIndex {
    embedder: Box<dyn Embedder>,
    chunks: Vec<ChunkRecord>,
}

impl ChunkedSemanticIndex {
    pub fn build(
        embedder: Box<dyn Embedder>,
        documents: &[Document],
        options: ChunkingOptions,
    ) -> Result<Self> {
        let mut owners = Vec::new();
        let mut texts = Vec::new();
        for doc in documents {
            for (chunk_index, text) in chunk_document(doc, options).into_iter().enumerate() {
                owners.push((doc.id, chunk_index));
                texts.push(text);
            }
        }

        let vectors = embed_in_batches(embedder.as_ref(), &texts)?;
        let chunks = owners
            .into_iter()
            .zip(vectors)
            .map(|((doc_id, chunk_index), vector)| ChunkRecord {
                doc_id,
                chunk_index,
                vector,
            })
            .collect::<Vec<_>>();
        tracing::info!(documents = documents.len(), chunks = chunks.len(), "chunk embeddings computed");
        Ok(Self { embedder, chunks })
    }

    /// Reuses the embeddings cached at `cache_path` when they were computed
    /// by the same model for the same corpus and chunking; otherwise
    /// recomputes and rewrites them.
    pub fn load_or_build(
        embedder: Box<dyn Embedder>,
        documents: &[Document],
        options: ChunkingOptions,
        cache_path: &Path,
    ) -> Result<Self> {
        let fingerprint = format!(
            "{}:{}:{}:{}",
            embedder.model_id(),
            corpus_fingerprint(documents),
            options.sentences,
            options.overlap
        );
        if let Some(cache) = read_cache(cache_path)
            && cache.fingerprint == fingerprint
        {
            tracing::debug!(path = %cache_path.display(), chunks = cache.chunks.len(), "chunk embeddings loaded from cache");
            return Ok(Self {
                embedder,
                chunks: cache.chunks,
            });
        }

        let index = Self::build(embedder, documents, options)?;
        let cache = EmbeddingCache {
            fingerprint,
            chunks: index.chunks.clone(),
        };
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(cache_path, serde_json::to_vec(&cache)?)
            .with_context(|| format!("failed writing embedding cache: {}", cache_path.display()))?;
        Ok(index)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn search_chunks(&self, query: &str, limit: usize) -> Result<Vec<Hit>> {
        if limit == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = self
            .embedder
            .embed_texts(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedder returned no query vector"))?;

        let mut best: AHashMap<DocId, f32> = AHashMap::new();
        for chunk in &self.chunks {
            let similarity = cosine_similarity(&query_vector, &chunk.vector);
            best.entry(chunk.doc_id)
                .and_modify(|score| *score = score.max(similarity))
                .or_insert(similarity);
        }

        let mut scored = best.into_iter().collect::<Vec<_>>();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(scored
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(idx, (doc_id, score))| Hit::ranked(doc_id, idx + 1, score))
            .collect())
    }
}

impl RankedSource for ChunkedSemanticIndex {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<Hit>> {
        self.search_chunks(query, limit)
    }
}

/// Embeds `texts` in fixed-size batches and checks one vector came back per text.
pub(crate) fn embed_in_batches(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(EMBED_BATCH) {
        vectors.extend(embedder.embed_texts(batch)?);
    }
    if vectors.len() != texts.len() {
        return Err(anyhow!(
            "embedder returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        ));
    }
    Ok(vectors)
}

fn read_cache(path: &Path) -> Option<EmbeddingCache> {
    let raw = fs::read(path).ok()?;
    match serde_json::from_slice::<EmbeddingCache>(&raw) {
        Ok(cache) => Some(cache),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable embedding cache");
            None
        }
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (av, bv) in a.iter().zip(b.iter()) {
        dot += av * bv;
        na += av * av;
        nb += bv * bv;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
