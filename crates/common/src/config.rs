use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Options the retrieval orchestrator is constructed with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Tantivy tokenizer applied to the BM25 text fields.
    pub lexical_model: String,
    /// Embedding model used by the chunked semantic index.
    pub semantic_model: String,
    pub rerank_model: String,
    pub enhance_model: String,
    pub generation_model: String,
    pub default_alpha: f32,
    pub default_k: usize,
    pub default_limit: usize,
    /// Per-source oversampling applied before fusion.
    pub retrieval_oversample: usize,
    pub individual_rerank_multiplier: usize,
    pub batch_rerank_multiplier: usize,
    pub chunk_sentences: usize,
    pub chunk_overlap: usize,
    /// Vision-capable generative model used to rewrite queries from images.
    pub image_model: String,
    pub clip_image_model: String,
    pub clip_text_model: String,
    pub clip_dim: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lexical_model: "en_stem".to_string(),
            semantic_model: "models/all-minilm-l6-v2.onnx".to_string(),
            rerank_model: "gemma3:4b".to_string(),
            enhance_model: "gemma3:4b".to_string(),
            generation_model: "gemma3:4b".to_string(),
            default_alpha: 0.5,
            default_k: 60,
            default_limit: 5,
            retrieval_oversample: 500,
            individual_rerank_multiplier: 5,
            batch_rerank_multiplier: 2,
            chunk_sentences: 4,
            chunk_overlap: 1,
            image_model: "gemma3:12b".to_string(),
            clip_image_model: "models/clip-vit-b-32-vision.onnx".to_string(),
            clip_text_model: "models/clip-vit-b-32-text.onnx".to_string(),
            clip_dim: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub movies_path: String,
    pub golden_path: String,
    pub index_dir: String,
    pub cache_dir: String,
    pub ollama_url: String,
    pub search: SearchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            movies_path: "data/movies.json".to_string(),
            golden_path: "data/golden_dataset.json".to_string(),
            index_dir: "cache/lexical".to_string(),
            cache_dir: "cache".to_string(),
            ollama_url: "http://127.0.0.1:11434".to_string(),
            search: SearchConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading config file: {}", path.display()))?;
            toml::from_str::<Self>(&raw)
                .with_context(|| format!("failed parsing config file: {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(movies) = std::env::var("HYBRID_MOVIES_PATH") {
            cfg.movies_path = movies;
        }
        if let Ok(dir) = std::env::var("HYBRID_CACHE_DIR") {
            cfg.cache_dir = dir;
        }
        if let Ok(dir) = std::env::var("HYBRID_INDEX_DIR") {
            cfg.index_dir = dir;
        }
        if let Ok(url) = std::env::var("OLLAMA_HOST") {
            cfg.ollama_url = url;
        }
        if let Ok(model) = std::env::var("HYBRID_RERANK_MODEL") {
            cfg.search.rerank_model = model;
        }
        if let Ok(model) = std::env::var("HYBRID_IMAGE_MODEL") {
            cfg.search.image_model = model;
        }
        if let Ok(model) = std::env::var("HYBRID_SEMANTIC_MODEL") {
            cfg.search.semantic_model = model;
        }
        if let Ok(limit) = std::env::var("HYBRID_DEFAULT_LIMIT") {
            cfg.search.default_limit = limit.parse().unwrap_or(cfg.search.default_limit);
        }
        if let Ok(k) = std::env::var("HYBRID_DEFAULT_K") {
            cfg.search.default_k = k.parse().unwrap_or(cfg.search.default_k);
        }
        if let Ok(alpha) = std::env::var("HYBRID_DEFAULT_ALPHA") {
            cfg.search.default_alpha = alpha.parse().unwrap_or(cfg.search.default_alpha);
        }

        Ok(cfg)
    }
}
