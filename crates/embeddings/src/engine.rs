use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result, anyhow};
use ort::{session::Session, value::Tensor};
use tokenizers::{EncodeInput, Tokenizer};

use crate::config::EmbeddingConfig;

/// Sentence embedder. Every returned vector is L2-normalized, so cosine
/// similarity between two outputs is their dot product.
pub struct EmbeddingEngine {
    config: EmbeddingConfig,
    backend: Backend,
}

enum Backend {
    Onnx(OnnxBackend),
    HashedTokens,
    Unavailable(String),
}

struct OnnxBackend {
    session: Mutex<Session>,
    tokenizer: Option<Arc<Tokenizer>>,
}

struct EncodedBatch {
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    rows: usize,
    seq_len: usize,
}

impl EmbeddingEngine {
    pub fn new(config: EmbeddingConfig) -> Self {
        let backend = match build_backend(&config) {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(model = %config.model_path, error = %err, "embedding backend unavailable");
                Backend::Unavailable(err.to_string())
            }
        };
        Self { config, backend }
    }

    /// Identifies the vector space this engine embeds into. Vectors from
    /// engines with different ids are not comparable.
    pub fn model_id(&self) -> String {
        let dim = self.config.vector_dim;
        match &self.backend {
            Backend::Onnx(_) => format!("onnx:{}:{dim}", self.config.model_path),
            Backend::HashedTokens => format!("hashed-tokens:{dim}"),
            Backend::Unavailable(_) => format!("unavailable:{}:{dim}", self.config.model_path),
        }
    }

    pub fn dimension(&self) -> usize {
        self.config.vector_dim
    }

    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = match &self.backend {
            Backend::Onnx(backend) => backend.embed(texts, &self.config)?,
            Backend::HashedTokens => texts
                .iter()
                .map(|text| hashed_token_embedding(text, self.config.vector_dim))
                .collect(),
            Backend::Unavailable(msg) => {
                return Err(anyhow!(
                    "embedding unavailable: {msg}. set HYBRID_PSEUDO_EMBED=true to run without a model"
                ));
            }
        };
        for vector in &mut vectors {
            l2_normalize(vector);
        }
        Ok(vectors)
    }
}

impl OnnxBackend {
    fn embed(&self, texts: &[String], cfg: &EmbeddingConfig) -> Result<Vec<Vec<f32>>> {
        let encoded = encode_inputs(texts, cfg, self.tokenizer.as_ref())?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("embedding session lock poisoned"))?;

        let shape = vec![encoded.rows as i64, encoded.seq_len as i64];
        let ids = Tensor::<i64>::from_array((shape.clone(), encoded.input_ids.clone()))?;
        let mask = Tensor::<i64>::from_array((shape.clone(), encoded.attention_mask.clone()))?;
        let token_types =
            Tensor::<i64>::from_array((shape, vec![0i64; encoded.rows * encoded.seq_len]))?;

        let mut model_inputs = HashMap::new();
        for input in session.inputs() {
            let name = input.name().to_lowercase();
            let value = if name.contains("attention") && name.contains("mask") {
                mask.clone().upcast()
            } else if name.contains("token_type") {
                token_types.clone().upcast()
            } else {
                ids.clone().upcast()
            };
            model_inputs.insert(input.name().to_string(), value);
        }

        let mut outputs = session.run(model_inputs)?;
        // Projected outputs (`text_embeds`, `sentence_embedding`) win over hidden states.
        let key = outputs
            .keys()
            .find(|name| name.ends_with("_embeds") || *name == "sentence_embedding")
            .or_else(|| outputs.keys().next())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("embedding model returned no outputs"))?;
        let output = outputs
            .remove(key)
            .ok_or_else(|| anyhow!("embedding model output extraction failed"))?;
        let (shape, values) = output
            .try_extract_tensor::<f32>()
            .map_err(|err| anyhow!("embedding output decode failed: {err}"))?;

        mean_pool(shape, values, &encoded, cfg.vector_dim)
    }
}

/// Turns model output into one vector per row: rank-2 outputs are already
/// pooled, rank-3 outputs are mean-pooled over unmasked tokens.
fn mean_pool(
    shape: &[i64],
    values: &[f32],
    encoded: &EncodedBatch,
    target_dim: usize,
) -> Result<Vec<Vec<f32>>> {
    if shape.len() < 2 || shape[0] <= 0 {
        return Err(anyhow!("embedding output shape {shape:?} is unsupported"));
    }
    let hidden = usize::try_from(shape[shape.len() - 1]).unwrap_or(0);
    if hidden == 0 {
        return Err(anyhow!("embedding output hidden dimension is invalid"));
    }
    let rows = encoded.rows;

    if shape.len() == 2 {
        if values.len() < rows * hidden {
            return Err(anyhow!(
                "embedding output tensor too small for expected shape {rows}x{hidden}"
            ));
        }
        return Ok((0..rows)
            .map(|row| fit_vector_dim(&values[row * hidden..(row + 1) * hidden], target_dim))
            .collect());
    }

    let model_seq_len = usize::try_from(shape[shape.len() - 2]).unwrap_or(encoded.seq_len);
    if values.len() < rows * model_seq_len * hidden {
        return Err(anyhow!(
            "embedding output tensor too small for pooled decoding"
        ));
    }

    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        let mut pooled = vec![0.0f32; hidden];
        let mut counted = 0.0f32;
        for token in 0..model_seq_len {
            let mask_index = row * encoded.seq_len + token.min(encoded.seq_len.saturating_sub(1));
            if encoded.attention_mask.get(mask_index).copied().unwrap_or(0) == 0 {
                continue;
            }
            counted += 1.0;
            let base = (row * model_seq_len + token) * hidden;
            for (acc, value) in pooled.iter_mut().zip(&values[base..base + hidden]) {
                *acc += value;
            }
        }
        if counted > 0.0 {
            pooled.iter_mut().for_each(|v| *v /= counted);
        }
        out.push(fit_vector_dim(&pooled, target_dim));
    }
    Ok(out)
}

fn fit_vector_dim(values: &[f32], target_dim: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; target_dim];
    let n = values.len().min(target_dim);
    out[..n].copy_from_slice(&values[..n]);
    out
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

fn build_backend(config: &EmbeddingConfig) -> Result<Backend> {
    if config.allow_pseudo_fallback {
        return Ok(Backend::HashedTokens);
    }
    let model_path = Path::new(&config.model_path);
    if !model_path.exists() {
        return Err(anyhow!(
            "embedding model not found at {}",
            model_path.display()
        ));
    }

    let session = Session::builder()
        .context("failed to create ONNX session builder")?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ONNX model {}", model_path.display()))?;
    let tokenizer = match config.tokenizer_path.as_ref() {
        Some(path) => Some(Arc::new(Tokenizer::from_file(path).map_err(|err| {
            anyhow!("failed loading tokenizer from {path}: {err}")
        })?)),
        None => None,
    };

    Ok(Backend::Onnx(OnnxBackend {
        session: Mutex::new(session),
        tokenizer,
    }))
}

fn encode_inputs(
    texts: &[String],
    config: &EmbeddingConfig,
    tokenizer: Option<&Arc<Tokenizer>>,
) -> Result<EncodedBatch> {
    let seq_len = config.max_sequence_length.max(1);
    let mut input_ids = vec![0i64; texts.len() * seq_len];
    let mut attention_mask = vec![0i64; texts.len() * seq_len];

    if let Some(tokenizer) = tokenizer {
        let inputs = texts
            .iter()
            .map(|text| EncodeInput::Single(text.as_str().into()))
            .collect::<Vec<_>>();
        let encodings = tokenizer
            .encode_batch(inputs, true)
            .map_err(|err| anyhow!("tokenization failed: {err}"))?;
        for (row, encoding) in encodings.iter().enumerate() {
            for (col, token_id) in encoding.get_ids().iter().take(seq_len).enumerate() {
                input_ids[row * seq_len + col] = i64::from(*token_id);
                attention_mask[row * seq_len + col] = 1;
            }
        }
    } else {
        // Byte-level ids for models exported without a tokenizer file.
        for (row, text) in texts.iter().enumerate() {
            for (col, byte) in text.as_bytes().iter().take(seq_len).enumerate() {
                input_ids[row * seq_len + col] = i64::from(*byte) + 1;
                attention_mask[row * seq_len + col] = 1;
            }
        }
    }

    Ok(EncodedBatch {
        input_ids,
        attention_mask,
        rows: texts.len(),
        seq_len,
    })
}

/// Bag-of-words vector: each lowercased alphanumeric token bumps one
/// FNV-hashed bucket. Texts sharing words end up close in cosine space.
fn hashed_token_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; dim.max(1)];
    let buckets = out.len() as u64;
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hash = 0xcbf2_9ce4_8422_2325u64;
        for byte in token.to_lowercase().bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        out[(hash % buckets) as usize] += 1.0;
    }
    out
}
