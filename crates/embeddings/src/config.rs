#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub model_path: String,
    pub tokenizer_path: Option<String>,
    pub vector_dim: usize,
    pub max_sequence_length: usize,
    /// Use the hashed bag-of-words backend instead of an ONNX model.
    pub allow_pseudo_fallback: bool,
}

impl EmbeddingConfig {
    /// Config for `model_path`, with the tokenizer looked up next to the model
    /// unless `HYBRID_TOKENIZER_PATH` names one.
    pub fn for_model(model_path: impl Into<String>) -> Self {
        let model_path = model_path.into();
        let tokenizer_path = std::env::var("HYBRID_TOKENIZER_PATH").ok().or_else(|| {
            let candidate = std::path::Path::new(&model_path).with_extension("tokenizer.json");
            candidate
                .exists()
                .then(|| candidate.display().to_string())
        });
        Self {
            model_path,
            tokenizer_path,
            vector_dim: 384,
            max_sequence_length: 256,
            allow_pseudo_fallback: std::env::var("HYBRID_PSEUDO_EMBED")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    pub fn pseudo(vector_dim: usize) -> Self {
        Self {
            vector_dim,
            allow_pseudo_fallback: true,
            ..Self::for_model("pseudo")
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::for_model("models/all-minilm-l6-v2.onnx")
    }
}
