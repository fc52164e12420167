pub mod augment;
pub mod decode;
pub mod enhance;
pub mod error;
pub mod evaluation;
pub mod fusion;
pub mod generation;
pub mod lexical;
pub mod multimodal;
pub mod normalize;
pub mod rerank;
pub mod retrieval;
pub mod semantic;

pub use error::{Result, SearchError};
pub use fusion::{FusedHit, FusionStrategy, Hit, rrf_fuse, rrf_score, weighted_fuse};
pub use generation::{Generation, OllamaClient, TextGenerator, TokenUsage};
pub use lexical::TantivyLexicalIndex;
pub use multimodal::{ImageEmbedder, ImageHit, ImageQueryRewrite, ImageSearch};
pub use normalize::normalize_scores;
pub use retrieval::{HybridSearch, RankedSource, SearchHit, SearchOptions};
pub use semantic::{ChunkedSemanticIndex, ChunkingOptions, Embedder};
