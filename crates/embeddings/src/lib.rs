pub mod clip;
pub mod config;
pub mod engine;

pub use clip::ClipImageEncoder;
pub use config::EmbeddingConfig;
pub use engine::EmbeddingEngine;
