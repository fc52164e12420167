pub mod config;
pub mod corpus;

use serde::{Deserialize, Serialize};

pub use config::{AppConfig, SearchConfig};
pub use corpus::{DocumentStore, GoldenDataset, GoldenTestCase};

pub type DocId = u64;

/// A corpus record. Retrieval code only ever holds shared references to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub id: DocId,
    pub title: String,
    pub description: String,
}

impl Document {
    pub fn new(id: DocId, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: description.into(),
        }
    }
}
