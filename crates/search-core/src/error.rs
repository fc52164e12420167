use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = SearchError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("model response is not {expected}: {response:?}")]
    MalformedModelResponse {
        expected: &'static str,
        response: String,
    },
    #[error("lexical index unavailable at {}", path.display())]
    MissingIndexArtifact {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("generative model call failed")]
    Generation(#[source] anyhow::Error),
    #[error(transparent)]
    Index(#[from] tantivy::TantivyError),
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl SearchError {
    pub(crate) fn malformed(expected: &'static str, response: &str) -> Self {
        Self::MalformedModelResponse {
            expected,
            response: response.to_string(),
        }
    }
}
