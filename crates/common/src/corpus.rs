use std::{collections::HashMap, fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{DocId, Document};

#[derive(Debug, Deserialize)]
struct MovieFile {
    movies: Vec<Document>,
}

pub fn load_documents(path: &Path) -> Result<Vec<Document>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading corpus file: {}", path.display()))?;
    let parsed = serde_json::from_str::<MovieFile>(&raw)
        .with_context(|| format!("failed parsing corpus file: {}", path.display()))?;
    tracing::debug!(path = %path.display(), documents = parsed.movies.len(), "corpus loaded");
    Ok(parsed.movies)
}

/// Stable content hash of a corpus, used to invalidate derived artifacts.
pub fn corpus_fingerprint(documents: &[Document]) -> String {
    let mut hasher = Sha256::new();
    for doc in documents {
        hasher.update(doc.id.to_le_bytes());
        hasher.update(doc.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(doc.description.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Id lookup over the corpus. Clones of the store share the documents.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    by_id: HashMap<DocId, Arc<Document>>,
}

impl DocumentStore {
    pub fn new(documents: impl IntoIterator<Item = Document>) -> Self {
        let by_id = documents
            .into_iter()
            .map(|doc| (doc.id, Arc::new(doc)))
            .collect();
        Self { by_id }
    }

    pub fn get(&self, id: DocId) -> Option<Arc<Document>> {
        self.by_id.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoldenTestCase {
    pub query: String,
    pub relevant_docs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoldenDataset {
    pub test_cases: Vec<GoldenTestCase>,
}

impl GoldenDataset {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading golden dataset: {}", path.display()))?;
        serde_json::from_str::<Self>(&raw)
            .with_context(|| format!("failed parsing golden dataset: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{DocumentStore, GoldenDataset, corpus_fingerprint, load_documents};
    use crate::Document;

    #[test]
    fn loads_movie_corpus_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("movies.json");
        fs::write(
            &path,
            r#"{"movies":[{"id":1,"title":"Jaws","description":"Shark."},{"id":2,"title":"Up","description":"Balloons."}]}"#,
        )
        .expect("write");

        let docs = load_documents(&path).expect("load");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].title, "Up");
    }

    #[test]
    fn missing_corpus_reports_path() {
        let err = load_documents(std::path::Path::new("/tmp/no-such-movies.json"))
            .expect_err("missing file");
        assert!(err.to_string().contains("no-such-movies.json"));
    }

    #[test]
    fn fingerprint_tracks_content_changes() {
        let a = vec![Document::new(1, "Jaws", "Shark.")];
        let b = vec![Document::new(1, "Jaws", "Shark!")];
        assert_eq!(corpus_fingerprint(&a), corpus_fingerprint(&a.clone()));
        assert_ne!(corpus_fingerprint(&a), corpus_fingerprint(&b));
    }

    #[test]
    fn store_shares_documents_by_id() {
        let store = DocumentStore::new(vec![Document::new(3, "Heat", "Heist.")]);
        let first = store.get(3).expect("doc");
        let second = store.get(3).expect("doc");
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert!(store.get(4).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn golden_dataset_parses_test_cases() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("golden.json");
        fs::write(
            &path,
            r#"{"test_cases":[{"query":"bear","relevant_docs":["Paddington"]}]}"#,
        )
        .expect("write");
        let golden = GoldenDataset::load(&path).expect("golden");
        assert_eq!(golden.test_cases[0].relevant_docs, vec!["Paddington".to_string()]);
    }
}
