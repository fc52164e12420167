use std::{path::Path, sync::Arc};

use anyhow::anyhow;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use common::Document;
use embeddings::ClipImageEncoder;
use serde::Serialize;

use crate::{
    error::{Result, SearchError},
    generation::{TextGenerator, TokenUsage},
    semantic::{Embedder, cosine_similarity, embed_in_batches},
};

const REWRITE_PROMPT: &str = "Given the included image and text query, rewrite the text query to \
improve search results from a movie database. Make sure to:\n\
    - Synthesize visual and textual information\n\
    - Focus on movie-specific details (actors, scenes, style, etc.)\n\
    - Return only the rewritten query, without any additional commentary";

#[derive(Debug, Clone, Serialize)]
pub struct ImageQueryRewrite {
    pub query: String,
    pub rewritten: String,
    pub usage: TokenUsage,
}

/// Asks a vision-capable model to fold what it sees in `image` into `query`.
/// The user's query travels as the system message next to a fixed rewrite prompt.
pub fn rewrite_query_with_image(
    generator: &dyn TextGenerator,
    model: &str,
    image: &[u8],
    query: &str,
) -> Result<ImageQueryRewrite> {
    if image.is_empty() {
        return Err(SearchError::Collaborator(anyhow!("image is empty")));
    }
    let images = [STANDARD.encode(image)];
    let generation = generator
        .generate_with_images(model, REWRITE_PROMPT, query, &images)
        .map_err(SearchError::Generation)?;
    let rewritten = generation.text.trim();
    if rewritten.is_empty() {
        return Err(SearchError::malformed("a rewritten query", &generation.text));
    }
    tracing::info!(
        query,
        rewritten,
        completion_tokens = generation.usage.completion_tokens,
        "image_query_rewritten"
    );
    Ok(ImageQueryRewrite {
        query: query.to_string(),
        rewritten: rewritten.to_string(),
        usage: generation.usage,
    })
}

pub trait ImageEmbedder: Send + Sync {
    fn embed_image_file(&self, path: &Path) -> anyhow::Result<Vec<f32>>;
}

impl ImageEmbedder for ClipImageEncoder {
    fn embed_image_file(&self, path: &Path) -> anyhow::Result<Vec<f32>> {
        self.embed_file(path)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageHit {
    pub document: Arc<Document>,
    pub similarity: f32,
}

/// Image-to-text retrieval: movies are embedded as `title: description` with
/// a text tower that shares its vector space with the image tower.
pub struct ImageSearch {
    image_embedder: Box<dyn ImageEmbedder>,
    documents: Vec<Arc<Document>>,
    vectors: Vec<Vec<f32>>,
}

impl ImageSearch {
    pub fn build(
        text_embedder: &dyn Embedder,
        image_embedder: Box<dyn ImageEmbedder>,
        documents: &[Document],
    ) -> Result<Self> {
        let texts = documents
            .iter()
            .map(|doc| format!("{}: {}", doc.title, doc.description))
            .collect::<Vec<_>>();
        let vectors = embed_in_batches(text_embedder, &texts)?;
        tracing::info!(documents = documents.len(), model = %text_embedder.model_id(), "image search texts embedded");
        Ok(Self {
            image_embedder,
            documents: documents.iter().cloned().map(Arc::new).collect(),
            vectors,
        })
    }

    /// Documents ranked by cosine similarity to the image at `path`, ties by id.
    pub fn search(&self, path: &Path, limit: usize) -> Result<Vec<ImageHit>> {
        if limit == 0 || self.documents.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.image_embedder.embed_image_file(path)?;
        if let Some(first) = self.vectors.first()
            && first.len() != query.len()
        {
            return Err(SearchError::Collaborator(anyhow!(
                "image embedding has {} dimensions but text embeddings have {}",
                query.len(),
                first.len()
            )));
        }

        let mut hits = self
            .documents
            .iter()
            .zip(&self.vectors)
            .map(|(document, vector)| ImageHit {
                document: document.clone(),
                similarity: cosine_similarity(&query, vector),
            })
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Mutex};

    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use common::Document;
    use embeddings::{EmbeddingConfig, EmbeddingEngine};

    use super::{ImageEmbedder, ImageSearch, rewrite_query_with_image};
    use crate::{
        error::SearchError,
        generation::{Generation, TextGenerator, TokenUsage},
    };

    #[derive(Default)]
    struct Vision {
        reply: &'static str,
        seen: Mutex<Vec<(String, String, Vec<String>)>>,
    }

    impl TextGenerator for Vision {
        fn generate(&self, _model: &str, _prompt: &str) -> anyhow::Result<Generation> {
            anyhow::bail!("text-only call not expected")
        }

        fn generate_with_images(
            &self,
            _model: &str,
            prompt: &str,
            system: &str,
            images: &[String],
        ) -> anyhow::Result<Generation> {
            self.seen
                .lock()
                .expect("lock")
                .push((prompt.to_string(), system.to_string(), images.to_vec()));
            Ok(Generation {
                text: self.reply.to_string(),
                usage: TokenUsage {
                    prompt_tokens: 300,
                    completion_tokens: 12,
                },
            })
        }
    }

    /// Embeds every image as the pseudo vector of a fixed caption.
    struct Captioned(&'static str);

    impl ImageEmbedder for Captioned {
        fn embed_image_file(&self, _path: &Path) -> anyhow::Result<Vec<f32>> {
            let engine = EmbeddingEngine::new(EmbeddingConfig::pseudo(128));
            Ok(engine.embed(&[self.0.to_string()])?.remove(0))
        }
    }

    fn movies() -> Vec<Document> {
        vec![
            Document::new(1, "Paddington", "A polite bear in a blue duffle coat."),
            Document::new(2, "Jaws", "A great white shark off a summer beach."),
            Document::new(3, "The Revenant", "A frontiersman mauled by a bear."),
        ]
    }

    #[test]
    fn rewrite_sends_image_and_query_to_the_model() {
        let vision = Vision {
            reply: "  Paddington bear duffle coat family film\n",
            ..Vision::default()
        };
        let rewrite =
            rewrite_query_with_image(&vision, "gemma3:12b", b"\x89PNG", "bear movie").expect("rewrite");
        assert_eq!(rewrite.rewritten, "Paddington bear duffle coat family film");
        assert_eq!(rewrite.usage.completion_tokens, 12);

        let seen = vision.seen.lock().expect("lock");
        let (prompt, system, images) = &seen[0];
        assert!(prompt.contains("rewrite the text query"));
        assert_eq!(system, "bear movie");
        assert_eq!(images, &vec![STANDARD.encode(b"\x89PNG")]);
    }

    #[test]
    fn blank_rewrite_is_malformed() {
        let vision = Vision {
            reply: " \n",
            ..Vision::default()
        };
        let err = rewrite_query_with_image(&vision, "m", b"img", "q").expect_err("must fail");
        assert!(matches!(err, SearchError::MalformedModelResponse { .. }));
    }

    #[test]
    fn empty_image_is_rejected_before_calling_the_model() {
        let vision = Vision::default();
        assert!(rewrite_query_with_image(&vision, "m", b"", "q").is_err());
        assert!(vision.seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn image_search_ranks_movies_by_similarity() {
        let text = EmbeddingEngine::new(EmbeddingConfig::pseudo(128));
        let search = ImageSearch::build(&text, Box::new(Captioned("great white shark beach")), &movies())
            .expect("build");
        let hits = search.search(Path::new("shark.jpg"), 2).expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.title, "Jaws");
        assert!(hits[0].similarity >= hits[1].similarity);
        assert!(search.search(Path::new("shark.jpg"), 0).expect("search").is_empty());
    }

    #[test]
    fn mismatched_embedding_spaces_are_an_error() {
        let text = EmbeddingEngine::new(EmbeddingConfig::pseudo(64));
        let search =
            ImageSearch::build(&text, Box::new(Captioned("bear")), &movies()).expect("build");
        let err = search.search(Path::new("bear.jpg"), 5).err().expect("must fail");
        assert!(err.to_string().contains("dimensions"));
    }
}
