use std::path::Path;

use anyhow::{Context, Result};
use common::{DocId, Document};
use tantivy::schema::Value;
use tantivy::{
    Index, IndexReader, IndexWriter, TantivyDocument,
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions},
};

use crate::{error::SearchError, fusion::Hit, retrieval::RankedSource};

const WRITER_MEMORY_BYTES: usize = 50_000_000;

/// BM25 index over document titles and descriptions.
pub struct TantivyLexicalIndex {
    index: Index,
    reader: IndexReader,
    fields: TantivyFields,
}

#[derive(Clone, Copy)]
struct TantivyFields {
    id: Field,
    title: Field,
    description: Field,
}

impl TantivyLexicalIndex {
    pub fn new_in_memory(tokenizer: &str) -> Result<Self> {
        from_index(Index::create_in_ram(build_schema(tokenizer)))
    }

    /// Whether a persisted index is present in `index_dir`.
    pub fn exists(index_dir: &Path) -> bool {
        index_dir.join("meta.json").exists()
    }

    pub fn create(index_dir: &Path, tokenizer: &str) -> Result<Self> {
        std::fs::create_dir_all(index_dir)
            .with_context(|| format!("failed creating index dir: {}", index_dir.display()))?;
        let index = Index::create_in_dir(index_dir, build_schema(tokenizer))?;
        from_index(index)
    }

    pub fn load(index_dir: &Path) -> Result<Self> {
        let index = Index::open_in_dir(index_dir)
            .with_context(|| format!("failed opening lexical index: {}", index_dir.display()))?;
        from_index(index)
    }

    /// Loads the persisted index, building and persisting it first when absent.
    ///
    /// Only the existence check guards the build, so two processes starting
    /// against an empty `index_dir` may both attempt it.
    pub fn open_or_build(
        index_dir: &Path,
        tokenizer: &str,
        documents: &[Document],
    ) -> crate::error::Result<Self> {
        let opened = if Self::exists(index_dir) {
            Self::load(index_dir)
        } else {
            tracing::info!(dir = %index_dir.display(), documents = documents.len(), "building lexical index");
            Self::create(index_dir, tokenizer).and_then(|mut index| {
                index.build(documents)?;
                Ok(index)
            })
        };
        opened.map_err(|source| SearchError::MissingIndexArtifact {
            path: index_dir.to_path_buf(),
            source,
        })
    }

    /// Replaces whatever `index_dir` holds with a fresh build of `documents`.
    /// The schema is recreated, so a changed `tokenizer` takes effect.
    pub fn rebuild(
        index_dir: &Path,
        tokenizer: &str,
        documents: &[Document],
    ) -> crate::error::Result<Self> {
        let cleared = if index_dir.exists() {
            std::fs::remove_dir_all(index_dir)
                .with_context(|| format!("failed removing index dir: {}", index_dir.display()))
        } else {
            Ok(())
        };
        let rebuilt = cleared
            .and_then(|()| Self::create(index_dir, tokenizer))
            .and_then(|mut index| {
                index.build(documents)?;
                Ok(index)
            });
        rebuilt.map_err(|source| SearchError::MissingIndexArtifact {
            path: index_dir.to_path_buf(),
            source,
        })
    }

    /// Resets the index to exactly `documents` and commits.
    pub fn build(&mut self, documents: &[Document]) -> Result<()> {
        let mut writer: IndexWriter = self.index.writer(WRITER_MEMORY_BYTES)?;
        writer.delete_all_documents()?;
        for doc in documents {
            let mut indexed = TantivyDocument::default();
            indexed.add_text(self.fields.id, doc.id.to_string());
            indexed.add_text(self.fields.title, &doc.title);
            indexed.add_text(self.fields.description, &doc.description);
            writer.add_document(indexed)?;
        }
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn bm25_search(&self, query: &str, limit: usize) -> Result<Vec<Hit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parser =
            QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.description]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!(query, errors = errors.len(), "lexical query parsed leniently");
        }
        let docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;

        let mut out = Vec::with_capacity(docs.len());
        for (score, address) in docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let Some(id) = doc
                .get_first(self.fields.id)
                .and_then(|value| value.as_value().as_str())
                .and_then(|raw| raw.parse::<DocId>().ok())
            else {
                continue;
            };
            out.push(Hit::ranked(id, out.len() + 1, score));
        }
        Ok(out)
    }
}

impl RankedSource for TantivyLexicalIndex {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<Hit>> {
        self.bm25_search(query, limit)
    }
}

fn build_schema(tokenizer: &str) -> Schema {
    let text = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(tokenizer)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let mut schema_builder = Schema::builder();
    let _ = schema_builder.add_text_field("id", STRING | STORED);
    let _ = schema_builder.add_text_field("title", text.clone());
    let _ = schema_builder.add_text_field("description", text);
    schema_builder.build()
}

fn from_index(index: Index) -> Result<TantivyLexicalIndex> {
    let schema = index.schema();
    let fields = TantivyFields {
        id: schema.get_field("id")?,
        title: schema.get_field("title")?,
        description: schema.get_field("description")?,
    };
    let reader = index.reader()?;
    Ok(TantivyLexicalIndex {
        index,
        reader,
        fields,
    })
}
