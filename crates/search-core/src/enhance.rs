use std::sync::Arc;

use serde::Serialize;

use crate::{
    error::{Result, SearchError},
    generation::TextGenerator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhanceMode {
    Spell,
    Rewrite,
    Expand,
}

impl EnhanceMode {
    /// `None` for tags this enhancer does not know; callers pass the query through.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "spell" => Some(Self::Spell),
            "rewrite" => Some(Self::Rewrite),
            "expand" => Some(Self::Expand),
            _ => None,
        }
    }

    pub fn prompt(self, query: &str) -> String {
        match self {
            Self::Spell => format!(
                "Fix any spelling errors in this movie search query.\n\
                 Only correct obvious typos. Don't change correctly spelled words or letter case.\n\
                 Return only the corrected query.\n\
                 Query: \"{query}\"\n\
                 If there are no errors, return the original query.\n\
                 Corrected:"
            ),
            Self::Rewrite => format!(
                "Rewrite this movie search query to be more specific and searchable.\n\
                 Original: \"{query}\"\n\
                 Consider:\n\
                 - Common movie knowledge (famous actors, popular films)\n\
                 - Genre conventions (horror = scary, animation = cartoon)\n\
                 - Keep it concise (under 10 words)\n\
                 - It should be a very specific search-engine style query\n\
                 - Don't use boolean logic\n\
                 \n\
                 Examples:\n\
                 - \"that bear movie where leo gets attacked\" -> \"The Revenant Leonardo DiCaprio bear attack\"\n\
                 - \"movie about bear in london with marmalade\" -> \"Paddington London marmalade\"\n\
                 - \"scary movie with bear from few years ago\" -> \"bear horror movie 2015-2020\"\n\
                 \n\
                 Rewritten query:"
            ),
            Self::Expand => format!(
                "Expand this movie search query with related terms.\n\
                 Add synonyms and related concepts that might appear in movie descriptions.\n\
                 Keep expansions relevant and focused.\n\
                 \n\
                 Examples:\n\
                 - \"scary bear movie\" -> \"scary horror grizzly bear movie terrifying film\"\n\
                 - \"action movie with bear\" -> \"action thriller bear chase fight adventure\"\n\
                 - \"comedy with bear\" -> \"comedy funny bear humor lighthearted\"\n\
                 \n\
                 Query: \"{query}\"\n\
                 Return only the expanded query."
            ),
        }
    }
}

pub struct QueryEnhancer {
    generator: Arc<dyn TextGenerator>,
    model: String,
}

impl QueryEnhancer {
    pub fn new(generator: Arc<dyn TextGenerator>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    /// Replaces `query` with the model's answer for `tag`, verbatim.
    /// Unknown tags leave the query untouched without calling the model.
    pub fn enhance(&self, query: &str, tag: &str) -> Result<String> {
        let Some(mode) = EnhanceMode::parse(tag) else {
            tracing::warn!(mode = tag, "unknown enhancement mode, query passed through");
            return Ok(query.to_string());
        };
        let generation = self
            .generator
            .generate(&self.model, &mode.prompt(query))
            .map_err(SearchError::Generation)?;
        tracing::info!(
            mode = ?mode,
            original = query,
            enhanced = %generation.text,
            "query enhanced"
        );
        Ok(generation.text)
    }
}
