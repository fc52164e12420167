//! Strict decoding of generative model output.
//!
//! Model text is untrusted. Each decoder accepts exactly one payload shape
//! and reports anything else as [`SearchError::MalformedModelResponse`].

use common::DocId;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, SearchError};

/// A bare number, e.g. a 0-10 relevance rating.
pub fn decode_score(text: &str) -> Result<f32> {
    text.trim()
        .parse::<f32>()
        .ok()
        .filter(|score| score.is_finite())
        .ok_or_else(|| SearchError::malformed("a numeric score", text))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdToken {
    Number(u64),
    Text(String),
}

/// A JSON list of document ids, numbers or numeric strings.
pub fn decode_id_list(text: &str) -> Result<Vec<DocId>> {
    const EXPECTED: &str = "a JSON list of document ids";
    let tokens = first_json_array::<Vec<IdToken>>(text)
        .ok_or_else(|| SearchError::malformed(EXPECTED, text))?;
    tokens
        .into_iter()
        .map(|token| match token {
            IdToken::Number(id) => Some(id),
            IdToken::Text(raw) => raw.trim().parse::<DocId>().ok(),
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| SearchError::malformed(EXPECTED, text))
}

/// A JSON list of relevance grades on the 0-3 scale.
pub fn decode_grade_list(text: &str) -> Result<Vec<u8>> {
    const EXPECTED: &str = "a JSON list of 0-3 grades";
    let grades = first_json_array::<Vec<u8>>(text)
        .ok_or_else(|| SearchError::malformed(EXPECTED, text))?;
    if grades.iter().any(|g| *g > 3) {
        return Err(SearchError::malformed(EXPECTED, text));
    }
    Ok(grades)
}

/// Finds the first `[` from which a complete value of type `T` decodes.
/// Text around the payload (code fences, prose) is ignored.
fn first_json_array<T: DeserializeOwned>(text: &str) -> Option<T> {
    text.match_indices('[').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<T>();
        stream.next().and_then(std::result::Result::ok)
    })
}
