use std::collections::HashSet;

use common::{DocId, GoldenDataset};
use serde::Serialize;

use crate::{
    decode::decode_grade_list,
    error::{Result, SearchError},
    generation::TextGenerator,
    retrieval::{HybridSearch, SearchHit},
};

fn hits_in_top_k(retrieved: &[String], relevant: &HashSet<&str>, k: usize) -> usize {
    retrieved
        .iter()
        .take(k)
        .filter(|title| relevant.contains(title.as_str()))
        .count()
}

/// Share of the first `k` slots holding a relevant title. `k == 0` scores 0.
pub fn precision_at_k(retrieved: &[String], relevant: &HashSet<&str>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits_in_top_k(retrieved, relevant, k) as f64 / k as f64
}

/// Share of relevant titles found in the first `k` slots. No relevant titles scores 0.
pub fn recall_at_k(retrieved: &[String], relevant: &HashSet<&str>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    hits_in_top_k(retrieved, relevant, k) as f64 / relevant.len() as f64
}

pub fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryEvaluation {
    pub query: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub retrieved: Vec<String>,
    pub relevant: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub test_cases_count: usize,
    pub limit: usize,
    pub mean_precision: f64,
    pub mean_recall: f64,
    pub mean_f1: f64,
    pub results: Vec<QueryEvaluation>,
}

/// Runs every golden query through RRF search and scores retrieved titles
/// against the expected ones.
pub fn evaluate(search: &HybridSearch, golden: &GoldenDataset, limit: usize) -> Result<EvaluationReport> {
    let k = search.config().default_k;
    let mut results = Vec::with_capacity(golden.test_cases.len());
    for case in &golden.test_cases {
        let hits = search.rrf_search(&case.query, k, limit)?;
        let retrieved = hits
            .iter()
            .map(|hit| hit.document.title.clone())
            .collect::<Vec<_>>();
        let relevant = case
            .relevant_docs
            .iter()
            .map(String::as_str)
            .collect::<HashSet<_>>();

        let precision = precision_at_k(&retrieved, &relevant, limit);
        let recall = recall_at_k(&retrieved, &relevant, limit);
        tracing::debug!(query = %case.query, precision, recall, "golden query scored");
        results.push(QueryEvaluation {
            query: case.query.clone(),
            precision,
            recall,
            f1: f1(precision, recall),
            retrieved,
            relevant: case.relevant_docs.clone(),
        });
    }

    let mean = |metric: fn(&QueryEvaluation) -> f64| {
        if results.is_empty() {
            0.0
        } else {
            results.iter().map(metric).sum::<f64>() / results.len() as f64
        }
    };
    let report = EvaluationReport {
        test_cases_count: golden.test_cases.len(),
        limit,
        mean_precision: mean(|r| r.precision),
        mean_recall: mean(|r| r.recall),
        mean_f1: mean(|r| r.f1),
        results,
    };
    tracing::info!(
        test_cases = report.test_cases_count,
        mean_precision = report.mean_precision,
        mean_recall = report.mean_recall,
        "evaluation_complete"
    );
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelevanceGrade {
    pub doc_id: DocId,
    pub title: String,
    /// 0 not relevant through 3 highly relevant.
    pub grade: u8,
}

fn judge_prompt(query: &str, results: &[SearchHit]) -> String {
    let listing = results
        .iter()
        .map(|hit| format!("{} - {}", hit.document.title, hit.document.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Rate how relevant each result is to this query on a 0-3 scale:\n\
         \n\
         Query: \"{query}\"\n\
         \n\
         Results:\n\
         {listing}\n\
         \n\
         Scale:\n\
         - 3: Highly relevant\n\
         - 2: Relevant\n\
         - 1: Marginally relevant\n\
         - 0: Not relevant\n\
         \n\
         Do NOT give any numbers other than 0, 1, 2, or 3.\n\
         \n\
         Return ONLY the scores in the same order you were given the documents. \
         Return a valid JSON list, nothing else. For example:\n\
         \n\
         [2, 0, 3, 2, 0, 1]"
    )
}

/// Asks the model to grade each result. Grades pair with results in order;
/// surplus grades or results are left unpaired.
pub fn judge_relevance(
    generator: &dyn TextGenerator,
    model: &str,
    query: &str,
    results: &[SearchHit],
) -> Result<Vec<RelevanceGrade>> {
    if results.is_empty() {
        return Ok(Vec::new());
    }
    let generation = generator
        .generate(model, &judge_prompt(query, results))
        .map_err(SearchError::Generation)?;
    let grades = decode_grade_list(&generation.text)?;
    if grades.len() != results.len() {
        tracing::warn!(
            grades = grades.len(),
            results = results.len(),
            "judge returned a different number of grades than results"
        );
    }
    Ok(results
        .iter()
        .zip(grades)
        .map(|(hit, grade)| RelevanceGrade {
            doc_id: hit.document.id,
            title: hit.document.title.clone(),
            grade,
        })
        .collect())
}
