use std::{fmt::Write, path::Path};

use search_core::{
    FusionStrategy, ImageHit, ImageQueryRewrite, SearchHit, augment::AugmentMode,
    augment::AugmentedAnswer, evaluation::EvaluationReport, evaluation::RelevanceGrade,
};

const SNIPPET_CHARS: usize = 100;

pub fn normalized(scores: &[f32]) -> String {
    scores
        .iter()
        .map(|score| format!("* {score:.4}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn rank_label(rank: usize) -> String {
    if rank == 0 {
        "-".to_string()
    } else {
        rank.to_string()
    }
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let cut = text.chars().take(SNIPPET_CHARS).collect::<String>();
    format!("{}...", cut.trim_end())
}

pub fn hits(hits: &[SearchHit], strategy: FusionStrategy) -> String {
    if hits.is_empty() {
        return "No results found.".to_string();
    }
    let mut out = String::new();
    for (idx, hit) in hits.iter().enumerate() {
        let fused = &hit.fused;
        let _ = writeln!(out, "{}. {}", idx + 1, hit.document.title);
        match strategy {
            FusionStrategy::Rrf { .. } => {
                let _ = writeln!(out, "   RRF Score: {:.4}", fused.fused_score);
                let _ = writeln!(
                    out,
                    "   BM25 Rank: {}, Semantic Rank: {}",
                    rank_label(fused.bm25_rank),
                    rank_label(fused.sem_rank)
                );
            }
            FusionStrategy::Weighted { .. } => {
                let _ = writeln!(out, "   Hybrid Score: {:.4}", fused.fused_score);
                let _ = writeln!(
                    out,
                    "   BM25: {:.4}, Semantic: {:.4}",
                    fused.bm25_score, fused.sem_score
                );
            }
        }
        if let Some(score) = hit.rerank_score {
            let _ = writeln!(out, "   Rerank Score: {score:.3}/10");
        } else if let Some(rank) = hit.rerank_rank {
            let _ = writeln!(out, "   Rerank Rank: {rank}");
        }
        let _ = writeln!(out, "   {}", snippet(&hit.document.description));
    }
    out.trim_end().to_string()
}

pub fn evaluation(report: &EvaluationReport) -> String {
    let limit = report.limit;
    let mut out = format!("k={limit}\n");
    for result in &report.results {
        let _ = writeln!(out);
        let _ = writeln!(out, "- Query: {}", result.query);
        let _ = writeln!(out, "  - Precision@{limit}: {:.4}", result.precision);
        let _ = writeln!(out, "  - Recall@{limit}: {:.4}", result.recall);
        let _ = writeln!(out, "  - F1 Score: {:.4}", result.f1);
        let _ = writeln!(out, "  - Retrieved: {}", result.retrieved.join(", "));
        let _ = writeln!(out, "  - Relevant: {}", result.relevant.join(", "));
    }
    let _ = writeln!(out);
    let _ = write!(
        out,
        "Mean over {} queries: precision {:.4}, recall {:.4}, F1 {:.4}",
        report.test_cases_count, report.mean_precision, report.mean_recall, report.mean_f1
    );
    out
}

pub fn grades(grades: &[RelevanceGrade]) -> String {
    grades
        .iter()
        .enumerate()
        .map(|(idx, g)| format!("{}. {}: {}/3", idx + 1, g.title, g.grade))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn augmented(answer: &AugmentedAnswer) -> String {
    let heading = match answer.mode {
        AugmentMode::Answer => "RAG Response",
        AugmentMode::Summarize => "LLM Summary",
        AugmentMode::Citations => "LLM Answer",
        AugmentMode::Question => "Answer",
    };
    let mut out = String::from("Search Results:\n");
    for hit in &answer.results {
        let _ = writeln!(out, "  - {}", hit.document.title);
    }
    let _ = write!(out, "{heading}:\n{}", answer.text.trim());
    out
}

pub fn image_rewrite(rewrite: &ImageQueryRewrite) -> String {
    let total = rewrite.usage.prompt_tokens + rewrite.usage.completion_tokens;
    format!("Rewritten query: {}\nTotal tokens:    {total}", rewrite.rewritten)
}

pub fn image_hits(image: &Path, hits: &[ImageHit]) -> String {
    let mut out = format!("Image Search Results for {}:", image.display());
    if hits.is_empty() {
        out.push_str("\nNo results found.");
    }
    for (idx, hit) in hits.iter().enumerate() {
        // Truncate rather than round so 0.9996 never prints as 1.000.
        let similarity = (f64::from(hit.similarity) * 1000.0).floor() / 1000.0;
        let description = hit.document.description.chars().take(SNIPPET_CHARS).collect::<String>();
        let _ = write!(
            out,
            "\n\n{}. {} (similarity: {similarity:.3})\n   {description}",
            idx + 1,
            hit.document.title
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc};

    use common::Document;
    use search_core::{
        FusedHit, FusionStrategy, ImageHit, ImageQueryRewrite, SearchHit, TokenUsage,
        augment::{AugmentMode, AugmentedAnswer},
        evaluation::{EvaluationReport, QueryEvaluation, RelevanceGrade},
    };

    fn hit(id: u64, title: &str, description: &str, fused: FusedHit) -> SearchHit {
        SearchHit {
            document: Arc::new(Document::new(id, title, description)),
            fused,
            rerank_score: None,
            rerank_rank: None,
        }
    }

    fn paddington() -> SearchHit {
        hit(
            1,
            "Paddington",
            "A polite bear from Peru moves to London.",
            FusedHit {
                doc_id: 1,
                bm25_rank: 1,
                sem_rank: 0,
                bm25_score: 4.5,
                sem_score: 0.0,
                fused_score: 1.0 / 61.0,
            },
        )
    }

    #[test]
    fn normalized_scores_use_four_decimals() {
        insta::assert_snapshot!(super::normalized(&[0.0, 1.0 / 3.0, 1.0]), @r"
        * 0.0000
        * 0.3333
        * 1.0000
        ");
    }

    #[test]
    fn rrf_hits_show_both_source_ranks() {
        let mut jaws = hit(
            2,
            "Jaws",
            "A great white shark terrorizes the beach town of Amity Island during the busy summer season, and the police chief must stop it.",
            FusedHit {
                doc_id: 2,
                bm25_rank: 3,
                sem_rank: 1,
                bm25_score: 1.2,
                sem_score: 0.8,
                fused_score: 1.0 / 63.0 + 1.0 / 61.0,
            },
        );
        jaws.rerank_score = Some(8.0);
        insta::assert_snapshot!(super::hits(&[jaws, paddington()], FusionStrategy::Rrf { k: 60 }), @r"
        1. Jaws
           RRF Score: 0.0323
           BM25 Rank: 3, Semantic Rank: 1
           Rerank Score: 8.000/10
           A great white shark terrorizes the beach town of Amity Island during the busy summer season, and the...
        2. Paddington
           RRF Score: 0.0164
           BM25 Rank: 1, Semantic Rank: -
           A polite bear from Peru moves to London.
        ");
    }

    #[test]
    fn weighted_hits_show_normalized_scores() {
        let mut only = paddington();
        only.fused.bm25_score = 1.0;
        only.fused.fused_score = 0.5;
        only.rerank_rank = Some(1);
        insta::assert_snapshot!(super::hits(&[only], FusionStrategy::Weighted { alpha: 0.5 }), @r"
        1. Paddington
           Hybrid Score: 0.5000
           BM25: 1.0000, Semantic: 0.0000
           Rerank Rank: 1
           A polite bear from Peru moves to London.
        ");
    }

    #[test]
    fn empty_hits_render_a_notice() {
        assert_eq!(super::hits(&[], FusionStrategy::Rrf { k: 60 }), "No results found.");
    }

    #[test]
    fn evaluation_lists_each_query_and_means() {
        let report = EvaluationReport {
            test_cases_count: 1,
            limit: 2,
            mean_precision: 0.5,
            mean_recall: 1.0,
            mean_f1: 2.0 / 3.0,
            results: vec![QueryEvaluation {
                query: "bear".to_string(),
                precision: 0.5,
                recall: 1.0,
                f1: 2.0 / 3.0,
                retrieved: vec!["Paddington".to_string(), "Jaws".to_string()],
                relevant: vec!["Paddington".to_string()],
            }],
        };
        insta::assert_snapshot!(super::evaluation(&report), @r"
        k=2

        - Query: bear
          - Precision@2: 0.5000
          - Recall@2: 1.0000
          - F1 Score: 0.6667
          - Retrieved: Paddington, Jaws
          - Relevant: Paddington

        Mean over 1 queries: precision 0.5000, recall 1.0000, F1 0.6667
        ");
    }

    #[test]
    fn grades_render_out_of_three() {
        let grades = vec![
            RelevanceGrade {
                doc_id: 1,
                title: "Paddington".to_string(),
                grade: 3,
            },
            RelevanceGrade {
                doc_id: 2,
                title: "Jaws".to_string(),
                grade: 0,
            },
        ];
        insta::assert_snapshot!(super::grades(&grades), @r"
        1. Paddington: 3/3
        2. Jaws: 0/3
        ");
    }

    #[test]
    fn augmented_answer_lists_sources_then_text() {
        let answer = AugmentedAnswer {
            mode: AugmentMode::Summarize,
            results: vec![paddington()],
            text: "Paddington is a gentle family comedy.\n".to_string(),
            usage: TokenUsage::default(),
        };
        insta::assert_snapshot!(super::augmented(&answer), @r"
        Search Results:
          - Paddington
        LLM Summary:
        Paddington is a gentle family comedy.
        ");
    }

    #[test]
    fn image_rewrite_reports_total_tokens() {
        let rewrite = ImageQueryRewrite {
            query: "bear movie".to_string(),
            rewritten: "Paddington bear in a duffle coat".to_string(),
            usage: TokenUsage {
                prompt_tokens: 280,
                completion_tokens: 9,
            },
        };
        insta::assert_snapshot!(super::image_rewrite(&rewrite), @r"
        Rewritten query: Paddington bear in a duffle coat
        Total tokens:    289
        ");
    }

    #[test]
    fn image_hits_floor_similarity_to_three_decimals() {
        let hits = vec![
            ImageHit {
                document: Arc::new(Document::new(1, "Paddington", "A polite bear from Peru moves to London.")),
                similarity: 0.9996,
            },
            ImageHit {
                document: Arc::new(Document::new(3, "The Revenant", "A frontiersman survives a bear attack.")),
                similarity: 0.25,
            },
        ];
        insta::assert_snapshot!(super::image_hits(Path::new("bear.jpg"), &hits), @r"
        Image Search Results for bear.jpg:

        1. Paddington (similarity: 0.999)
           A polite bear from Peru moves to London.

        2. The Revenant (similarity: 0.250)
           A frontiersman survives a bear attack.
        ");
    }
}
