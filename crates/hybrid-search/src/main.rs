mod render;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use common::{AppConfig, Document, DocumentStore, GoldenDataset, corpus::load_documents};
use embeddings::{ClipImageEncoder, EmbeddingConfig, EmbeddingEngine};
use search_core::{
    ChunkedSemanticIndex, ChunkingOptions, FusionStrategy, HybridSearch, ImageSearch,
    OllamaClient, SearchOptions, TantivyLexicalIndex, TextGenerator,
    augment::{AugmentMode, AugmentedGenerator},
    evaluation::{evaluate, judge_relevance},
    multimodal::rewrite_query_with_image,
    normalize_scores,
};
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;

const EMBEDDING_CACHE_FILE: &str = "chunk_embeddings.json";
const CLIP_MAX_TOKENS: usize = 77;

#[derive(Debug, Parser)]
#[command(name = "hybrid-search")]
#[command(about = "Hybrid lexical and semantic movie search")]
struct Cli {
    /// TOML config file; missing file means defaults.
    #[arg(long, global = true, default_value = "hybrid-search.toml")]
    config: PathBuf,
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,
    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Weighted,
    Rrf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RagModeArg {
    Answer,
    Summarize,
    Citations,
    Question,
}

impl From<RagModeArg> for AugmentMode {
    fn from(mode: RagModeArg) -> Self {
        match mode {
            RagModeArg::Answer => Self::Answer,
            RagModeArg::Summarize => Self::Summarize,
            RagModeArg::Citations => Self::Citations,
            RagModeArg::Question => Self::Question,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Min-max normalize a list of scores.
    Normalize {
        #[arg(required = true, allow_negative_numbers = true)]
        scores: Vec<f32>,
    },
    /// Build the lexical index and chunk embeddings.
    BuildIndex {
        /// Rebuild even when artifacts already exist.
        #[arg(long)]
        force: bool,
    },
    Search {
        query: String,
        #[arg(long, value_enum, default_value_t = StrategyArg::Rrf)]
        strategy: StrategyArg,
        #[arg(long)]
        alpha: Option<f32>,
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
        /// spell | rewrite | expand
        #[arg(long)]
        enhance: Option<String>,
        /// individual | batch
        #[arg(long)]
        rerank: Option<String>,
    },
    WeightedSearch {
        query: String,
        #[arg(long)]
        alpha: Option<f32>,
        #[arg(long)]
        limit: Option<usize>,
    },
    RrfSearch {
        query: String,
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        enhance: Option<String>,
        #[arg(long)]
        rerank: Option<String>,
    },
    /// Score RRF search against the golden dataset.
    Evaluate {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Ask the generative model to grade RRF results for a query.
    Judge {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Answer from the top RRF results.
    Rag {
        #[arg(value_enum)]
        mode: RagModeArg,
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Rewrite a text query using what a vision model sees in an image.
    DescribeImage {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        query: String,
    },
    /// Embed an image with the CLIP vision model and report its size.
    VerifyImageEmbedding { image: PathBuf },
    /// Find movies whose descriptions are closest to an image.
    ImageSearch {
        image: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    if let Commands::Normalize { scores } = &cli.command {
        println!("{}", render::normalized(&normalize_scores(scores)));
        return Ok(());
    }

    let cfg = AppConfig::load(&cli.config)?;
    let json = cli.json;
    let limit_or_default = |limit: Option<usize>| limit.unwrap_or(cfg.search.default_limit);

    match cli.command {
        Commands::Normalize { .. } => Ok(()),
        Commands::BuildIndex { force } => build_index(&cfg, force),
        Commands::Search {
            query,
            strategy,
            alpha,
            k,
            limit,
            enhance,
            rerank,
        } => {
            let strategy = match strategy {
                StrategyArg::Weighted => FusionStrategy::Weighted {
                    alpha: alpha.unwrap_or(cfg.search.default_alpha),
                },
                StrategyArg::Rrf => FusionStrategy::Rrf {
                    k: k.unwrap_or(cfg.search.default_k),
                },
            };
            let options = SearchOptions {
                strategy,
                limit: limit_or_default(limit),
                enhance,
                rerank,
            };
            run_search(&cfg, &query, &options, json)
        }
        Commands::WeightedSearch {
            query,
            alpha,
            limit,
        } => {
            let options = SearchOptions::weighted(
                alpha.unwrap_or(cfg.search.default_alpha),
                limit_or_default(limit),
            );
            run_search(&cfg, &query, &options, json)
        }
        Commands::RrfSearch {
            query,
            k,
            limit,
            enhance,
            rerank,
        } => {
            let options = SearchOptions {
                strategy: FusionStrategy::Rrf {
                    k: k.unwrap_or(cfg.search.default_k),
                },
                limit: limit_or_default(limit),
                enhance,
                rerank,
            };
            run_search(&cfg, &query, &options, json)
        }
        Commands::Evaluate { limit } => {
            let (search, _) = open_search(&cfg)?;
            let golden = GoldenDataset::load(Path::new(&cfg.golden_path))?;
            let report = evaluate(&search, &golden, limit_or_default(limit))?;
            emit(json, &report, || render::evaluation(&report))
        }
        Commands::Judge { query, limit } => {
            let (search, generator) = open_search(&cfg)?;
            let results = search.rrf_search(&query, cfg.search.default_k, limit_or_default(limit))?;
            let grades = judge_relevance(
                generator.as_ref(),
                &cfg.search.rerank_model,
                &query,
                &results,
            )?;
            emit(json, &grades, || render::grades(&grades))
        }
        Commands::Rag { mode, query, limit } => {
            let (search, generator) = open_search(&cfg)?;
            let rag = AugmentedGenerator::new(generator, cfg.search.generation_model.clone());
            let answer = rag.generate(&search, mode.into(), &query, limit_or_default(limit))?;
            emit(json, &answer, || render::augmented(&answer))
        }
        Commands::DescribeImage { image, query } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed reading image: {}", image.display()))?;
            let generator = OllamaClient::new(&cfg.ollama_url)?;
            let rewrite =
                rewrite_query_with_image(&generator, &cfg.search.image_model, &bytes, &query)?;
            emit(json, &rewrite, || render::image_rewrite(&rewrite))
        }
        Commands::VerifyImageEmbedding { image } => {
            let encoder = ClipImageEncoder::open(&cfg.search.clip_image_model)?;
            let dimensions = encoder.embed_file(&image)?.len();
            emit(json, &serde_json::json!({ "dimensions": dimensions }), || {
                format!("Embedding shape: {dimensions} dimensions")
            })
        }
        Commands::ImageSearch { image, limit } => {
            let documents = load_documents(Path::new(&cfg.movies_path))?;
            let text = EmbeddingEngine::new(EmbeddingConfig {
                vector_dim: cfg.search.clip_dim,
                max_sequence_length: CLIP_MAX_TOKENS,
                ..EmbeddingConfig::for_model(&cfg.search.clip_text_model)
            });
            let encoder = ClipImageEncoder::open(&cfg.search.clip_image_model)?;
            let search = ImageSearch::build(&text, Box::new(encoder), &documents)?;
            let hits = search.search(&image, limit_or_default(limit))?;
            emit(json, &hits, || render::image_hits(&image, &hits))
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

fn run_search(
    cfg: &AppConfig,
    query: &str,
    options: &SearchOptions,
    json: bool,
) -> anyhow::Result<()> {
    let (search, _) = open_search(cfg)?;
    let hits = search.search(query, options)?;
    emit(json, &hits, || render::hits(&hits, options.strategy))
}

fn chunking(cfg: &AppConfig) -> ChunkingOptions {
    ChunkingOptions {
        sentences: cfg.search.chunk_sentences,
        overlap: cfg.search.chunk_overlap,
    }
}

fn embedding_cache_path(cfg: &AppConfig) -> PathBuf {
    Path::new(&cfg.cache_dir).join(EMBEDDING_CACHE_FILE)
}

fn semantic_index(cfg: &AppConfig, documents: &[Document]) -> anyhow::Result<ChunkedSemanticIndex> {
    let engine = EmbeddingEngine::new(EmbeddingConfig::for_model(&cfg.search.semantic_model));
    tracing::debug!(model = %engine.model_id(), dimension = engine.dimension(), "embedding engine ready");
    ChunkedSemanticIndex::load_or_build(
        Box::new(engine),
        documents,
        chunking(cfg),
        &embedding_cache_path(cfg),
    )
}

fn open_search(cfg: &AppConfig) -> anyhow::Result<(HybridSearch, Arc<dyn TextGenerator>)> {
    let documents = load_documents(Path::new(&cfg.movies_path))?;
    let lexical = TantivyLexicalIndex::open_or_build(
        Path::new(&cfg.index_dir),
        &cfg.search.lexical_model,
        &documents,
    )?;
    let semantic = semantic_index(cfg, &documents)?;
    let generator: Arc<dyn TextGenerator> = Arc::new(OllamaClient::new(&cfg.ollama_url)?);
    let search = HybridSearch::new(
        Box::new(lexical),
        Box::new(semantic),
        DocumentStore::new(documents),
        generator.clone(),
        cfg.search.clone(),
    );
    Ok((search, generator))
}

fn build_index(cfg: &AppConfig, force: bool) -> anyhow::Result<()> {
    let documents = load_documents(Path::new(&cfg.movies_path))?;
    let index_dir = Path::new(&cfg.index_dir);
    let lexical = if force {
        TantivyLexicalIndex::rebuild(index_dir, &cfg.search.lexical_model, &documents)?
    } else {
        TantivyLexicalIndex::open_or_build(index_dir, &cfg.search.lexical_model, &documents)?
    };
    println!(
        "lexical index: {} documents in {}",
        lexical.num_docs(),
        index_dir.display()
    );

    let cache_path = embedding_cache_path(cfg);
    if force && cache_path.exists() {
        std::fs::remove_file(&cache_path).with_context(|| {
            format!("failed removing embedding cache: {}", cache_path.display())
        })?;
    }
    let semantic = semantic_index(cfg, &documents)?;
    println!(
        "semantic index: {} chunks cached at {}",
        semantic.chunk_count(),
        cache_path.display()
    );
    Ok(())
}
