use std::path::PathBuf;

use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "astrorag",
    version,
    about = "Retrieval evaluation and training-pair mining for arXiv astro-ph RAG experiments"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Derive paper-level relevance judgments from queries and passage metadata.
    Qrels(QrelsArgs),
    /// Score one or more ranked runs with NDCG/MRR/Recall at k.
    Eval(EvalArgs),
    /// Mine hard positive/negative rows for reranker training.
    MinePairs(MinePairsArgs),
    /// Run the external pipeline per chunk size, then evaluate every configuration.
    Sweep(SweepArgs),
    /// Evaluate existing chunk_<size> directories, dense vs reranked.
    Compare(CompareArgs),
    /// Rewrite a run file with canonical ranks, optionally re-sorted by score.
    NormalizeRun(NormalizeRunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct QrelsArgs {
    #[arg(long, default_value = "data/queries/dev.jsonl")]
    pub queries: PathBuf,

    #[arg(long, default_value = "indexes/faiss_base/meta.jsonl")]
    pub meta: PathBuf,

    #[arg(long, default_value = "outputs/qrels/dev.qrels")]
    pub out: PathBuf,
}

#[derive(Args, Debug, Clone)]
#[command(group(
    ArgGroup::new("judgments")
        .required(true)
        .args(["qrels", "queries"])
))]
pub struct EvalArgs {
    #[arg(long, conflicts_with_all = ["queries", "meta"])]
    pub qrels: Option<PathBuf>,

    #[arg(long, requires = "meta")]
    pub queries: Option<PathBuf>,

    #[arg(long, requires = "queries")]
    pub meta: Option<PathBuf>,

    #[arg(long = "run", required = true, num_args = 1..)]
    pub runs: Vec<PathBuf>,

    #[arg(long, default_value_t = 10)]
    pub k: usize,

    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RowsPerQuery {
    One,
    PerPositive,
    FirstRanked,
}

#[derive(Args, Debug, Clone)]
pub struct MinePairsArgs {
    #[arg(long, default_value = "outputs/runs/faiss_dev.trec")]
    pub run: PathBuf,

    #[arg(long, default_value = "outputs/qrels/dev.qrels")]
    pub qrels: PathBuf,

    #[arg(long, default_value = "data/queries/dev.jsonl")]
    pub queries: PathBuf,

    #[arg(long, default_value = "indexes/faiss_base/meta.jsonl")]
    pub meta: PathBuf,

    #[arg(long, default_value = "outputs/pairs/hard_pairs.jsonl")]
    pub out: PathBuf,

    #[arg(long, default_value_t = 100)]
    pub topk: u32,

    #[arg(long, default_value_t = 4)]
    pub negs_per_row: usize,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub exclude_same_paper: bool,

    #[arg(long, value_enum, default_value_t = RowsPerQuery::One)]
    pub rows_per_query: RowsPerQuery,
}

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    #[arg(long, default_value = "exp/chunk_sweep")]
    pub sweep_root: PathBuf,

    #[arg(long, default_value = "data/queries/dev.jsonl")]
    pub queries: PathBuf,

    #[arg(long, num_args = 1.., default_values_t = [50_u32, 100, 200, 300])]
    pub sizes: Vec<u32>,

    #[arg(long, default_value_t = 0.3)]
    pub overlap_frac: f64,

    /// JSON file listing the external chunk/embed/index/search/rerank steps.
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Re-run steps even when their output already exists.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    #[arg(long, default_value_t = 10)]
    pub k: usize,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    #[arg(long, default_value = "exp/chunk_sweep_fine")]
    pub sweep_root: PathBuf,

    #[arg(long, default_value = "data/queries/dev.jsonl")]
    pub queries: PathBuf,

    #[arg(long, default_value_t = 10)]
    pub k: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RunOrder {
    /// Keep the persisted rank order.
    Rank,
    /// Highest score first; ties keep their persisted rank order.
    Score,
}

#[derive(Args, Debug, Clone)]
pub struct NormalizeRunArgs {
    #[arg(long)]
    pub run: PathBuf,

    #[arg(long)]
    pub out: PathBuf,

    #[arg(long, value_enum, default_value_t = RunOrder::Rank)]
    pub order: RunOrder,

    /// Keep at most this many hits per query.
    #[arg(long)]
    pub topk: Option<usize>,

    /// Replace every line's tag.
    #[arg(long)]
    pub tag: Option<String>,
}
