use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::corpus::read_passages;
use crate::metrics::{MetricSummary, evaluate_run_file};
use crate::model::QuerySet;
use crate::qrels::build_qrels;
use crate::util::round4;

pub const META_RELATIVE_PATH: &str = "index/meta.jsonl";
pub const BASE_RUN_FILE: &str = "faiss_top100.trec";
pub const RERANK_RUN_FILE: &str = "ce_top100.trec";
pub const METRICS_CSV_FILE: &str = "metrics.csv";
pub const COMPARISON_CSV_FILE: &str = "metrics_base_vs_rerank.csv";
pub const SUMMARY_JSON_FILE: &str = "sweep_summary.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepPlan {
    pub steps: Vec<PipelineStep>,
}

/// One external stage (chunk, embed/index, search, rerank) of the pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineStep {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Output path (placeholders allowed); the step is skipped when it exists.
    #[serde(default)]
    pub creates: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkConfig {
    pub chunk_size: u32,
    /// Unknown for configurations discovered on disk.
    pub overlap: Option<u32>,
    pub dir: PathBuf,
}

impl ChunkConfig {
    pub fn planned(sweep_root: &Path, chunk_size: u32, overlap_frac: f64) -> Self {
        Self {
            chunk_size,
            overlap: Some(overlap_for(chunk_size, overlap_frac)),
            dir: sweep_root.join(format!("chunk_{chunk_size}")),
        }
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_RELATIVE_PATH)
    }

    pub fn base_run_path(&self) -> PathBuf {
        self.dir.join(BASE_RUN_FILE)
    }

    pub fn rerank_run_path(&self) -> PathBuf {
        self.dir.join(RERANK_RUN_FILE)
    }

    fn placeholders(&self, queries: &Path) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("chunk_size", self.chunk_size.to_string()),
            (
                "overlap",
                self.overlap.map(|value| value.to_string()).unwrap_or_default(),
            ),
            ("config_dir", self.dir.display().to_string()),
            ("queries", queries.display().to_string()),
            ("meta", self.meta_path().display().to_string()),
            ("base_run", self.base_run_path().display().to_string()),
            ("rerank_run", self.rerank_run_path().display().to_string()),
        ])
    }
}

pub fn overlap_for(chunk_size: u32, overlap_frac: f64) -> u32 {
    let overlap = (f64::from(chunk_size) * overlap_frac).floor();
    if overlap.is_finite() && overlap > 0.0 {
        overlap as u32
    } else {
        0
    }
}

pub fn load_plan(path: &Path) -> Result<SweepPlan> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let plan: SweepPlan = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if plan.steps.iter().any(|step| step.program.trim().is_empty()) {
        bail!("sweep plan has a step without a program: {}", path.display());
    }
    Ok(plan)
}

/// Replaces `{name}` placeholders. Unknown placeholders are left as written.
pub fn expand_placeholders(template: &str, values: &BTreeMap<&'static str, String>) -> String {
    let mut expanded = template.to_string();
    for (name, value) in values {
        expanded = expanded.replace(&format!("{{{name}}}"), value);
    }
    expanded
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Ran,
    Skipped,
}

pub fn run_step(
    step: &PipelineStep,
    config: &ChunkConfig,
    queries: &Path,
    force: bool,
) -> Result<StepStatus> {
    let values = config.placeholders(queries);
    if let Some(creates) = &step.creates {
        let output = PathBuf::from(expand_placeholders(creates, &values));
        if output.exists() && !force {
            info!(
                step = %step.name,
                chunk_size = config.chunk_size,
                output = %output.display(),
                "step output exists, skipping"
            );
            return Ok(StepStatus::Skipped);
        }
    }

    let args = step
        .args
        .iter()
        .map(|arg| expand_placeholders(arg, &values))
        .collect::<Vec<String>>();
    info!(
        step = %step.name,
        chunk_size = config.chunk_size,
        command = %format!("{} {}", step.program, args.join(" ")),
        "running pipeline step"
    );

    let output = Command::new(&step.program)
        .args(&args)
        .output()
        .with_context(|| {
            format!(
                "failed to execute step '{}' ({}) for chunk_{}",
                step.name, step.program, config.chunk_size
            )
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "step '{}' returned non-zero exit status for chunk_{}: {}",
            step.name,
            config.chunk_size,
            stderr.trim()
        );
    }

    Ok(StepStatus::Ran)
}

/// Configuration directories named `chunk_<size>` under `sweep_root`, sorted by size.
pub fn discover_configs(sweep_root: &Path) -> Result<Vec<ChunkConfig>> {
    let pattern = Regex::new(r"^chunk_(\d+)$").context("failed to compile chunk dir regex")?;

    let entries = fs::read_dir(sweep_root)
        .with_context(|| format!("failed to read {}", sweep_root.display()))?;
    let mut configs = Vec::<ChunkConfig>::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", sweep_root.display()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(chunk_size) = pattern
            .captures(name)
            .and_then(|captures| captures.get(1))
            .and_then(|value| value.as_str().parse::<u32>().ok())
        else {
            continue;
        };
        configs.push(ChunkConfig {
            chunk_size,
            overlap: None,
            dir: path,
        });
    }

    configs.sort_by_key(|config| config.chunk_size);
    Ok(configs)
}

#[derive(Debug, Clone)]
pub struct ConfigRow {
    pub chunk_size: u32,
    pub overlap: Option<u32>,
    pub base: MetricSummary,
    pub reranked: Option<MetricSummary>,
}

/// Reranked minus base, from unrounded values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricDeltas {
    pub ndcg: f64,
    pub mrr: f64,
    pub recall: f64,
}

impl ConfigRow {
    pub fn deltas(&self) -> Option<MetricDeltas> {
        let reranked = self.reranked?;
        Some(MetricDeltas {
            ndcg: reranked.ndcg - self.base.ndcg,
            mrr: reranked.mrr - self.base.mrr,
            recall: reranked.recall - self.base.recall,
        })
    }
}

/// Builds this configuration's qrels from its own passage metadata and scores
/// the dense run, plus the reranked run when one exists.
pub fn evaluate_config(config: &ChunkConfig, queries: &QuerySet, k: usize) -> Result<ConfigRow> {
    let meta_path = config.meta_path();
    let passages = read_passages(&meta_path)?;
    if passages.skipped_lines > 0 {
        warn!(
            path = %meta_path.display(),
            skipped_lines = passages.skipped_lines,
            "passage metadata contained unusable lines"
        );
    }
    let qrels = build_qrels(queries, &passages.value);

    let base = evaluate_run_file(&config.base_run_path(), &qrels, k)
        .with_context(|| format!("failed to evaluate dense run for chunk_{}", config.chunk_size))?
        .summary;

    let rerank_path = config.rerank_run_path();
    let reranked = if rerank_path.exists() {
        let evaluation = evaluate_run_file(&rerank_path, &qrels, k).with_context(|| {
            format!(
                "failed to evaluate reranked run for chunk_{}",
                config.chunk_size
            )
        })?;
        Some(evaluation.summary)
    } else {
        None
    };

    let row = ConfigRow {
        chunk_size: config.chunk_size,
        overlap: config.overlap,
        base,
        reranked,
    };
    match row.deltas() {
        Some(deltas) => info!(
            chunk_size = row.chunk_size,
            ndcg = round4(base.ndcg),
            delta_ndcg = round4(deltas.ndcg),
            delta_mrr = round4(deltas.mrr),
            delta_recall = round4(deltas.recall),
            "configuration evaluated"
        ),
        None => info!(
            chunk_size = row.chunk_size,
            ndcg = round4(base.ndcg),
            mrr = round4(base.mrr),
            recall = round4(base.recall),
            "configuration evaluated"
        ),
    }
    Ok(row)
}

fn metric_headers(k: usize) -> [String; 3] {
    [
        format!("NDCG@{k}"),
        format!("MRR@{k}"),
        format!("Recall@{k}"),
    ]
}

fn cell(value: f64) -> String {
    let rounded = round4(value);
    // avoid printing "-0.0000" for tiny negative deltas
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded:.4}")
}

fn optional_cells(summary: Option<MetricSummary>) -> [String; 3] {
    match summary {
        Some(summary) => [cell(summary.ndcg), cell(summary.mrr), cell(summary.recall)],
        None => [String::new(), String::new(), String::new()],
    }
}

/// `chunk_size,overlap,NDCG@k,MRR@k,Recall@k`, one row per configuration.
pub fn render_metrics_csv(rows: &[ConfigRow], k: usize) -> String {
    let mut sorted = rows.iter().collect::<Vec<&ConfigRow>>();
    sorted.sort_by_key(|row| row.chunk_size);

    let mut out = format!("chunk_size,overlap,{}\n", metric_headers(k).join(","));
    for row in sorted {
        let overlap = row.overlap.map(|value| value.to_string()).unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            row.chunk_size,
            overlap,
            cell(row.base.ndcg),
            cell(row.base.mrr),
            cell(row.base.recall)
        ));
    }
    out
}

/// Base triple, reranked triple, then `reranked - base` deltas. Cells are empty
/// for configurations without a reranked run.
pub fn render_comparison_csv(rows: &[ConfigRow], k: usize) -> String {
    let headers = metric_headers(k);
    let mut columns = vec!["chunk_size".to_string()];
    columns.extend(headers.iter().map(|name| format!("{name}_base")));
    columns.extend(headers.iter().map(|name| format!("{name}_rerank")));
    columns.extend(headers.iter().map(|name| format!("delta_{name}")));

    let mut sorted = rows.iter().collect::<Vec<&ConfigRow>>();
    sorted.sort_by_key(|row| row.chunk_size);

    let mut out = columns.join(",");
    out.push('\n');
    for row in sorted {
        let mut cells = vec![row.chunk_size.to_string()];
        cells.extend(optional_cells(Some(row.base)));
        cells.extend(optional_cells(row.reranked));
        match row.deltas() {
            Some(deltas) => {
                cells.extend([cell(deltas.ndcg), cell(deltas.mrr), cell(deltas.recall)]);
            }
            None => cells.extend([String::new(), String::new(), String::new()]),
        }
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigRowReport {
    pub chunk_size: u32,
    pub overlap: Option<u32>,
    pub evaluated_queries: usize,
    pub base: BTreeMap<String, f64>,
    pub reranked: Option<BTreeMap<String, f64>>,
    pub deltas: Option<BTreeMap<String, f64>>,
}

impl From<&ConfigRow> for ConfigRowReport {
    fn from(row: &ConfigRow) -> Self {
        let deltas = row.deltas().map(|deltas| {
            BTreeMap::from([
                (row.base.ndcg_label(), round4(deltas.ndcg)),
                (row.base.mrr_label(), round4(deltas.mrr)),
                (row.base.recall_label(), round4(deltas.recall)),
            ])
        });
        Self {
            chunk_size: row.chunk_size,
            overlap: row.overlap,
            evaluated_queries: row.base.evaluated_queries,
            base: row.base.report_values(),
            reranked: row.reranked.map(|summary| summary.report_values()),
            deltas,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub manifest_version: u32,
    pub generated_at: String,
    pub sweep_root: String,
    pub k: usize,
    pub rows: Vec<ConfigRowReport>,
}
