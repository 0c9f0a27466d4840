use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::EvalArgs;
use crate::commands::qrels::{load_passages, load_queries, log_coverage};
use crate::metrics::evaluate_run_file;
use crate::model::Qrels;
use crate::qrels::build_qrels;
use crate::trec::read_qrels;
use crate::util::{now_utc_string, sha256_file, write_json_pretty};

const EVAL_REPORT_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct EvalReport {
    manifest_version: u32,
    generated_at: String,
    k: usize,
    qrels_source: String,
    qrels_sha256: Option<String>,
    evaluable_queries: usize,
    runs: BTreeMap<String, RunReportEntry>,
}

#[derive(Debug, Serialize)]
struct RunReportEntry {
    #[serde(flatten)]
    metrics: BTreeMap<String, f64>,
    evaluated_queries: usize,
    queries_missing_from_run: usize,
    run_queries: usize,
    skipped_lines: usize,
    duplicate_lines: usize,
    sha256: String,
}

pub fn run(args: EvalArgs) -> Result<()> {
    if args.k == 0 {
        bail!("--k must be at least 1");
    }

    let (qrels, qrels_source, qrels_sha256) = load_judgments(&args)?;
    if qrels.evaluable_count() == 0 {
        bail!(
            "no evaluable queries: {} has {} queries, none with a relevant document",
            qrels_source,
            qrels.query_count()
        );
    }

    let labels = run_labels(&args.runs)?;
    let mut runs = BTreeMap::<String, RunReportEntry>::new();
    for (run_path, name) in args.runs.iter().zip(labels) {
        let evaluation = evaluate_run_file(run_path, &qrels, args.k)?;
        runs.insert(
            name,
            RunReportEntry {
                metrics: evaluation.summary.report_values(),
                evaluated_queries: evaluation.summary.evaluated_queries,
                queries_missing_from_run: evaluation.summary.queries_missing_from_run,
                run_queries: evaluation.run_queries,
                skipped_lines: evaluation.skipped_lines,
                duplicate_lines: evaluation.duplicate_lines,
                sha256: sha256_file(run_path)?,
            },
        );
    }

    let report = EvalReport {
        manifest_version: EVAL_REPORT_VERSION,
        generated_at: now_utc_string(),
        k: args.k,
        qrels_source,
        qrels_sha256,
        evaluable_queries: qrels.evaluable_count(),
        runs,
    };

    let rendered =
        serde_json::to_string_pretty(&report).context("failed to serialize eval report")?;
    println!("{rendered}");

    if let Some(out) = &args.out {
        write_json_pretty(out, &report)?;
        info!(path = %out.display(), "wrote eval report");
    }

    Ok(())
}

fn load_judgments(args: &EvalArgs) -> Result<(Qrels, String, Option<String>)> {
    if let Some(path) = &args.qrels {
        let outcome = read_qrels(path)?;
        if outcome.skipped_lines > 0 {
            warn!(
                path = %path.display(),
                skipped_lines = outcome.skipped_lines,
                "qrels file contained malformed lines"
            );
        }
        if outcome.value.query_count() == 0 {
            bail!("qrels file has no valid judgment lines: {}", path.display());
        }
        let sha256 = sha256_file(path)?;
        return Ok((outcome.value, path.display().to_string(), Some(sha256)));
    }

    match (&args.queries, &args.meta) {
        (Some(queries_path), Some(meta_path)) => {
            let queries = load_queries(queries_path)?;
            let passages = load_passages(meta_path)?;
            let qrels = build_qrels(&queries, &passages);
            log_coverage(&qrels);
            let source = format!("{} + {}", queries_path.display(), meta_path.display());
            Ok((qrels, source, None))
        }
        _ => bail!("either --qrels or both --queries and --meta are required"),
    }
}

/// Report key per run: the file stem when no other run shares it, otherwise
/// the path as given.
fn run_labels(paths: &[PathBuf]) -> Result<Vec<String>> {
    let mut stem_counts = HashMap::<&str, usize>::new();
    for path in paths {
        if let Some(stem) = file_stem(path) {
            *stem_counts.entry(stem).or_default() += 1;
        }
    }

    let mut seen = HashSet::<String>::with_capacity(paths.len());
    let mut labels = Vec::<String>::with_capacity(paths.len());
    for path in paths {
        let label = match file_stem(path) {
            Some(stem) if stem_counts.get(stem) == Some(&1) => stem.to_string(),
            _ => path.display().to_string(),
        };
        if !seen.insert(label.clone()) {
            bail!("run listed more than once: {}", path.display());
        }
        labels.push(label);
    }
    Ok(labels)
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}
