use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::model::{DocumentId, Qrels, RankedHit, RankedRun};
use crate::trec::read_run;
use crate::util::round4;

#[derive(Debug, Clone, Serialize)]
pub struct QueryMetrics {
    pub qid: String,
    pub relevant: usize,
    pub retrieved: usize,
    pub ndcg: f64,
    pub reciprocal_rank: f64,
    pub recall: f64,
}

/// Macro-averaged metrics over the evaluable queries, unrounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSummary {
    pub k: usize,
    pub ndcg: f64,
    pub mrr: f64,
    pub recall: f64,
    pub evaluated_queries: usize,
    /// Evaluated queries that had no ranked list in the run.
    pub queries_missing_from_run: usize,
}

impl MetricSummary {
    pub fn ndcg_label(&self) -> String {
        format!("NDCG@{}", self.k)
    }

    pub fn mrr_label(&self) -> String {
        format!("MRR@{}", self.k)
    }

    pub fn recall_label(&self) -> String {
        format!("Recall@{}", self.k)
    }

    /// `{"NDCG@k","MRR@k","Recall@k"}` rounded to four decimals.
    pub fn report_values(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            (self.ndcg_label(), round4(self.ndcg)),
            (self.mrr_label(), round4(self.mrr)),
            (self.recall_label(), round4(self.recall)),
        ])
    }
}

pub fn ndcg_at_k(ranked: &[RankedHit], relevant: &BTreeSet<DocumentId>, k: usize) -> Option<f64> {
    if relevant.is_empty() || k == 0 {
        return None;
    }

    let mut dcg = 0.0;
    for (index, hit) in ranked.iter().take(k).enumerate() {
        if relevant.contains(&hit.document_id) {
            dcg += discount(index + 1);
        }
    }

    let idcg = (1..=relevant.len().min(k)).map(discount).sum::<f64>();
    if idcg <= 0.0 {
        return Some(0.0);
    }
    Some(dcg / idcg)
}

pub fn reciprocal_rank_at_k(
    ranked: &[RankedHit],
    relevant: &BTreeSet<DocumentId>,
    k: usize,
) -> Option<f64> {
    if relevant.is_empty() || k == 0 {
        return None;
    }

    for (index, hit) in ranked.iter().take(k).enumerate() {
        if relevant.contains(&hit.document_id) {
            return Some(1.0 / (index as f64 + 1.0));
        }
    }
    Some(0.0)
}

/// Denominator is the size of the relevant set, not `k`.
pub fn recall_at_k(ranked: &[RankedHit], relevant: &BTreeSet<DocumentId>, k: usize) -> Option<f64> {
    if relevant.is_empty() || k == 0 {
        return None;
    }

    let hit_count = ranked
        .iter()
        .take(k)
        .filter(|hit| relevant.contains(&hit.document_id))
        .count();
    Some(hit_count as f64 / relevant.len() as f64)
}

fn discount(rank: usize) -> f64 {
    1.0 / (rank as f64 + 1.0).log2()
}

/// Scores every query in `qrels` that has a non-empty relevant set. Queries
/// absent from the run are scored against an empty ranked list.
pub fn evaluate_per_query(run: &RankedRun, qrels: &Qrels, k: usize) -> Vec<QueryMetrics> {
    let mut rows = Vec::<QueryMetrics>::with_capacity(qrels.query_count());
    for (qid, relevant) in qrels.evaluable() {
        let ranked = run.hits(qid);
        let (Some(ndcg), Some(reciprocal_rank), Some(recall)) = (
            ndcg_at_k(ranked, relevant, k),
            reciprocal_rank_at_k(ranked, relevant, k),
            recall_at_k(ranked, relevant, k),
        ) else {
            continue;
        };

        rows.push(QueryMetrics {
            qid: qid.to_string(),
            relevant: relevant.len(),
            retrieved: ranked.len(),
            ndcg,
            reciprocal_rank,
            recall,
        });
    }
    rows
}

/// `None` when no query is evaluable; callers must not report that as zeros.
pub fn evaluate(run: &RankedRun, qrels: &Qrels, k: usize) -> Option<MetricSummary> {
    let rows = evaluate_per_query(run, qrels, k);
    summarize(&rows, k)
}

pub fn summarize(rows: &[QueryMetrics], k: usize) -> Option<MetricSummary> {
    let ndcg = mean(rows.iter().map(|row| row.ndcg))?;
    let mrr = mean(rows.iter().map(|row| row.reciprocal_rank))?;
    let recall = mean(rows.iter().map(|row| row.recall))?;

    Some(MetricSummary {
        k,
        ndcg,
        mrr,
        recall,
        evaluated_queries: rows.len(),
        queries_missing_from_run: rows.iter().filter(|row| row.retrieved == 0).count(),
    })
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (total, count) = values.fold((0.0_f64, 0usize), |(total, count), value| {
        (total + value, count + 1)
    });
    if count == 0 {
        return None;
    }
    Some(total / count as f64)
}

#[derive(Debug, Clone)]
pub struct RunEvaluation {
    pub summary: MetricSummary,
    pub skipped_lines: usize,
    pub duplicate_lines: usize,
    pub run_queries: usize,
}

/// Reads a run file and scores it. A run with no valid lines, or qrels with
/// no evaluable query, is an error rather than an all-zero result.
pub fn evaluate_run_file(path: &Path, qrels: &Qrels, k: usize) -> Result<RunEvaluation> {
    let outcome = read_run(path)?;
    if outcome.skipped_lines > 0 || outcome.duplicate_lines > 0 {
        warn!(
            path = %path.display(),
            skipped_lines = outcome.skipped_lines,
            duplicate_lines = outcome.duplicate_lines,
            "run file contained unusable lines"
        );
    }
    if outcome.value.is_empty() {
        bail!(
            "run file has no valid result lines ({} malformed): {}",
            outcome.skipped_lines,
            path.display()
        );
    }

    let Some(summary) = evaluate(&outcome.value, qrels, k) else {
        bail!(
            "no evaluable queries for run {}: qrels has {} queries, none with a relevant document",
            path.display(),
            qrels.query_count()
        );
    };

    info!(
        path = %path.display(),
        k,
        evaluated_queries = summary.evaluated_queries,
        queries_missing_from_run = summary.queries_missing_from_run,
        ndcg = round4(summary.ndcg),
        mrr = round4(summary.mrr),
        recall = round4(summary.recall),
        "evaluated run"
    );

    Ok(RunEvaluation {
        summary,
        skipped_lines: outcome.skipped_lines,
        duplicate_lines: outcome.duplicate_lines,
        run_queries: outcome.value.query_count(),
    })
}
