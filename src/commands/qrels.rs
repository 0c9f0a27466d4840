use std::path::Path;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::QrelsArgs;
use crate::corpus::{read_passages, read_queries};
use crate::model::{PassageStore, Qrels, QuerySet};
use crate::qrels::build_qrels;
use crate::trec::write_qrels;

pub fn run(args: QrelsArgs) -> Result<()> {
    let queries = load_queries(&args.queries)?;
    let passages = load_passages(&args.meta)?;

    let qrels = build_qrels(&queries, &passages);
    let written = write_qrels(&args.out, &qrels)?;
    log_coverage(&qrels);
    info!(
        path = %args.out.display(),
        judgments = written,
        "wrote qrels"
    );

    Ok(())
}

pub(crate) fn load_queries(path: &Path) -> Result<QuerySet> {
    let outcome = read_queries(path)?;
    if outcome.skipped_lines > 0 || outcome.duplicate_lines > 0 {
        warn!(
            path = %path.display(),
            skipped_lines = outcome.skipped_lines,
            duplicate_lines = outcome.duplicate_lines,
            "query set contained unusable lines"
        );
    }
    if outcome.value.is_empty() {
        bail!("query set has no usable queries: {}", path.display());
    }
    info!(path = %path.display(), queries = outcome.value.len(), "loaded queries");
    Ok(outcome.value)
}

pub(crate) fn load_passages(path: &Path) -> Result<PassageStore> {
    let outcome = read_passages(path)?;
    if outcome.skipped_lines > 0 || outcome.duplicate_lines > 0 {
        warn!(
            path = %path.display(),
            skipped_lines = outcome.skipped_lines,
            duplicate_lines = outcome.duplicate_lines,
            "passage metadata contained unusable lines"
        );
    }
    if outcome.value.is_empty() {
        bail!("passage metadata has no usable passages: {}", path.display());
    }
    info!(path = %path.display(), passages = outcome.value.len(), "loaded passages");
    Ok(outcome.value)
}

pub(crate) fn log_coverage(qrels: &Qrels) {
    let unmatched = qrels.query_count() - qrels.evaluable_count();
    if unmatched > 0 {
        warn!(
            unmatched_queries = unmatched,
            "queries whose paper has no passages are excluded from evaluation"
        );
    }
    info!(
        queries = qrels.query_count(),
        evaluable_queries = qrels.evaluable_count(),
        judgments = qrels.judgment_count(),
        "built qrels"
    );
}
