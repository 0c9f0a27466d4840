use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::{MinePairsArgs, RowsPerQuery};
use crate::commands::qrels::{load_passages, load_queries};
use crate::mining::{MiningOptions, PositiveSelection, mine_pairs};
use crate::trec::{read_qrels, read_run};
use crate::util::write_jsonl;

pub fn run(args: MinePairsArgs) -> Result<()> {
    if args.negs_per_row == 0 {
        bail!("--negs-per-row must be at least 1");
    }
    if args.topk == 0 {
        bail!("--topk must be at least 1");
    }

    let run = read_run(&args.run)?;
    if run.skipped_lines > 0 || run.duplicate_lines > 0 {
        warn!(
            path = %args.run.display(),
            skipped_lines = run.skipped_lines,
            duplicate_lines = run.duplicate_lines,
            "run file contained unusable lines"
        );
    }
    if run.value.is_empty() {
        bail!("run file has no valid result lines: {}", args.run.display());
    }

    let qrels = read_qrels(&args.qrels)?;
    if qrels.skipped_lines > 0 {
        warn!(
            path = %args.qrels.display(),
            skipped_lines = qrels.skipped_lines,
            "qrels file contained malformed lines"
        );
    }
    if qrels.value.evaluable_count() == 0 {
        bail!(
            "qrels file has no query with a relevant document: {}",
            args.qrels.display()
        );
    }

    let queries = load_queries(&args.queries)?;
    let passages = load_passages(&args.meta)?;

    let options = MiningOptions {
        topk: args.topk,
        negs_per_row: args.negs_per_row,
        exclude_same_paper: args.exclude_same_paper,
        rows_per_query: positive_selection(args.rows_per_query),
    };
    info!(
        topk = options.topk,
        negs_per_row = options.negs_per_row,
        exclude_same_paper = options.exclude_same_paper,
        rows_per_query = options.rows_per_query.as_str(),
        "mining training pairs"
    );

    let outcome = mine_pairs(&run.value, &qrels.value, &queries, &passages, options);
    let written = write_jsonl(&args.out, &outcome.pairs)?;

    let stats = &outcome.stats;
    if stats.skipped_unknown_query > 0 {
        warn!(
            skipped = stats.skipped_unknown_query,
            "judged queries missing from the query set"
        );
    }
    info!(
        path = %args.out.display(),
        rows = written,
        evaluable_queries = stats.evaluable_queries,
        queries_with_rows = stats.queries_with_rows,
        skipped_missing_positive = stats.skipped_missing_positive,
        skipped_missing_negatives = stats.skipped_missing_negatives,
        "wrote training pairs"
    );

    Ok(())
}

fn positive_selection(rows_per_query: RowsPerQuery) -> PositiveSelection {
    match rows_per_query {
        RowsPerQuery::One => PositiveSelection::One,
        RowsPerQuery::PerPositive => PositiveSelection::PerPositive,
        RowsPerQuery::FirstRanked => PositiveSelection::FirstRanked,
    }
}
