use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::{NormalizeRunArgs, RunOrder};
use crate::model::{RankedHit, RankedRun};
use crate::trec::{read_run, write_run};

pub fn run(args: NormalizeRunArgs) -> Result<()> {
    if args.topk == Some(0) {
        bail!("--topk must be at least 1");
    }

    let outcome = read_run(&args.run)?;
    if outcome.skipped_lines > 0 || outcome.duplicate_lines > 0 {
        warn!(
            path = %args.run.display(),
            skipped_lines = outcome.skipped_lines,
            duplicate_lines = outcome.duplicate_lines,
            "run file contained unusable lines"
        );
    }
    if outcome.value.is_empty() {
        bail!("run file has no valid result lines: {}", args.run.display());
    }

    let normalized = normalize_run(&outcome.value, args.order, args.topk, args.tag.as_deref());
    let written = write_run(&args.out, &normalized)?;
    info!(
        path = %args.out.display(),
        queries = normalized.query_count(),
        lines = written,
        "wrote normalized run"
    );

    Ok(())
}

/// Orders each query's hits, truncates and retags them. Ranks are rewritten
/// 1..n on output.
fn normalize_run(
    run: &RankedRun,
    order: RunOrder,
    topk: Option<usize>,
    tag: Option<&str>,
) -> RankedRun {
    let mut normalized = RankedRun::default();
    for (qid, hits) in run.iter() {
        let mut hits = hits.to_vec();
        if order == RunOrder::Score {
            // stable: equal scores keep rank order
            hits.sort_by(|left, right| right.score.total_cmp(&left.score));
        }
        if let Some(topk) = topk {
            hits.truncate(topk);
        }
        for (index, hit) in hits.iter_mut().enumerate() {
            hit.rank = index as u32 + 1;
            if let Some(tag) = tag {
                hit.tag = tag.to_string();
            }
        }
        normalized.insert(qid, hits);
    }
    normalized
}
