use std::collections::BTreeSet;

use crate::identity::normalize_paper;
use crate::model::{DocumentId, PassageStore, Qrels, QuerySet, RankedHit, RankedRun, TrainingPair};

/// How many rows a query yields and which relevant documents become positives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositiveSelection {
    /// One row: the relevant chunk with the smallest index.
    One,
    /// One row per relevant chunk with text.
    PerPositive,
    /// One row: the best-ranked relevant chunk, else the smallest index.
    FirstRanked,
}

impl PositiveSelection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::One => "one",
            Self::PerPositive => "per_positive",
            Self::FirstRanked => "first_ranked",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MiningOptions {
    /// Only hits ranked at or above this are candidate negatives.
    pub topk: u32,
    pub negs_per_row: usize,
    pub exclude_same_paper: bool,
    pub rows_per_query: PositiveSelection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MiningStats {
    pub evaluable_queries: usize,
    pub queries_with_rows: usize,
    pub rows_written: usize,
    pub skipped_unknown_query: usize,
    pub skipped_missing_positive: usize,
    pub skipped_missing_negatives: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MiningOutcome {
    pub pairs: Vec<TrainingPair>,
    pub stats: MiningStats,
}

/// Emits `(query, positive, hard negatives)` rows for every query with a
/// non-empty relevant set.
///
/// Negatives are the run's highest-ranked documents that are not relevant,
/// have passage text, and (optionally) do not come from the query's own
/// paper. Rows are never emitted without at least one negative.
pub fn mine_pairs(
    run: &RankedRun,
    qrels: &Qrels,
    queries: &QuerySet,
    passages: &PassageStore,
    options: MiningOptions,
) -> MiningOutcome {
    let mut outcome = MiningOutcome::default();

    for (qid, relevant) in qrels.evaluable() {
        outcome.stats.evaluable_queries += 1;
        let Some(query) = queries.get(qid) else {
            outcome.stats.skipped_unknown_query += 1;
            continue;
        };

        let hits = run
            .hits(qid)
            .iter()
            .filter(|hit| hit.rank <= options.topk)
            .collect::<Vec<&RankedHit>>();

        let positives = select_positives(&hits, relevant, passages, options.rows_per_query);
        if positives.is_empty() {
            outcome.stats.skipped_missing_positive += 1;
            continue;
        }

        let query_paper = normalize_paper(&query.paper_id);
        let negatives = hard_negatives(&hits, relevant, &query_paper, passages, options);
        if negatives.is_empty() {
            outcome.stats.skipped_missing_negatives += 1;
            continue;
        }

        let negs = negatives
            .iter()
            .filter_map(|document_id| passages.text(document_id.as_str()))
            .map(str::to_string)
            .collect::<Vec<String>>();

        for positive in positives {
            let Some(pos) = passages.text(positive.as_str()) else {
                continue;
            };
            outcome.pairs.push(TrainingPair {
                qid: query.qid.clone(),
                query: query.text.clone(),
                pos: pos.to_string(),
                negs: negs.clone(),
            });
            outcome.stats.rows_written += 1;
        }
        outcome.stats.queries_with_rows += 1;
    }

    outcome
}

/// Candidate negatives in rank order, capped at `negs_per_row`. `hits` must
/// already be rank-ordered.
fn hard_negatives<'a>(
    hits: &[&'a RankedHit],
    relevant: &BTreeSet<DocumentId>,
    query_paper: &str,
    passages: &PassageStore,
    options: MiningOptions,
) -> Vec<&'a DocumentId> {
    hits.iter()
        .copied()
        .map(|hit| &hit.document_id)
        .filter(|document_id| !relevant.contains(*document_id))
        .filter(|document_id| {
            !(options.exclude_same_paper
                && !query_paper.is_empty()
                && normalize_paper(document_id.paper()) == query_paper)
        })
        .filter(|document_id| passages.text(document_id.as_str()).is_some())
        .take(options.negs_per_row)
        .collect()
}

fn select_positives<'a>(
    hits: &[&RankedHit],
    relevant: &'a BTreeSet<DocumentId>,
    passages: &PassageStore,
    rows_per_query: PositiveSelection,
) -> Vec<&'a DocumentId> {
    let mut with_text = relevant
        .iter()
        .filter(|document_id| passages.text(document_id.as_str()).is_some())
        .collect::<Vec<&DocumentId>>();
    with_text.sort_by(|left, right| {
        chunk_order(left, passages)
            .cmp(&chunk_order(right, passages))
            .then_with(|| left.as_str().cmp(right.as_str()))
    });

    match rows_per_query {
        PositiveSelection::One => with_text.into_iter().take(1).collect(),
        PositiveSelection::PerPositive => with_text,
        PositiveSelection::FirstRanked => {
            let ranked_positive = hits
                .iter()
                .find_map(|hit| with_text.iter().find(|id| **id == &hit.document_id).copied());
            ranked_positive
                .or_else(|| with_text.first().copied())
                .into_iter()
                .collect()
        }
    }
}

/// Chunk index from the passage record, else from the id. Unparseable
/// indices sort after every real one.
fn chunk_order(document_id: &DocumentId, passages: &PassageStore) -> u64 {
    passages
        .get(document_id.as_str())
        .map(|record| record.chunk_index)
        .or_else(|| document_id.chunk_index())
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::make_document_id;
    use crate::model::{PassageRecord, Query};

    fn store(ids: &[&str]) -> PassageStore {
        let mut passages = PassageStore::default();
        for raw in ids {
            let (paper, chunk) = raw.rsplit_once(':').expect("paper:chunk");
            let chunk = chunk.parse::<u64>().expect("numeric chunk");
            passages.insert(PassageRecord {
                document_id: make_document_id(paper, Some(chunk)).expect("valid id"),
                paper_id: paper.to_string(),
                chunk_index: chunk,
                text: format!("text of {raw}"),
            });
        }
        passages
    }

    fn queries() -> QuerySet {
        let mut queries = QuerySet::default();
        queries.insert(Query {
            qid: "q1".to_string(),
            text: "Title of p1".to_string(),
            paper_id: "p1".to_string(),
        });
        queries
    }

    fn run_for(qid: &str, ids: &[&str]) -> RankedRun {
        let mut run = RankedRun::default();
        run.insert(
            qid,
            ids.iter()
                .enumerate()
                .map(|(index, id)| RankedHit {
                    rank: index as u32 + 1,
                    document_id: DocumentId::parse(id).expect("valid id"),
                    score: 1.0 - index as f64 * 0.1,
                    tag: "faiss".to_string(),
                })
                .collect(),
        );
        run
    }

    fn qrels_for(qid: &str, ids: &[&str]) -> Qrels {
        let mut qrels = Qrels::default();
        qrels.insert(
            qid,
            ids.iter()
                .map(|id| DocumentId::parse(id).expect("valid id"))
                .collect(),
        );
        qrels
    }

    fn options(rows_per_query: PositiveSelection) -> MiningOptions {
        MiningOptions {
            topk: 100,
            negs_per_row: 2,
            exclude_same_paper: true,
            rows_per_query,
        }
    }

    #[test]
    fn negatives_skip_relevant_and_same_paper_in_rank_order() {
        let run = run_for("q1", &["p1:0", "p2:0", "p1:2", "p3:0", "p4:0"]);
        let qrels = qrels_for("q1", &["p1:0"]);
        let passages = store(&["p1:0", "p1:2", "p2:0", "p3:0", "p4:0"]);

        let outcome = mine_pairs(
            &run,
            &qrels,
            &queries(),
            &passages,
            options(PositiveSelection::One),
        );
        assert_eq!(outcome.pairs.len(), 1);
        let row = &outcome.pairs[0];
        assert_eq!(row.qid, "q1");
        assert_eq!(row.query, "Title of p1");
        assert_eq!(row.pos, "text of p1:0");
        assert_eq!(row.negs, vec!["text of p2:0", "text of p3:0"]);
    }

    #[test]
    fn same_paper_chunks_are_kept_when_exclusion_is_off() {
        let run = run_for("q1", &["p1:0", "p2:0", "p1:2", "p3:0"]);
        let qrels = qrels_for("q1", &["p1:0"]);
        let passages = store(&["p1:0", "p1:2", "p2:0", "p3:0"]);

        let mut opts = options(PositiveSelection::One);
        opts.exclude_same_paper = false;
        let outcome = mine_pairs(&run, &qrels, &queries(), &passages, opts);
        assert_eq!(outcome.pairs[0].negs, vec!["text of p2:0", "text of p1:2"]);
    }

    #[test]
    fn negatives_without_text_are_passed_over() {
        let run = run_for("q1", &["p9:0", "p2:0", "p3:0"]);
        let qrels = qrels_for("q1", &["p1:0"]);
        let passages = store(&["p1:0", "p2:0", "p3:0"]);

        let outcome = mine_pairs(
            &run,
            &qrels,
            &queries(),
            &passages,
            options(PositiveSelection::One),
        );
        assert_eq!(outcome.pairs[0].negs, vec!["text of p2:0", "text of p3:0"]);
    }

    #[test]
    fn one_mode_picks_smallest_chunk_with_text() {
        let run = run_for("q1", &["p1:3", "p2:0"]);
        let qrels = qrels_for("q1", &["p1:0", "p1:3", "p1:10"]);
        // p1:0 has no text, so p1:3 is the earliest usable chunk
        let passages = store(&["p1:3", "p1:10", "p2:0"]);

        let outcome = mine_pairs(
            &run,
            &qrels,
            &queries(),
            &passages,
            options(PositiveSelection::One),
        );
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].pos, "text of p1:3");
    }

    #[test]
    fn per_positive_mode_shares_the_negative_pool() {
        let run = run_for("q1", &["p2:0", "p1:1", "p3:0"]);
        let qrels = qrels_for("q1", &["p1:0", "p1:1", "p1:2"]);
        let passages = store(&["p1:0", "p1:1", "p2:0", "p3:0"]);

        let outcome = mine_pairs(
            &run,
            &qrels,
            &queries(),
            &passages,
            options(PositiveSelection::PerPositive),
        );
        let positives = outcome
            .pairs
            .iter()
            .map(|row| row.pos.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(positives, vec!["text of p1:0", "text of p1:1"]);
        for row in &outcome.pairs {
            assert_eq!(row.negs, vec!["text of p2:0", "text of p3:0"]);
        }
        assert_eq!(outcome.stats.rows_written, 2);
        assert_eq!(outcome.stats.queries_with_rows, 1);
    }

    #[test]
    fn first_ranked_mode_prefers_retrieved_positive() {
        let run = run_for("q1", &["p2:0", "p1:4", "p1:1", "p3:0"]);
        let qrels = qrels_for("q1", &["p1:0", "p1:1", "p1:4"]);
        let passages = store(&["p1:0", "p1:1", "p1:4", "p2:0", "p3:0"]);

        let outcome = mine_pairs(
            &run,
            &qrels,
            &queries(),
            &passages,
            options(PositiveSelection::FirstRanked),
        );
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].pos, "text of p1:4");
    }

    #[test]
    fn first_ranked_mode_falls_back_to_earliest_chunk() {
        let run = run_for("q1", &["p2:0", "p3:0"]);
        let qrels = qrels_for("q1", &["p1:5", "p1:2"]);
        let passages = store(&["p1:2", "p1:5", "p2:0", "p3:0"]);

        let outcome = mine_pairs(
            &run,
            &qrels,
            &queries(),
            &passages,
            options(PositiveSelection::FirstRanked),
        );
        assert_eq!(outcome.pairs[0].pos, "text of p1:2");
    }

    #[test]
    fn query_without_negatives_emits_nothing() {
        let run = run_for("q1", &["p1:0", "p1:1"]);
        let qrels = qrels_for("q1", &["p1:0"]);
        let passages = store(&["p1:0", "p1:1"]);

        let outcome = mine_pairs(
            &run,
            &qrels,
            &queries(),
            &passages,
            options(PositiveSelection::One),
        );
        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.stats.skipped_missing_negatives, 1);
    }

    #[test]
    fn query_without_positive_text_emits_nothing() {
        let run = run_for("q1", &["p2:0"]);
        let qrels = qrels_for("q1", &["p1:0"]);
        let passages = store(&["p2:0"]);

        let outcome = mine_pairs(
            &run,
            &qrels,
            &queries(),
            &passages,
            options(PositiveSelection::One),
        );
        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.stats.skipped_missing_positive, 1);
    }

    #[test]
    fn unknown_and_unjudged_queries_are_skipped() {
        let mut run = run_for("q9", &["p2:0"]);
        run.insert("q1", run_for("q1", &["p2:0"]).hits("q1").to_vec());
        let mut qrels = qrels_for("q9", &["p1:0"]);
        qrels.insert("q1", BTreeSet::new());
        let passages = store(&["p1:0", "p2:0"]);

        let outcome = mine_pairs(
            &run,
            &qrels,
            &queries(),
            &passages,
            options(PositiveSelection::One),
        );
        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.stats.evaluable_queries, 1);
        assert_eq!(outcome.stats.skipped_unknown_query, 1);
    }

    #[test]
    fn topk_limits_candidate_negatives() {
        let run = run_for("q1", &["p2:0", "p3:0", "p4:0"]);
        let qrels = qrels_for("q1", &["p1:0"]);
        let passages = store(&["p1:0", "p2:0", "p3:0", "p4:0"]);

        let mut opts = options(PositiveSelection::One);
        opts.topk = 1;
        opts.negs_per_row = 4;
        let outcome = mine_pairs(&run, &qrels, &queries(), &passages, opts);
        assert_eq!(outcome.pairs[0].negs, vec!["text of p2:0"]);
    }

    #[test]
    fn rows_never_contain_relevant_negatives_or_empty_pools() {
        let passages = store(&["p1:0", "p1:1", "p1:2", "p2:0", "p2:1", "p3:0"]);
        let pool = ["p1:0", "p2:0", "p1:1", "p2:1", "p1:2", "p3:0"];
        let qrels = qrels_for("q1", &["p1:0", "p1:2"]);
        let relevant_text = ["text of p1:0", "text of p1:2"];

        for rotation in 0..pool.len() {
            let mut order = pool.to_vec();
            order.rotate_left(rotation);
            let run = run_for("q1", &order);
            for exclude_same_paper in [true, false] {
                for mode in [
                    PositiveSelection::One,
                    PositiveSelection::PerPositive,
                    PositiveSelection::FirstRanked,
                ] {
                    let mut opts = options(mode);
                    opts.exclude_same_paper = exclude_same_paper;
                    let outcome = mine_pairs(&run, &qrels, &queries(), &passages, opts);
                    for row in &outcome.pairs {
                        assert!(!row.negs.is_empty());
                        assert!(row.negs.len() <= opts.negs_per_row);
                        for neg in &row.negs {
                            assert!(!relevant_text.contains(&neg.as_str()), "{neg}");
                        }
                    }
                }
            }
        }
    }
}
