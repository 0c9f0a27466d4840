use std::collections::{BTreeSet, HashMap};

use crate::identity::normalize_paper;
use crate::model::{DocumentId, PassageStore, Qrels, QuerySet};

/// Paper-level relevance: every chunk of the paper a query was derived from
/// is relevant to that query.
///
/// Every query gets an entry. A query whose paper has no passages gets an
/// empty set, which keeps it out of metric averages.
pub fn build_qrels(queries: &QuerySet, passages: &PassageStore) -> Qrels {
    let chunks_by_paper = group_chunks_by_paper(passages);

    let mut qrels = Qrels::default();
    for query in queries.iter() {
        let paper = normalize_paper(&query.paper_id);
        let relevant = chunks_by_paper.get(&paper).cloned().unwrap_or_default();
        qrels.insert(query.qid.clone(), relevant);
    }
    qrels
}

fn group_chunks_by_paper(passages: &PassageStore) -> HashMap<String, BTreeSet<DocumentId>> {
    let mut grouped = HashMap::<String, BTreeSet<DocumentId>>::new();
    for record in passages.records() {
        let paper = normalize_paper(&record.paper_id);
        if paper.is_empty() {
            continue;
        }
        grouped
            .entry(paper)
            .or_default()
            .insert(record.document_id.clone());
    }
    grouped
}
