use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical passage key: `{paper}:{chunk_index}`.
///
/// Ids read from run or qrels files are carried opaquely; ids built from
/// passage metadata always go through [`crate::identity::make_document_id`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub(crate) fn from_parts(paper: &str, chunk_index: u64) -> Self {
        Self(format!("{paper}:{chunk_index}"))
    }

    /// Accepts any single whitespace-free token, as found in exchange files.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Paper part of the id. Split on the last `:` so that paper ids which
    /// contain a colon themselves stay intact.
    pub fn paper(&self) -> &str {
        self.0
            .rsplit_once(':')
            .map_or(self.0.as_str(), |(paper, _)| paper)
    }

    pub fn chunk_index(&self) -> Option<u64> {
        self.0
            .rsplit_once(':')
            .and_then(|(_, chunk)| chunk.parse::<u64>().ok())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DocumentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub qid: String,
    pub text: String,
    /// Canonical paper id the query was derived from.
    pub paper_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct QuerySet {
    queries: Vec<Query>,
    by_qid: HashMap<String, usize>,
}

impl QuerySet {
    /// Returns `false` (and keeps the existing entry) when `qid` is already present.
    pub fn insert(&mut self, query: Query) -> bool {
        if self.by_qid.contains_key(&query.qid) {
            return false;
        }
        self.by_qid.insert(query.qid.clone(), self.queries.len());
        self.queries.push(query);
        true
    }

    pub fn get(&self, qid: &str) -> Option<&Query> {
        self.by_qid.get(qid).map(|index| &self.queries[*index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Query> {
        self.queries.iter()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassageRecord {
    pub document_id: DocumentId,
    pub paper_id: String,
    pub chunk_index: u64,
    pub text: String,
}

/// Passage metadata keyed by document id, in file order.
#[derive(Debug, Clone, Default)]
pub struct PassageStore {
    records: Vec<PassageRecord>,
    by_id: HashMap<DocumentId, usize>,
}

impl PassageStore {
    /// Returns `false` when a record with the same document id was already stored.
    pub fn insert(&mut self, record: PassageRecord) -> bool {
        if self.by_id.contains_key(&record.document_id) {
            return false;
        }
        self.by_id
            .insert(record.document_id.clone(), self.records.len());
        self.records.push(record);
        true
    }

    pub fn get(&self, document_id: &str) -> Option<&PassageRecord> {
        self.by_id.get(document_id).map(|index| &self.records[*index])
    }

    /// Passage text, if the document is known and its text is not blank.
    pub fn text(&self, document_id: &str) -> Option<&str> {
        self.get(document_id)
            .map(|record| record.text.as_str())
            .filter(|text| !text.trim().is_empty())
    }

    pub fn records(&self) -> impl Iterator<Item = &PassageRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub rank: u32,
    pub document_id: DocumentId,
    pub score: f64,
    pub tag: String,
}

/// Per-query ranked lists. Hits within a query are kept in rank order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedRun {
    queries: BTreeMap<String, Vec<RankedHit>>,
}

impl RankedRun {
    pub fn insert(&mut self, qid: impl Into<String>, hits: Vec<RankedHit>) {
        self.queries.insert(qid.into(), hits);
    }

    /// Ranked list for `qid`; a query absent from the run has an empty list.
    pub fn hits(&self, qid: &str) -> &[RankedHit] {
        self.queries
            .get(qid)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[RankedHit])> {
        self.queries
            .iter()
            .map(|(qid, hits)| (qid.as_str(), hits.as_slice()))
    }

    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    pub fn hit_count(&self) -> usize {
        self.queries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.hit_count() == 0
    }
}

/// Binary relevance judgments: qid -> relevant document ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Qrels {
    judgments: BTreeMap<String, BTreeSet<DocumentId>>,
}

impl Qrels {
    pub fn insert(&mut self, qid: impl Into<String>, relevant: BTreeSet<DocumentId>) {
        self.judgments.insert(qid.into(), relevant);
    }

    /// Registers `qid` without adding a relevant document.
    pub fn touch(&mut self, qid: &str) {
        self.judgments.entry(qid.to_string()).or_default();
    }

    /// Returns `false` if the judgment was already present.
    pub fn add_relevant(&mut self, qid: &str, document_id: DocumentId) -> bool {
        self.judgments
            .entry(qid.to_string())
            .or_default()
            .insert(document_id)
    }

    #[allow(dead_code)]
    pub fn relevant(&self, qid: &str) -> Option<&BTreeSet<DocumentId>> {
        self.judgments.get(qid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<DocumentId>)> {
        self.judgments
            .iter()
            .map(|(qid, relevant)| (qid.as_str(), relevant))
    }

    /// Queries with at least one relevant document; the only ones metrics average over.
    pub fn evaluable(&self) -> impl Iterator<Item = (&str, &BTreeSet<DocumentId>)> {
        self.iter().filter(|(_, relevant)| !relevant.is_empty())
    }

    pub fn query_count(&self) -> usize {
        self.judgments.len()
    }

    pub fn evaluable_count(&self) -> usize {
        self.evaluable().count()
    }

    pub fn judgment_count(&self) -> usize {
        self.judgments.values().map(BTreeSet::len).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingPair {
    pub qid: String,
    pub query: String,
    pub pos: String,
    pub negs: Vec<String>,
}

/// Result of best-effort line ingestion. Malformed lines are dropped and
/// counted rather than failing the read.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome<T> {
    pub value: T,
    pub skipped_lines: usize,
    pub duplicate_lines: usize,
}
