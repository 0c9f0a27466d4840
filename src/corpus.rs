use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::identity::{chunk_index_from_json, make_document_id, normalize_paper};
use crate::model::{ParseOutcome, PassageRecord, PassageStore, Query, QuerySet};

#[derive(Debug, Deserialize)]
struct QueryLine {
    qid: String,
    #[serde(default)]
    query: String,
    #[serde(default)]
    paper_id: String,
}

#[derive(Debug, Deserialize)]
struct PassageLine {
    #[serde(default)]
    paper_id: Option<String>,
    #[serde(default)]
    chunk_id: Option<Value>,
    #[serde(default)]
    passage: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

pub fn read_queries(path: &Path) -> Result<ParseOutcome<QuerySet>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open query set: {}", path.display()))?;
    parse_queries(BufReader::new(file))
        .with_context(|| format!("failed to read query set: {}", path.display()))
}

/// One `{"qid","query","paper_id"}` object per line. The paper id is stored
/// normalized. Lines that are not JSON, lack a qid, or repeat a qid are skipped.
pub fn parse_queries<R: BufRead>(reader: R) -> Result<ParseOutcome<QuerySet>> {
    let mut queries = QuerySet::default();
    let mut skipped_lines = 0usize;
    let mut duplicate_lines = 0usize;

    for (line_index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = match serde_json::from_str::<QueryLine>(&line) {
            Ok(parsed) if !parsed.qid.trim().is_empty() => parsed,
            _ => {
                debug!(line = line_index + 1, "skipping malformed query line");
                skipped_lines += 1;
                continue;
            }
        };

        let inserted = queries.insert(Query {
            qid: parsed.qid.trim().to_string(),
            text: parsed.query,
            paper_id: normalize_paper(&parsed.paper_id),
        });
        if !inserted {
            duplicate_lines += 1;
        }
    }

    Ok(ParseOutcome {
        value: queries,
        skipped_lines,
        duplicate_lines,
    })
}

pub fn read_passages(path: &Path) -> Result<ParseOutcome<PassageStore>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open passage metadata: {}", path.display()))?;
    parse_passages(BufReader::new(file))
        .with_context(|| format!("failed to read passage metadata: {}", path.display()))
}

/// Passage metadata lines: `paper_id`, `chunk_id` and `passage` (or `text`).
/// Other fields such as `category` are ignored. A line without a usable
/// paper id or chunk index is skipped.
pub fn parse_passages<R: BufRead>(reader: R) -> Result<ParseOutcome<PassageStore>> {
    let mut store = PassageStore::default();
    let mut skipped_lines = 0usize;
    let mut duplicate_lines = 0usize;

    for (line_index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(record) = parse_passage_line(&line) else {
            debug!(line = line_index + 1, "skipping malformed passage line");
            skipped_lines += 1;
            continue;
        };
        if !store.insert(record) {
            duplicate_lines += 1;
        }
    }

    Ok(ParseOutcome {
        value: store,
        skipped_lines,
        duplicate_lines,
    })
}

fn parse_passage_line(line: &str) -> Option<PassageRecord> {
    let parsed = serde_json::from_str::<PassageLine>(line).ok()?;
    let paper_id = normalize_paper(parsed.paper_id.as_deref().unwrap_or_default());
    let chunk_index = chunk_index_from_json(parsed.chunk_id.as_ref())?;
    let document_id = make_document_id(&paper_id, Some(chunk_index))?;
    let text = parsed
        .passage
        .filter(|passage| !passage.trim().is_empty())
        .or(parsed.text)
        .unwrap_or_default();

    Some(PassageRecord {
        document_id,
        paper_id,
        chunk_index,
        text,
    })
}
