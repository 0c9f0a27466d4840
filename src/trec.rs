//! Line-oriented run and qrels exchange formats.
//!
//! Run line: `qid Q0 document_id rank score tag`.
//! Qrels line: `qid 0 document_id relevance`.
//!
//! Reads are best-effort: malformed lines are skipped and counted in the
//! returned [`ParseOutcome`]. Only I/O failures are errors.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::model::{DocumentId, ParseOutcome, Qrels, RankedHit, RankedRun};
use crate::util::ensure_parent_directory;

const RUN_QUERY_LITERAL: &str = "Q0";
const QRELS_ITERATION_LITERAL: &str = "0";
const RUN_FIELD_COUNT: usize = 6;
const QRELS_FIELD_COUNT: usize = 4;
const DEFAULT_RUN_TAG: &str = "run";

pub fn read_run(path: &Path) -> Result<ParseOutcome<RankedRun>> {
    let file =
        File::open(path).with_context(|| format!("failed to open run file: {}", path.display()))?;
    parse_run(BufReader::new(file))
        .with_context(|| format!("failed to read run file: {}", path.display()))
}

/// Groups run lines by qid and orders each group by the persisted rank.
///
/// Scores are not consulted for ordering. When a document appears twice for
/// the same query, the better-ranked line is kept and the other is counted as
/// a duplicate.
pub fn parse_run<R: BufRead>(reader: R) -> Result<ParseOutcome<RankedRun>> {
    let mut grouped = BTreeMap::<String, Vec<RankedHit>>::new();
    let mut skipped_lines = 0usize;

    for (line_index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_run_line(&line) {
            Some((qid, hit)) => grouped.entry(qid).or_default().push(hit),
            None => {
                debug!(line = line_index + 1, "skipping malformed run line");
                skipped_lines += 1;
            }
        }
    }

    let mut run = RankedRun::default();
    let mut duplicate_lines = 0usize;
    for (qid, mut hits) in grouped {
        hits.sort_by_key(|hit| hit.rank);
        let mut seen = HashSet::<DocumentId>::with_capacity(hits.len());
        let before = hits.len();
        hits.retain(|hit| seen.insert(hit.document_id.clone()));
        duplicate_lines += before - hits.len();
        run.insert(qid, hits);
    }

    Ok(ParseOutcome {
        value: run,
        skipped_lines,
        duplicate_lines,
    })
}

fn parse_run_line(line: &str) -> Option<(String, RankedHit)> {
    let fields = line.split_whitespace().collect::<Vec<&str>>();
    if fields.len() < RUN_FIELD_COUNT {
        return None;
    }

    let qid = fields[0].to_string();
    let document_id = DocumentId::parse(fields[2])?;
    let rank = fields[3].parse::<u32>().ok().filter(|rank| *rank >= 1)?;
    let score = fields[4].parse::<f64>().ok().filter(|score| score.is_finite())?;
    let tag = fields[5..].join(" ");

    Some((
        qid,
        RankedHit {
            rank,
            document_id,
            score,
            tag,
        },
    ))
}

/// Writes every query's hits with ranks renumbered 1..n in list order and
/// scores at six decimals. Returns the number of lines written.
pub fn write_run(path: &Path, run: &RankedRun) -> Result<usize> {
    ensure_parent_directory(path)?;
    let file = File::create(path)
        .with_context(|| format!("failed to create run file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let mut written = 0usize;
    for (qid, hits) in run.iter() {
        for (index, hit) in hits.iter().enumerate() {
            let tag = if hit.tag.trim().is_empty() {
                DEFAULT_RUN_TAG
            } else {
                hit.tag.as_str()
            };
            writeln!(
                writer,
                "{} {} {} {} {:.6} {}",
                qid,
                RUN_QUERY_LITERAL,
                hit.document_id,
                index + 1,
                hit.score,
                tag
            )
            .with_context(|| format!("failed to write run file: {}", path.display()))?;
            written += 1;
        }
    }

    writer
        .flush()
        .with_context(|| format!("failed to flush run file: {}", path.display()))?;
    Ok(written)
}

pub fn read_qrels(path: &Path) -> Result<ParseOutcome<Qrels>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open qrels file: {}", path.display()))?;
    parse_qrels(BufReader::new(file))
        .with_context(|| format!("failed to read qrels file: {}", path.display()))
}

/// A document is relevant iff its integer relevance is positive. Queries whose
/// lines are all non-positive are kept with an empty relevant set.
pub fn parse_qrels<R: BufRead>(reader: R) -> Result<ParseOutcome<Qrels>> {
    let mut qrels = Qrels::default();
    let mut skipped_lines = 0usize;
    let mut duplicate_lines = 0usize;

    for (line_index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Some((qid, document_id, relevance)) = parse_qrels_line(&line) else {
            debug!(line = line_index + 1, "skipping malformed qrels line");
            skipped_lines += 1;
            continue;
        };

        if relevance > 0 {
            if !qrels.add_relevant(&qid, document_id) {
                duplicate_lines += 1;
            }
        } else {
            qrels.touch(&qid);
        }
    }

    Ok(ParseOutcome {
        value: qrels,
        skipped_lines,
        duplicate_lines,
    })
}

fn parse_qrels_line(line: &str) -> Option<(String, DocumentId, i64)> {
    let fields = line.split_whitespace().collect::<Vec<&str>>();
    if fields.len() != QRELS_FIELD_COUNT {
        return None;
    }

    let document_id = DocumentId::parse(fields[2])?;
    let relevance = fields[3].parse::<i64>().ok()?;
    Some((fields[0].to_string(), document_id, relevance))
}

/// Writes one `qid 0 document_id 1` line per relevant document. Queries with
/// an empty relevant set produce no lines.
pub fn write_qrels(path: &Path, qrels: &Qrels) -> Result<usize> {
    ensure_parent_directory(path)?;
    let file = File::create(path)
        .with_context(|| format!("failed to create qrels file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let mut written = 0usize;
    for (qid, relevant) in qrels.iter() {
        for document_id in relevant {
            writeln!(
                writer,
                "{} {} {} 1",
                qid, QRELS_ITERATION_LITERAL, document_id
            )
            .with_context(|| format!("failed to write qrels file: {}", path.display()))?;
            written += 1;
        }
    }

    writer
        .flush()
        .with_context(|| format!("failed to flush qrels file: {}", path.display()))?;
    Ok(written)
}
