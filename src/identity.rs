use serde_json::Value;

use crate::model::DocumentId;

const ABS_URL_PREFIXES: [&str; 2] = ["http://arxiv.org/abs/", "https://arxiv.org/abs/"];
const ARXIV_LABEL: &str = "arXiv:";

/// Canonical short form of an arXiv paper reference.
///
/// Removes the abstract-page URL prefixes and the `arXiv:` label and trims
/// whitespace. The version suffix (`v1`, `v3`, ...) is part of the id and is
/// kept. Stripping repeats until nothing changes, so the result is stable
/// under re-normalization.
pub fn normalize_paper(raw: &str) -> String {
    let mut current = raw.trim().to_string();
    loop {
        let mut next = current.clone();
        for prefix in ABS_URL_PREFIXES {
            next = next.replace(prefix, "");
        }
        next = next.replace(ARXIV_LABEL, "");
        let next = next.trim().to_string();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Builds the id for an already-normalized paper. `None` stands for the
/// empty id: no paper, or no usable chunk index.
pub fn make_document_id(paper: &str, chunk_index: Option<u64>) -> Option<DocumentId> {
    if paper.is_empty() {
        return None;
    }
    let chunk_index = chunk_index?;
    Some(DocumentId::from_parts(paper, chunk_index))
}

/// Reads a chunk index from a metadata field: a non-negative integer, an
/// integral float, or a string holding one.
pub fn chunk_index_from_json(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.is_finite() && *float >= 0.0 && float.fract() == 0.0)
                .map(|float| float as u64)
        }),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}
