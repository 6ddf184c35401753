//! Compact region-index selection syntax.
//!
//! A selection is a comma-separated list of indices and inclusive ranges,
//! e.g. `0, 100 - 102, 2000`. Whitespace anywhere around tokens and separators
//! is ignored, as are empty tokens. Indices are bounded so a wide range
//! cannot expand into an unbounded set.

use std::collections::BTreeSet;

/// Exclusive index bound used by [`parse_selection`].
pub const DEFAULT_INDEX_LIMIT: usize = 1 << 20;

/// Errors raised while parsing a selection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("Range {start}-{end} is reversed")]
    InvalidRange { start: usize, end: usize },
    #[error("Invalid selection token {0:?}")]
    InvalidToken(String),
    #[error("Index {index} is out of bounds (limit {limit})")]
    OutOfBounds { index: usize, limit: usize },
}

fn parse_index(text: &str, token: &str) -> Result<usize, SelectionError> {
    text.trim()
        .parse()
        .map_err(|_| SelectionError::InvalidToken(token.to_string()))
}

/// Parse a selection into a sorted set of unique region indices below
/// [`DEFAULT_INDEX_LIMIT`].
pub fn parse_selection(expr: &str) -> Result<BTreeSet<usize>, SelectionError> {
    parse_selection_within(expr, DEFAULT_INDEX_LIMIT)
}

/// Parse a selection whose indices must all be below `limit`.
///
/// Bounds are checked before a range is expanded.
pub fn parse_selection_within(expr: &str, limit: usize) -> Result<BTreeSet<usize>, SelectionError> {
    let check = |index: usize| {
        if index < limit {
            Ok(index)
        } else {
            Err(SelectionError::OutOfBounds { index, limit })
        }
    };
    let mut indices = BTreeSet::new();
    for token in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.split_once('-') {
            Some((start, end)) => {
                let start = parse_index(start, token)?;
                let end = parse_index(end, token)?;
                if start > end {
                    return Err(SelectionError::InvalidRange { start, end });
                }
                indices.extend(check(start)?..=check(end)?);
            }
            None => {
                indices.insert(check(parse_index(token, token)?)?);
            }
        }
    }
    Ok(indices)
}

/// Render a set back into the compact form, collapsing consecutive runs.
pub fn format_selection(indices: &BTreeSet<usize>) -> String {
    let mut parts = Vec::new();
    let mut iter = indices.iter().copied();
    let Some(mut start) = iter.next() else {
        return String::new();
    };
    let mut end = start;

    for index in iter {
        if index == end + 1 {
            end = index;
            continue;
        }
        parts.push(format_run(start, end));
        start = index;
        end = index;
    }
    parts.push(format_run(start, end));
    parts.join(",")
}

fn format_run(start: usize, end: usize) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}
