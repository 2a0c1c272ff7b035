//! Line-granularity edit scripts.
//!
//! [`line_diff`] computes an ordered sequence of [`EditOp`]s between two
//! texts using the `similar` crate's Myers diff, tokenized at line level
//! and with an optional wall-clock deadline. Deliberately no semantic
//! cleanup passes run afterwards: for line-oriented input they shift
//! fragments to sub-line boundaries and make the alignment worse.
//!
//! [`compute_line_diff`] is the composed primitive used by the merge
//! pipeline: marked regions are collapsed before diffing and restored in
//! the resulting ops, so a region always moves as one unit.

use std::time::Duration;

use similar::{Algorithm, ChangeTag, TextDiff};

use crate::marker;

// ---------------------------------------------------------------------------
// Edit scripts
// ---------------------------------------------------------------------------

/// The kind of one edit-script entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// Content present in both texts.
    Equal,
    /// Content only in the new text.
    Insert,
    /// Content only in the old text.
    Delete,
}

/// One entry of an edit script. `text` is a run of one or more whole
/// lines (newlines included, except possibly at end of input).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOp {
    pub kind: EditKind,
    pub text: String,
}

impl EditOp {
    pub fn equal(text: impl Into<String>) -> Self {
        Self { kind: EditKind::Equal, text: text.into() }
    }

    pub fn insert(text: impl Into<String>) -> Self {
        Self { kind: EditKind::Insert, text: text.into() }
    }

    pub fn delete(text: impl Into<String>) -> Self {
        Self { kind: EditKind::Delete, text: text.into() }
    }
}

/// Concatenate the entries that make up the new text (Equal + Insert).
pub fn reconstruct_new(ops: &[EditOp]) -> String {
    ops.iter()
        .filter(|op| op.kind != EditKind::Delete)
        .map(|op| op.text.as_str())
        .collect()
}

/// Concatenate the entries that make up the old text (Equal + Delete).
pub fn reconstruct_old(ops: &[EditOp]) -> String {
    ops.iter()
        .filter(|op| op.kind != EditKind::Insert)
        .map(|op| op.text.as_str())
        .collect()
}

// ---------------------------------------------------------------------------
// Line diff
// ---------------------------------------------------------------------------

/// Compute a line-level edit script from `old` to `new`.
///
/// Adjacent changes with the same tag are coalesced into a single run.
/// `deadline` bounds the diff algorithm's wall-clock time; when it
/// expires the result is coarser but still a valid edit script. `None`
/// means unbounded.
pub fn line_diff(old: &str, new: &str, deadline: Option<Duration>) -> Vec<EditOp> {
    let mut config = TextDiff::configure();
    config.algorithm(Algorithm::Myers);
    if let Some(budget) = deadline {
        config.timeout(budget);
    }
    let diff = config.diff_lines(old, new);

    let mut ops: Vec<EditOp> = Vec::new();
    for change in diff.iter_all_changes() {
        let kind = match change.tag() {
            ChangeTag::Equal => EditKind::Equal,
            ChangeTag::Insert => EditKind::Insert,
            ChangeTag::Delete => EditKind::Delete,
        };
        match ops.last_mut() {
            Some(last) if last.kind == kind => last.text.push_str(change.value()),
            _ => ops.push(EditOp { kind, text: change.value().to_string() }),
        }
    }
    ops
}

/// Re-split every run into one op per line, preserving order and kind.
///
/// The reconciliation algorithm matches script entries individually;
/// feeding it line-sized entries lets it keep or drop each line on its
/// own instead of all-or-nothing per run.
pub fn split_into_lines(ops: Vec<EditOp>) -> Vec<EditOp> {
    let mut out = Vec::new();
    for op in ops {
        for segment in op.text.split_inclusive('\n') {
            out.push(EditOp {
                kind: op.kind,
                text: segment.to_string(),
            });
        }
    }
    out
}

/// Line diff with marked regions kept atomic.
///
/// Both texts are grouped with the marker token before diffing and every
/// resulting op is ungrouped again, so callers see ordinary multi-line
/// text while the diff itself can never split a region.
///
/// PRE: both texts passed [`marker::validate_markers`].
pub fn compute_line_diff(
    old: &str,
    new: &str,
    token: &str,
    deadline: Option<Duration>,
) -> Vec<EditOp> {
    let grouped_old = marker::group_marker_content(old, token);
    let grouped_new = marker::group_marker_content(new, token);

    let mut ops = line_diff(&grouped_old, &grouped_new, deadline);
    for op in &mut ops {
        op.text = marker::ungroup_marker_content(&op.text, token);
    }
    ops
}
