//! Edit-script reconciliation.
//!
//! Combines two independently computed edit scripts into the final merge
//! result for one contact-point file:
//!
//! - the *upstream script*: ancestor → upstream, what upstream changed
//!   since the contact point was written;
//! - the *patch script*: upstream → modified, what the contact point
//!   appears to change when naively diffed against the **new** upstream —
//!   wrong exactly where upstream itself moved.
//!
//! The tie-break policy, applied in script order over the patch script:
//!
//! - `Equal` passes through: uncontested context.
//! - `Delete` (content in upstream, absent from the contact point) is
//!   re-emitted as `Equal`: the apparent deletion is an artifact of
//!   diffing against the wrong baseline, and upstream content is kept.
//!   When a fuzzy-matching `Insert` exists in the upstream script the
//!   case is ambiguous (a genuine deletion by the patch author is
//!   indistinguishable from baseline drift); the content is still kept,
//!   but reported as an *uncertain deletion* for human review.
//! - `Insert` (genuinely new custom content) is kept unless a
//!   fuzzy-matching `Delete` exists in the upstream script. In that case
//!   upstream already removed the content independently and re-inserting
//!   it would resurrect dead code, so it is dropped (and reported).
//!
//! [`transform_diffs`] never fails; at worst it returns a keep-everything
//! script.
//!
//! [`merge_contact_point`] runs the whole per-file pipeline on *grouped*
//! text (see [`crate::marker`]) with one script entry per grouped line, so
//! a marked region is matched, kept, or dropped as a single unit and
//! stale context lines dragged along next to an insertion are dropped
//! individually.

use tracing::{debug, warn};

use crate::config::MergeConfig;
use crate::diff::{line_diff, split_into_lines, EditKind, EditOp};
use crate::errors::MarkerError;
use crate::fuzzy;
use crate::marker;

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// The transformed script plus everything a reviewer should look at.
#[derive(Debug, Clone, Default)]
pub struct TransformOutcome {
    /// The merged edit script. Replaying Equal + Insert yields the final
    /// text.
    pub ops: Vec<EditOp>,
    /// Deleted blocks that had a fuzzy correlate among upstream's
    /// insertions. Kept in the output, flagged because a genuine patch
    /// deletion would look exactly the same.
    pub uncertain_deletions: Vec<String>,
    /// Inserted blocks dropped because upstream independently deleted
    /// equivalent content.
    pub dropped_insertions: Vec<String>,
}

impl TransformOutcome {
    /// `true` when nothing needs human attention.
    pub fn is_clean(&self) -> bool {
        self.uncertain_deletions.is_empty() && self.dropped_insertions.is_empty()
    }
}

/// Merge the patch script against the upstream script per the tie-break
/// policy above. Entries are matched one against one with the fuzzy
/// threshold; callers control granularity by the entries they pass in.
pub fn transform_diffs(
    upstream_script: &[EditOp],
    patch_script: Vec<EditOp>,
    threshold: u8,
) -> TransformOutcome {
    let upstream_inserts: Vec<&str> = upstream_script
        .iter()
        .filter(|op| op.kind == EditKind::Insert)
        .map(|op| op.text.as_str())
        .collect();
    let upstream_deletes: Vec<&str> = upstream_script
        .iter()
        .filter(|op| op.kind == EditKind::Delete)
        .map(|op| op.text.as_str())
        .collect();

    let mut outcome = TransformOutcome::default();

    for op in patch_script {
        match op.kind {
            EditKind::Equal => outcome.ops.push(op),
            EditKind::Delete => {
                let correlated = upstream_inserts
                    .iter()
                    .any(|ins| fuzzy::is_similar(ins, &op.text, threshold));
                if correlated {
                    debug!(
                        block = %preview(&op.text),
                        "deleted block matches an upstream insertion; kept, flagged for review"
                    );
                    outcome.uncertain_deletions.push(op.text.clone());
                }
                outcome.ops.push(EditOp::equal(op.text));
            }
            EditKind::Insert => {
                let removed_upstream = upstream_deletes
                    .iter()
                    .any(|del| fuzzy::is_similar(del, &op.text, threshold));
                if removed_upstream {
                    debug!(
                        block = %preview(&op.text),
                        "insertion matches an upstream deletion; dropped"
                    );
                    outcome.dropped_insertions.push(op.text);
                } else {
                    outcome.ops.push(op);
                }
            }
        }
    }

    outcome
}

/// The final text of a transformed script: Equal + Insert in script order.
pub fn replay(ops: &[EditOp]) -> String {
    crate::diff::reconstruct_new(ops)
}

fn preview(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

// ---------------------------------------------------------------------------
// Per-file merge pipeline
// ---------------------------------------------------------------------------

/// Result of merging one contact-point file.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    /// The merged file content.
    pub merged: String,
    /// Review diagnostics carried over from the transform, ungrouped back
    /// to plain text.
    pub uncertain_deletions: Vec<String>,
    pub dropped_insertions: Vec<String>,
}

impl MergeOutput {
    /// `true` when the operator should double-check this file.
    pub fn needs_review(&self) -> bool {
        !self.uncertain_deletions.is_empty()
    }
}

/// Merge one contact point: `upstream` is the target's current content,
/// `modified` the contact-point file, `ancestor` the unmodified baseline
/// both derive from.
///
/// Marker structure is validated on all three texts first; a structural
/// error aborts this file only.
pub fn merge_contact_point(
    upstream: &str,
    modified: &str,
    ancestor: &str,
    token: &str,
    merge_cfg: &MergeConfig,
) -> Result<MergeOutput, MarkerError> {
    for text in [upstream, modified, ancestor] {
        marker::validate_markers(text, token)?;
    }

    let grouped_upstream = marker::group_marker_content(upstream, token);
    let grouped_modified = marker::group_marker_content(modified, token);
    let grouped_ancestor = marker::group_marker_content(ancestor, token);

    let deadline = merge_cfg.diff_deadline();
    let upstream_script =
        split_into_lines(line_diff(&grouped_ancestor, &grouped_upstream, deadline));
    let patch_script =
        split_into_lines(line_diff(&grouped_upstream, &grouped_modified, deadline));

    let outcome = transform_diffs(&upstream_script, patch_script, merge_cfg.fuzzy_threshold);
    let merged = marker::ungroup_marker_content(&replay(&outcome.ops), token);

    let ungroup = |blocks: Vec<String>| -> Vec<String> {
        blocks
            .into_iter()
            .map(|b| marker::ungroup_marker_content(&b, token))
            .collect()
    };
    let uncertain_deletions = ungroup(outcome.uncertain_deletions);
    let dropped_insertions = ungroup(outcome.dropped_insertions);

    if !uncertain_deletions.is_empty() {
        warn!(
            count = uncertain_deletions.len(),
            "blocks kept that upstream may have rewritten; review the result"
        );
    }
    debug!(
        merged_len = merged.len(),
        dropped = dropped_insertions.len(),
        "contact point merged"
    );

    Ok(MergeOutput {
        merged,
        uncertain_deletions,
        dropped_insertions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::EditOp;
    use crate::fuzzy;

    const TOKEN: &str = "################";

    fn cfg() -> MergeConfig {
        MergeConfig::default()
    }

    #[test]
    fn test_equal_passes_through() {
        let patch = vec![EditOp::equal("a\nb\n")];
        let out = transform_diffs(&[], patch, 95);
        assert_eq!(out.ops, vec![EditOp::equal("a\nb\n")]);
        assert!(out.is_clean());
    }

    #[test]
    fn test_uncorrelated_delete_becomes_equal() {
        // Upstream added "new stuff"; the patch script claims "other
        // thing" was deleted — an artifact of diffing against the moved
        // baseline. Keep it, silently.
        let upstream_script = vec![EditOp::equal("ctx\n"), EditOp::insert("new stuff\n")];
        let patch = vec![EditOp::delete("other thing\n")];
        let out = transform_diffs(&upstream_script, patch, 95);
        assert_eq!(out.ops, vec![EditOp::equal("other thing\n")]);
        assert!(out.is_clean());
    }

    #[test]
    fn test_correlated_delete_kept_but_flagged() {
        let upstream_script = vec![EditOp::insert("int limit = 10;\n")];
        let patch = vec![EditOp::delete("int limit = 10;\n")];
        let out = transform_diffs(&upstream_script, patch, 95);
        // Still emitted as context — content is never silently dropped.
        assert_eq!(out.ops, vec![EditOp::equal("int limit = 10;\n")]);
        assert_eq!(out.uncertain_deletions, vec!["int limit = 10;\n"]);
    }

    #[test]
    fn test_fresh_insert_kept() {
        let patch = vec![EditOp::insert("custom_call();\n")];
        let out = transform_diffs(&[], patch, 95);
        assert_eq!(out.ops, vec![EditOp::insert("custom_call();\n")]);
        assert!(out.is_clean());
    }

    #[test]
    fn test_insert_matching_upstream_delete_dropped() {
        let upstream_script = vec![EditOp::delete("obsolete();\n")];
        let patch = vec![
            EditOp::equal("keep\n"),
            EditOp::insert("obsolete();\n"),
        ];
        let out = transform_diffs(&upstream_script, patch, 95);
        assert_eq!(out.ops, vec![EditOp::equal("keep\n")]);
        assert_eq!(out.dropped_insertions, vec!["obsolete();\n"]);
        assert_eq!(replay(&out.ops), "keep\n");
    }

    #[test]
    fn test_never_fails_worst_case_keeps_everything() {
        // Pathological scripts still produce a usable keep-everything
        // result.
        let upstream_script = vec![EditOp::insert("x\n"), EditOp::delete("y\n")];
        let patch = vec![
            EditOp::delete("a\n"),
            EditOp::delete("b\n"),
            EditOp::equal("c\n"),
        ];
        let out = transform_diffs(&upstream_script, patch, 0);
        // threshold 0 correlates everything; deletes are still kept.
        assert_eq!(replay(&out.ops), "a\nb\nc\n");
    }

    #[test]
    fn test_noop_patch_yields_upstream() {
        // modified == ancestor: the merge must reproduce upstream exactly.
        let ancestor = "a\nb\nc\n";
        let upstream = "a\nB\nc\nd\n";
        let modified = ancestor;
        let out = merge_contact_point(upstream, modified, ancestor, TOKEN, &cfg()).unwrap();
        assert_eq!(out.merged, upstream);
    }

    #[test]
    fn test_identical_everywhere() {
        let text = "same\neverywhere\n";
        let out = merge_contact_point(text, text, text, TOKEN, &cfg()).unwrap();
        assert_eq!(out.merged, text);
        assert!(!out.needs_review());
    }

    #[test]
    fn test_marked_insertion_survives_upstream_edit() {
        let ancestor = "one\ntwo\nthree\nfour\n";
        let upstream = "one\ntwo!\nthree\nfour\n";
        let modified = format!(
            "one\ntwo\n//{TOKEN} start\ncustom\n//{TOKEN} end\nthree\nfour\n"
        );
        let out =
            merge_contact_point(upstream, &modified, ancestor, TOKEN, &cfg()).unwrap();
        // Upstream's edit is adopted, the marked block survives intact,
        // and the stale ancestor line is not resurrected next to it.
        assert!(out.merged.contains("two!\n"));
        assert!(out
            .merged
            .contains(&format!("//{TOKEN} start\ncustom\n//{TOKEN} end\n")));
        assert!(!out.merged.contains("\ntwo\n"));
        assert_eq!(out.dropped_insertions, vec!["two\n"]);
    }

    #[test]
    fn test_malformed_markers_abort_file() {
        let modified = format!("//{TOKEN} start\nnever closed\n");
        let err = merge_contact_point("a\n", &modified, "a\n", TOKEN, &cfg());
        assert!(matches!(err, Err(MarkerError::UnclosedStart(_))));
    }

    #[test]
    fn test_fixture_scenario() {
        // Ancestor ends "...hated someone as much as you."; upstream
        // rewrites to "...been so glad to know you."; the contact point
        // adds two marked blocks to the ancestor-based text.
        let unmodified = "I\nhave\nnever\nhated\nsomeone\nas\nmuch\nas\nyou.\n";
        let update = "I\nhave\nnever\nbeen\nso\nglad\nto\nknow\nyou.\n";
        let contact_point = format!(
            "I\nhave\nnever\n\
             {TOKEN} start\nknown\nhow\nhard\nit\nis\nfor\n{TOKEN} end\n\
             someone\n\
             {TOKEN} start\nto\ngive\nup\n{TOKEN} end\n\
             as\nmuch\nas\nyou.\n"
        );

        let out =
            merge_contact_point(update, &contact_point, unmodified, TOKEN, &cfg()).unwrap();

        // Both marked blocks survive, verbatim and in order.
        let first = format!("{TOKEN} start\nknown\nhow\nhard\nit\nis\nfor\n{TOKEN} end\n");
        let second = format!("{TOKEN} start\nto\ngive\nup\n{TOKEN} end\n");
        let first_at = out.merged.find(&first).expect("first block missing");
        let second_at = out.merged.find(&second).expect("second block missing");
        assert!(first_at < second_at);

        // Upstream's replacement is adopted, anchor context preserved.
        assert!(out.merged.starts_with("I\nhave\nnever\n"));
        assert!(out.merged.contains("been\nso\nglad\n"));
        assert!(out.merged.ends_with("you.\n"));

        // Stale ancestor lines dragged along by the insertion are dropped,
        // not resurrected next to upstream's replacement.
        assert!(!out.merged.contains("someone\n"));
        assert!(!out.merged.contains("much\n"));

        // Near-equality against the hand-written golden text.
        let golden = format!(
            "I\nhave\nnever\n{first}been\nso\nglad\n{second}to\nknow\nyou.\n"
        );
        let score = fuzzy::similarity(&out.merged, &golden);
        assert!(score >= 80, "merged diverged from golden (ratio {score})");
    }
}
