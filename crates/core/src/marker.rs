//! Marked-region handling.
//!
//! Contact-point files wrap their custom content in marker pairs: a line
//! containing `<token> … start` opens a region, the next line containing
//! `<token> … end` closes it. Before a file is line-diffed, every region
//! is collapsed into a single line ([`group_marker_content`]) so the diff
//! can never align individual lines inside a region with unrelated lines
//! elsewhere; [`ungroup_marker_content`] is the exact inverse.
//!
//! Malformed marker structure (unbalanced or misordered pairs) is fatal
//! for the affected file and is caught up front by [`validate_markers`].

use tracing::trace;

use crate::errors::MarkerError;

/// What a line means for marker bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerLine {
    Start,
    End,
    Plain,
}

fn classify(line: &str, token: &str) -> MarkerLine {
    if !line.contains(token) {
        return MarkerLine::Plain;
    }
    if line.contains("start") {
        MarkerLine::Start
    } else if line.contains("end") {
        MarkerLine::End
    } else {
        MarkerLine::Plain
    }
}

/// The join token used when collapsing a region into one line.
///
/// Derived from the marker token and wrapped in ASCII record-separator
/// control characters, which cannot occur in text source files — so the
/// replacement in [`ungroup_marker_content`] can never match anything else.
fn separator(token: &str) -> String {
    format!("\u{1e}{token}\u{1e}")
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check that every start marker is closed by exactly one end marker, with
/// no nesting and no stray end markers.
///
/// Line numbers in the returned errors are 1-indexed.
pub fn validate_markers(text: &str, token: &str) -> Result<(), MarkerError> {
    let mut open: Option<usize> = None;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        match classify(line, token) {
            MarkerLine::Start => match open {
                Some(open_line) => {
                    return Err(MarkerError::NestedStart {
                        line: line_no,
                        open_line,
                    });
                }
                None => open = Some(line_no),
            },
            MarkerLine::End => {
                if open.take().is_none() {
                    return Err(MarkerError::UnexpectedEnd(line_no));
                }
            }
            MarkerLine::Plain => {}
        }
    }

    match open {
        Some(line) => Err(MarkerError::UnclosedStart(line)),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Collapse every marked region (start line through end line inclusive)
/// into a single line whose content is the region's lines joined with the
/// separator token.
///
/// PRE: `text` passed [`validate_markers`]. The result line-diffs as an
/// atomic unit; restore with [`ungroup_marker_content`].
pub fn group_marker_content(text: &str, token: &str) -> String {
    let sep = separator(token);
    let mut out = String::with_capacity(text.len());
    let mut region: Vec<&str> = Vec::new();
    let mut in_region = false;

    for segment in text.split_inclusive('\n') {
        let line = segment.strip_suffix('\n').unwrap_or(segment);
        let had_newline = segment.ends_with('\n');

        match classify(line, token) {
            MarkerLine::Start => {
                in_region = true;
                region.push(line);
            }
            MarkerLine::End if in_region => {
                region.push(line);
                out.push_str(&region.join(sep.as_str()));
                if had_newline {
                    out.push('\n');
                }
                region.clear();
                in_region = false;
            }
            _ => {
                if in_region {
                    region.push(line);
                } else {
                    out.push_str(segment);
                }
            }
        }
    }

    trace!(grouped_len = out.len(), "grouped marker content");
    out
}

/// Exact inverse of [`group_marker_content`]: every separator occurrence
/// becomes a newline again.
pub fn ungroup_marker_content(text: &str, token: &str) -> String {
    text.replace(&separator(token), "\n")
}

// ---------------------------------------------------------------------------
// Pure-copy detection
// ---------------------------------------------------------------------------

/// `true` when the file consists of nothing but marked regions — every
/// non-blank line is either inside a region or a file-level directive
/// (`<?xml …?>`, shebang). Such files are carried over by whole-file copy
/// instead of a merge.
///
/// Unbalanced files are never pure copies; they are reported as structural
/// errors elsewhere.
pub fn is_pure_copy(text: &str, token: &str) -> bool {
    if validate_markers(text, token).is_err() {
        return false;
    }

    let mut in_region = false;
    let mut saw_region = false;

    for line in text.lines() {
        match classify(line, token) {
            MarkerLine::Start => {
                in_region = true;
                saw_region = true;
            }
            MarkerLine::End => in_region = false,
            MarkerLine::Plain => {
                if in_region {
                    continue;
                }
                let trimmed = line.trim();
                if trimmed.is_empty()
                    || trimmed.starts_with("<?")
                    || trimmed.starts_with("#!")
                {
                    continue;
                }
                return false;
            }
        }
    }

    saw_region
}
