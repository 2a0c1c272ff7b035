//! File-policy gate for discovery and extraction.
//!
//! Encapsulates `ignore_patterns` and `max_file_size` from the
//! `[options]` config section and evaluates candidate files before they
//! enter the contact-point pipeline.
//!
//! For each candidate the policy returns a [`PolicyDecision`]:
//!
//! | Condition | Decision |
//! |-----------|----------|
//! | Path matches an ignore pattern | `Ignored` |
//! | Size exceeds `max_file_size` (when > 0) | `Oversize` |
//! | Neither | `Allow` |

use std::path::Path;

use glob_match::glob_match;
use tracing::{debug, warn};

use crate::config::OptionsConfig;

// ---------------------------------------------------------------------------
// Decision enum
// ---------------------------------------------------------------------------

/// The outcome of evaluating a file against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// File passes all checks.
    Allow,
    /// File matches an ignore pattern — skip it.
    Ignored { pattern: String },
    /// File exceeds the configured `max_file_size` — skip it.
    Oversize { size: u64, limit: u64 },
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Short human-readable label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Ignored { .. } => "ignored",
            Self::Oversize { .. } => "oversize",
        }
    }
}

// ---------------------------------------------------------------------------
// FilePolicy
// ---------------------------------------------------------------------------

/// Evaluates candidate files against ignore patterns and the size limit.
#[derive(Debug, Clone)]
pub struct FilePolicy {
    max_file_size: u64,
    ignore_patterns: Vec<String>,
}

impl FilePolicy {
    pub fn new(max_file_size: u64, ignore_patterns: Vec<String>) -> Self {
        Self {
            max_file_size,
            ignore_patterns,
        }
    }

    pub fn from_options(options: &OptionsConfig) -> Self {
        Self::new(options.max_file_size, options.ignore_patterns.clone())
    }

    /// Evaluate a file.
    ///
    /// `rel_path` is forward-slash separated and relative to the tree
    /// root being walked; `size` is the file size in bytes.
    pub fn evaluate(&self, rel_path: &str, size: u64) -> PolicyDecision {
        for pattern in &self.ignore_patterns {
            if glob_match(pattern, rel_path) {
                debug!(
                    path = rel_path,
                    pattern = pattern.as_str(),
                    "file matches ignore pattern"
                );
                return PolicyDecision::Ignored {
                    pattern: pattern.clone(),
                };
            }
        }

        if self.max_file_size > 0 && size > self.max_file_size {
            warn!(
                path = rel_path,
                size,
                limit = self.max_file_size,
                "file exceeds max_file_size — skipping"
            );
            return PolicyDecision::Oversize {
                size,
                limit: self.max_file_size,
            };
        }

        PolicyDecision::Allow
    }

    /// Evaluate a file on disk (reads metadata for size).
    ///
    /// If the file cannot be stat'd, returns `Allow` and lets the actual
    /// read report the I/O error.
    pub fn evaluate_path(&self, base_dir: &Path, rel_path: &str) -> PolicyDecision {
        let full = base_dir.join(rel_path);
        let size = match std::fs::metadata(&full) {
            Ok(m) => m.len(),
            Err(_) => return PolicyDecision::Allow,
        };
        self.evaluate(rel_path, size)
    }
}
