//! The merge orchestrator.
//!
//! [`MergeEngine`] drives the runtime record one entry at a time:
//!
//! ```text
//! Pending -> (PureCopy | Merged | Failed) -> Processed
//! ```
//!
//! Files are processed strictly in record order, single-threaded. After
//! every entry the full record is rewritten to disk before the next entry
//! is touched, so killing the process at any point loses at most one unit
//! of work and a restart resumes at the first pending entry.
//!
//! Failure policy: skip-and-continue. Any error while processing one
//! entry is logged with full context, appended to the error record, and
//! the entry is still marked processed so a poison entry is never retried
//! forever. No per-file failure aborts the batch; only startup errors
//! (record load, repository open) do.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::errors::CoreError;
use crate::record::{ErrorEntry, ErrorRecord, RuntimeEntry, RuntimeRecord};
use crate::transform::merge_contact_point;
use crate::vcs::{AncestorSource, Workspace};

// ---------------------------------------------------------------------------
// Outcomes & stats
// ---------------------------------------------------------------------------

/// What happened to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Whole-file copy, no merge needed.
    PureCopy,
    /// Three-way merge written to the target.
    Merged {
        /// Blocks were kept that upstream may have rewritten; the error
        /// record carries the detail.
        needs_review: bool,
    },
    /// The entry failed; detail is in the error record.
    Failed(String),
    /// Entry had no usable target path (error-record material that leaked
    /// into the work queue).
    Skipped,
}

impl EntryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PureCopy => "pure-copy",
            Self::Merged { .. } => "merged",
            Self::Failed(_) => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Statistics from one merge run.
#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    /// Entries already processed when the run started (resume).
    pub already_processed: usize,
    pub copied: usize,
    pub merged: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Merged entries flagged for human review.
    pub flagged_for_review: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MergeStats {
    pub fn processed(&self) -> usize {
        self.copied + self.merged + self.failed + self.skipped
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Per-file merge driver. Generic over the VCS collaborators so tests can
/// inject in-memory doubles.
pub struct MergeEngine<'a, A: AncestorSource, W: Workspace> {
    config: &'a AppConfig,
    ancestors: &'a A,
    workspace: &'a W,
}

impl<'a, A: AncestorSource, W: Workspace> MergeEngine<'a, A, W> {
    pub fn new(config: &'a AppConfig, ancestors: &'a A, workspace: &'a W) -> Self {
        Self {
            config,
            ancestors,
            workspace,
        }
    }

    /// Process every pending entry in record order.
    pub fn run(
        &self,
        record: &mut RuntimeRecord,
        errors: &ErrorRecord,
    ) -> Result<MergeStats, CoreError> {
        let mut stats = MergeStats {
            already_processed: record.processed_count(),
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        if stats.already_processed > 0 {
            info!(
                skipping = stats.already_processed,
                "resuming at first pending entry"
            );
        }

        while let Some((entry, outcome)) = self.step(record, errors)? {
            match &outcome {
                EntryOutcome::PureCopy => stats.copied += 1,
                EntryOutcome::Merged { needs_review } => {
                    stats.merged += 1;
                    if *needs_review {
                        stats.flagged_for_review += 1;
                    }
                }
                EntryOutcome::Failed(_) => stats.failed += 1,
                EntryOutcome::Skipped => stats.skipped += 1,
            }
            debug!(
                contact_point = %entry.contact_point,
                outcome = outcome.label(),
                "entry processed"
            );
        }

        stats.completed_at = Some(Utc::now());
        info!(
            copied = stats.copied,
            merged = stats.merged,
            failed = stats.failed,
            flagged = stats.flagged_for_review,
            "merge run complete"
        );
        Ok(stats)
    }

    /// Process the first pending entry, persist the record, and return
    /// the entry with its outcome. `None` when nothing is pending.
    ///
    /// Record persistence errors are the one thing that propagates: if
    /// the record cannot be saved, continuing would break resumability.
    pub fn step(
        &self,
        record: &mut RuntimeRecord,
        errors: &ErrorRecord,
    ) -> Result<Option<(RuntimeEntry, EntryOutcome)>, CoreError> {
        let Some(index) = record.first_pending() else {
            return Ok(None);
        };
        let entry = record.entries()[index].clone();

        let outcome = self.process(&entry, errors)?;

        if let EntryOutcome::Failed(detail) = &outcome {
            error!(
                contact_point = %entry.contact_point,
                target = %entry.target_path(),
                detail,
                "entry failed — recorded, continuing with the next one"
            );
        }

        record.mark_processed(index);
        record.save()?;
        Ok(Some((entry, outcome)))
    }

    /// Run one entry through the state machine. Per-entry failures are
    /// captured into `EntryOutcome::Failed`; only error-record I/O
    /// propagates.
    fn process(
        &self,
        entry: &RuntimeEntry,
        errors: &ErrorRecord,
    ) -> Result<EntryOutcome, CoreError> {
        if !entry.has_match() {
            warn!(
                contact_point = %entry.contact_point,
                "entry has no target — skipping"
            );
            return Ok(EntryOutcome::Skipped);
        }

        if entry.is_pure_copy() {
            return match self.copy_entry(entry) {
                Ok(()) => Ok(EntryOutcome::PureCopy),
                Err(detail) => {
                    errors.append(&ErrorEntry::new(
                        entry.contact_point.clone(),
                        entry.matched.clone(),
                        detail.clone(),
                    ))?;
                    Ok(EntryOutcome::Failed(detail))
                }
            };
        }

        match self.merge_entry(entry) {
            Ok(review_notes) => {
                let needs_review = !review_notes.is_empty();
                if needs_review {
                    warn!(
                        contact_point = %entry.contact_point,
                        blocks = review_notes.len(),
                        "merged with blocks upstream may have rewritten — flagged for review"
                    );
                    errors.append(&ErrorEntry::new(
                        entry.contact_point.clone(),
                        entry.matched.clone(),
                        format!(
                            "merged, but {} block(s) were kept that upstream may have rewritten; first: {:?}",
                            review_notes.len(),
                            first_line(&review_notes[0]),
                        ),
                    ))?;
                }
                Ok(EntryOutcome::Merged { needs_review })
            }
            Err(detail) => {
                errors.append(&ErrorEntry::new(
                    entry.contact_point.clone(),
                    entry.matched.clone(),
                    detail.clone(),
                ))?;
                Ok(EntryOutcome::Failed(detail))
            }
        }
    }

    /// Byte-for-byte copy of the contact point over the target, then
    /// stage.
    fn copy_entry(&self, entry: &RuntimeEntry) -> Result<(), String> {
        let source = self
            .config
            .trees
            .contact_points_dir
            .join(&entry.contact_point);
        let target_rel = entry.target_path();
        let target = self.config.trees.container_root.join(target_rel);

        info!(
            contact_point = %entry.contact_point,
            "copying whole-file contact point"
        );

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("creating target dir: {e}"))?;
        }
        std::fs::copy(&source, &target).map_err(|e| format!("copying to target: {e}"))?;
        self.workspace
            .stage(target_rel)
            .map_err(|e| format!("staging target: {e}"))?;
        Ok(())
    }

    /// Fetch the three texts, merge, write the result back to the target,
    /// stage. Returns the uncertain-deletion notes for review.
    fn merge_entry(&self, entry: &RuntimeEntry) -> Result<Vec<String>, String> {
        let target_rel = entry.target_path();
        let source = self
            .config
            .trees
            .contact_points_dir
            .join(&entry.contact_point);
        let target = self.config.trees.container_root.join(target_rel);

        info!(contact_point = %entry.contact_point, "merging contact point");

        let upstream = std::fs::read_to_string(&target)
            .map_err(|e| format!("reading target '{}': {e}", target.display()))?;
        let modified = std::fs::read_to_string(&source)
            .map_err(|e| format!("reading contact point '{}': {e}", source.display()))?;
        let ancestor = self
            .ancestors
            .ancestor_content(target_rel)
            .map_err(|e| format!("fetching baseline content: {e}"))?;

        let output = merge_contact_point(
            &upstream,
            &modified,
            &ancestor,
            &self.config.marker.token,
            &self.config.merge,
        )
        .map_err(|e| format!("marker structure: {e}"))?;

        if !output.dropped_insertions.is_empty() {
            debug!(
                contact_point = %entry.contact_point,
                dropped = output.dropped_insertions.len(),
                "insertions dropped because upstream removed equivalent content"
            );
        }

        std::fs::write(&target, output.merged.as_bytes())
            .map_err(|e| format!("writing merged target: {e}"))?;
        self.workspace
            .stage(target_rel)
            .map_err(|e| format!("staging target: {e}"))?;

        Ok(output.uncertain_deletions)
    }
}

fn first_line(block: &str) -> &str {
    block.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VcsError;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    const TOKEN: &str = "GLUE-TOKEN";

    /// In-memory baseline content keyed by relative path.
    struct MapAncestors(HashMap<String, String>);

    impl AncestorSource for MapAncestors {
        fn ancestor_content(&self, rel_path: &str) -> Result<String, VcsError> {
            self.0.get(rel_path).cloned().ok_or_else(|| {
                VcsError::PathNotFound {
                    reference: "test".into(),
                    path: rel_path.into(),
                }
            })
        }
    }

    /// Records staged paths instead of touching an index.
    #[derive(Default)]
    struct RecordingWorkspace(Mutex<Vec<String>>);

    impl Workspace for RecordingWorkspace {
        fn stage(&self, rel_path: &str) -> Result<(), VcsError> {
            self.0.lock().unwrap().push(rel_path.to_string());
            Ok(())
        }
    }

    fn setup(dir: &Path) -> AppConfig {
        let mut config = AppConfig::for_tests(TOKEN);
        config.trees.container_root = dir.join("container");
        config.trees.contact_points_dir = dir.join("contactPoints");
        config.trees.working_dir = dir.join("work");
        for p in [
            &config.trees.container_root,
            &config.trees.contact_points_dir,
            &config.trees.working_dir,
        ] {
            fs::create_dir_all(p).unwrap();
        }
        config
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_run_merges_and_copies() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path());

        // Merge entry: upstream changed a line, contact point added a
        // marked block.
        let ancestor = "one\ntwo\nthree\n";
        write(&config.trees.container_root.join("src/Main.java"), "one\ntwo!\nthree\n");
        write(
            &config.trees.contact_points_dir.join("src/Main.java"),
            &format!("one\ntwo\n//{TOKEN} start\ncustom\n//{TOKEN} end\nthree\n"),
        );

        // Pure-copy entry.
        let pure = format!("<!--{TOKEN} start-->\n<item/>\n<!--{TOKEN} end-->\n");
        write(&config.trees.contact_points_dir.join("res/custom.xml"), &pure);
        write(&config.trees.container_root.join("res/custom.xml"), "<old/>\n");

        let mut record =
            RuntimeRecord::initialize(config.trees.runtime_record_path()).unwrap();
        record.push(RuntimeEntry::merge("src/Main.java", "src/Main.java"));
        record.push(RuntimeEntry::pure_copy("res/custom.xml", "res/custom.xml"));
        record.save().unwrap();
        let errors = ErrorRecord::initialize(config.trees.error_record_path()).unwrap();

        let ancestors = MapAncestors(HashMap::from([(
            "src/Main.java".to_string(),
            ancestor.to_string(),
        )]));
        let workspace = RecordingWorkspace::default();
        let engine = MergeEngine::new(&config, &ancestors, &workspace);

        let stats = engine.run(&mut record, &errors).unwrap();
        assert_eq!(stats.merged, 1);
        assert_eq!(stats.copied, 1);
        assert_eq!(stats.failed, 0);

        let merged =
            fs::read_to_string(config.trees.container_root.join("src/Main.java")).unwrap();
        assert!(merged.contains("two!\n"));
        assert!(merged.contains(&format!("//{TOKEN} start\ncustom\n//{TOKEN} end\n")));

        let copied =
            fs::read_to_string(config.trees.container_root.join("res/custom.xml")).unwrap();
        assert_eq!(copied, pure);

        let staged = workspace.0.lock().unwrap();
        assert_eq!(*staged, vec!["src/Main.java", "res/custom.xml"]);

        assert_eq!(record.pending_count(), 0);
        // The on-disk record reflects completion.
        let reloaded = RuntimeRecord::load(record.path()).unwrap();
        assert_eq!(reloaded.pending_count(), 0);
    }

    #[test]
    fn test_failed_entry_recorded_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path());

        // First entry: ancestor fetch will fail (not in the map).
        write(&config.trees.container_root.join("a.txt"), "a\n");
        write(&config.trees.contact_points_dir.join("a.txt"), "a\n");
        // Second entry: fine.
        write(&config.trees.container_root.join("b.txt"), "b\n");
        write(&config.trees.contact_points_dir.join("b.txt"), "b\n");

        let mut record =
            RuntimeRecord::initialize(config.trees.runtime_record_path()).unwrap();
        record.push(RuntimeEntry::merge("a.txt", "a.txt"));
        record.push(RuntimeEntry::merge("b.txt", "b.txt"));
        record.save().unwrap();
        let errors = ErrorRecord::initialize(config.trees.error_record_path()).unwrap();

        let ancestors = MapAncestors(HashMap::from([("b.txt".to_string(), "b\n".to_string())]));
        let workspace = RecordingWorkspace::default();
        let engine = MergeEngine::new(&config, &ancestors, &workspace);

        let stats = engine.run(&mut record, &errors).unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.merged, 1);

        // The poison entry is processed, not retried.
        assert_eq!(record.pending_count(), 0);
        let errs = errors.read_all().unwrap();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].contact_point, "a.txt");
        assert!(errs[0].detail.contains("baseline"));
    }

    #[test]
    fn test_malformed_markers_fail_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path());

        write(&config.trees.container_root.join("bad.txt"), "x\n");
        write(
            &config.trees.contact_points_dir.join("bad.txt"),
            &format!("//{TOKEN} start\nnever closed\n"),
        );

        let mut record =
            RuntimeRecord::initialize(config.trees.runtime_record_path()).unwrap();
        record.push(RuntimeEntry::merge("bad.txt", "bad.txt"));
        record.save().unwrap();
        let errors = ErrorRecord::initialize(config.trees.error_record_path()).unwrap();

        let ancestors = MapAncestors(HashMap::from([("bad.txt".to_string(), "x\n".to_string())]));
        let workspace = RecordingWorkspace::default();
        let engine = MergeEngine::new(&config, &ancestors, &workspace);

        let stats = engine.run(&mut record, &errors).unwrap();
        assert_eq!(stats.failed, 1);
        let errs = errors.read_all().unwrap();
        assert!(errs[0].detail.contains("marker"));
        // The target was left untouched.
        let target = fs::read_to_string(config.trees.container_root.join("bad.txt")).unwrap();
        assert_eq!(target, "x\n");
    }

    #[test]
    fn test_resume_skips_processed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path());

        for name in ["a.txt", "b.txt"] {
            write(&config.trees.container_root.join(name), "same\n");
            write(&config.trees.contact_points_dir.join(name), "same\n");
        }

        let mut record =
            RuntimeRecord::initialize(config.trees.runtime_record_path()).unwrap();
        record.push(RuntimeEntry::merge("a.txt", "a.txt"));
        record.push(RuntimeEntry::merge("b.txt", "b.txt"));
        record.mark_processed(0);
        record.save().unwrap();
        let errors = ErrorRecord::initialize(config.trees.error_record_path()).unwrap();

        let ancestors = MapAncestors(HashMap::from([
            ("a.txt".to_string(), "same\n".to_string()),
            ("b.txt".to_string(), "same\n".to_string()),
        ]));
        let workspace = RecordingWorkspace::default();
        let engine = MergeEngine::new(&config, &ancestors, &workspace);

        let stats = engine.run(&mut record, &errors).unwrap();
        assert_eq!(stats.already_processed, 1);
        assert_eq!(stats.merged, 1);

        // Only b.txt was touched.
        let staged = workspace.0.lock().unwrap();
        assert_eq!(*staged, vec!["b.txt"]);
    }

    #[test]
    fn test_step_returns_none_when_done() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path());

        let mut record =
            RuntimeRecord::initialize(config.trees.runtime_record_path()).unwrap();
        let errors = ErrorRecord::initialize(config.trees.error_record_path()).unwrap();

        let ancestors = MapAncestors(HashMap::new());
        let workspace = RecordingWorkspace::default();
        let engine = MergeEngine::new(&config, &ancestors, &workspace);

        assert!(engine.step(&mut record, &errors).unwrap().is_none());
    }
}
